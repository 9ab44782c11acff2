//! HTTP server implementation

use crate::atlas::Atlas;
use crate::handler::RequestHandler;
use crate::shutdown::ShutdownSignal;
use crate::RuntimeState;
use atlas_config::Config;
use atlas_core::{Error, Result};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::task::TaskTracker;

/// Registry HTTP server
#[derive(Debug)]
pub struct Server {
    config: Config,
    atlas: Arc<Atlas>,
    state: Arc<RwLock<RuntimeState>>,
    shutdown: ShutdownSignal,
    in_flight: Arc<AtomicUsize>,
}

impl Server {
    /// Create a new server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Get the current state
    pub async fn state(&self) -> RuntimeState {
        *self.state.read().await
    }

    /// Configured listen address
    pub fn listen_addr(&self) -> SocketAddr {
        self.config.server.listen
    }

    /// The registry facade
    pub fn atlas(&self) -> &Arc<Atlas> {
        &self.atlas
    }

    /// Requests currently being handled
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Get shutdown signal
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    async fn set_state(&self, next: RuntimeState) {
        *self.state.write().await = next;
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.listen_addr()).await.map_err(|e| {
            Error::Runtime(format!("Failed to bind to {}: {}", self.listen_addr(), e))
        })?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until the shutdown signal fires.
    ///
    /// On shutdown the prober is stopped first, then open connections are
    /// asked to finish and given up to `shutdown_timeout`, then a final
    /// snapshot is written.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        self.set_state(RuntimeState::Running).await;
        self.atlas.start();

        tracing::info!(
            listen = %local,
            api_prefix = %self.config.server.api_prefix,
            gateway_prefix = %self.config.server.gateway_prefix,
            "Server listening"
        );

        let handler = RequestHandler::new(
            Arc::clone(&self.atlas),
            self.config.server.clone(),
            Arc::clone(&self.in_flight),
        );
        let connections = TaskTracker::new();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, remote) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    tracing::trace!(remote = %remote, "Accepted connection");

                    let handler = handler.clone();
                    let shutdown = self.shutdown.clone();
                    connections.spawn(async move {
                        let service = hyper::service::service_fn(move |req| {
                            let handler = handler.clone();
                            async move {
                                Ok::<_, Infallible>(handler.handle(req, Some(remote)).await)
                            }
                        });

                        let conn = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service);
                        tokio::pin!(conn);

                        let result = tokio::select! {
                            result = conn.as_mut() => result,
                            _ = shutdown.triggered() => {
                                conn.as_mut().graceful_shutdown();
                                conn.as_mut().await
                            }
                        };
                        if let Err(e) = result {
                            tracing::debug!(remote = %remote, error = %e, "Connection closed with error");
                        }
                    });
                }

                _ = self.shutdown.triggered() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }
        drop(listener);

        self.set_state(RuntimeState::ShuttingDown).await;
        self.atlas.stop().await;

        let shutdown_timeout = self.config.server.shutdown_timeout;
        let start = std::time::Instant::now();
        tracing::info!(
            timeout_secs = shutdown_timeout.as_secs(),
            connections = connections.len(),
            "Waiting for in-flight requests to complete"
        );

        connections.close();
        if tokio::time::timeout(shutdown_timeout, connections.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                active_requests = self.in_flight(),
                "Shutdown timeout reached, forcing shutdown"
            );
        }

        if let Err(e) = self.atlas.persist().await {
            tracing::error!(error = %e, "Failed to write final snapshot");
        }

        self.set_state(RuntimeState::Stopped).await;
        tracing::info!(
            shutdown_duration_ms = start.elapsed().as_millis() as u64,
            "Server stopped"
        );

        Ok(())
    }
}

/// Server builder
#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: Option<Config>,
    atlas: Option<Arc<Atlas>>,
    shutdown: Option<ShutdownSignal>,
}

impl ServerBuilder {
    /// Create a new server builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use an already built registry instead of building one from the config
    pub fn atlas(mut self, atlas: Arc<Atlas>) -> Self {
        self.atlas = Some(atlas);
        self
    }

    /// Use an existing shutdown signal
    pub fn shutdown_signal(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = Some(signal);
        self
    }

    /// Build the server, restoring state and applying preload lists
    pub async fn build(self) -> Result<Server> {
        let config = self
            .config
            .ok_or_else(|| Error::Config("config is required".to_string()))?;
        atlas_config::validate_config(&config)?;

        let atlas = match self.atlas {
            Some(atlas) => atlas,
            None => Atlas::from_config(&config).await?,
        };

        tracing::info!(
            services = atlas.registry().len(),
            storage = atlas.backend().name(),
            probing = config.health.enabled,
            "Server components initialized"
        );

        Ok(Server {
            config,
            atlas,
            state: Arc::new(RwLock::new(RuntimeState::Initializing)),
            shutdown: self.shutdown.unwrap_or_default(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }
}
