//! Registry facade tying the store, health engine, ledger and router together

use atlas_config::Config;
use atlas_core::{
    DependencyEdge, EdgeSpec, Error, HealthStatus, Protocol, Result, RoutePatch, RouteRule,
    RouteSpec, ServicePatch, ServiceRecord, ServiceSpec, ServiceStats, Topology,
};
use atlas_health::{
    EngineConfig, HealthCheck, HealthEngine, HttpHealthCheck, Prober, ProberConfig, TickSummary,
};
use atlas_proxy::{Forwarder, ForwarderConfig, ProxyBody};
use atlas_router::RouteTable;
use atlas_state::{open_backend, ServiceRegistry, Snapshot, StateBackend, Upsert};
use atlas_topology::DependencyLedger;
use bytes::Bytes;
use chrono::Utc;
use http::{Request, Response};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Filter for [`Atlas::list_services`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceFilter {
    /// Only services in this status
    pub status: Option<HealthStatus>,
    /// Only gateways (`true`) or only non-gateways (`false`)
    pub is_gateway: Option<bool>,
}

impl ServiceFilter {
    fn matches(&self, record: &ServiceRecord) -> bool {
        self.status.map_or(true, |s| record.status() == s)
            && self.is_gateway.map_or(true, |g| record.is_gateway() == g)
    }
}

/// Target details handed to a gateway with each of its routes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteTarget {
    /// Service id
    pub id: String,
    /// Display name
    pub name: String,
    /// Host
    pub host: String,
    /// Port
    pub port: u16,
    /// Scheme
    pub protocol: Protocol,
    /// Current status
    pub status: HealthStatus,
    /// Base address
    pub base_url: String,
}

/// A route rule with its resolved target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayRoute {
    /// The rule
    #[serde(flatten)]
    pub rule: RouteRule,
    /// Where it forwards to
    pub target_service: RouteTarget,
}

/// Monitoring overview
#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    /// Status counts
    pub services: ServiceStats,
    /// Dependency edges
    pub dependencies: usize,
    /// Route rules
    pub routes: usize,
    /// Whether the active prober loop is running
    pub prober_running: bool,
    /// Most recent probe tick
    pub last_tick: Option<TickSummary>,
}

/// Counts of a preload pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadSummary {
    /// Services registered
    pub services: usize,
    /// Edges created
    pub dependencies: usize,
    /// Routes created
    pub routes: usize,
    /// Entries rejected
    pub failed: usize,
}

/// The registry application.
///
/// Every public mutating operation writes a [`Snapshot`] to the configured
/// backend before returning; a failed write is logged and does not fail the
/// operation. Heartbeats only mark the state dirty; dirty state is written by
/// the background listener once per `health.interval`, after every probe tick
/// and on shutdown. Snapshots are taken and written under one lock so writes
/// land in mutation order.
#[derive(Debug)]
pub struct Atlas {
    registry: ServiceRegistry,
    engine: HealthEngine,
    ledger: DependencyLedger,
    routes: RouteTable,
    forwarder: Forwarder,
    prober: Arc<Prober>,
    backend: Arc<dyn StateBackend>,
    persist_lock: tokio::sync::Mutex<()>,
    dirty: AtomicBool,
    flush_interval: Duration,
    last_tick: Arc<Mutex<Option<TickSummary>>>,
    auto_routes: bool,
    probing_enabled: bool,
    cancel: Mutex<CancellationToken>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Atlas {
    /// Build from configuration: open the backend, restore the last snapshot,
    /// then apply the preload lists.
    pub async fn from_config(config: &Config) -> Result<Arc<Self>> {
        let backend = open_backend(&config.storage).await?;
        let checker: Arc<dyn HealthCheck> =
            Arc::new(HttpHealthCheck::new(config.health.timeout)?);
        let atlas = Arc::new(Self::new(config, backend, checker)?);

        atlas.restore().await?;
        atlas.preload(config).await;
        Ok(atlas)
    }

    /// Wire the components with an explicit backend and probe implementation
    pub fn new(
        config: &Config,
        backend: Arc<dyn StateBackend>,
        checker: Arc<dyn HealthCheck>,
    ) -> Result<Self> {
        let registry = ServiceRegistry::new();
        let engine = HealthEngine::new(
            registry.clone(),
            EngineConfig {
                unhealthy_threshold: config.health.unhealthy_threshold,
                heartbeat_timeout: config.health.heartbeat_timeout,
                probe_window: config.health.interval + config.health.timeout,
            },
        );
        let ledger = DependencyLedger::new(registry.clone());
        let routes = RouteTable::new(registry.clone());
        let forwarder = Forwarder::new(
            registry.clone(),
            routes.clone(),
            ForwarderConfig {
                timeout: config.proxy.timeout,
                connect_timeout: config.proxy.connect_timeout,
                add_forwarded_headers: config.proxy.add_forwarded_headers,
            },
        )?;
        let prober = Arc::new(Prober::new(
            engine.clone(),
            checker,
            ProberConfig {
                interval: config.health.interval,
                timeout: config.health.timeout,
                heartbeat_timeout: config.health.heartbeat_timeout,
            },
        ));

        Ok(Self {
            registry,
            engine,
            ledger,
            routes,
            forwarder,
            prober,
            backend,
            persist_lock: tokio::sync::Mutex::new(()),
            dirty: AtomicBool::new(false),
            flush_interval: config.health.interval,
            last_tick: Arc::new(Mutex::new(None)),
            auto_routes: config.registry.auto_routes,
            probing_enabled: config.health.enabled,
            cancel: Mutex::new(CancellationToken::new()),
            listener: Mutex::new(None),
        })
    }

    /// Service store
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Health engine
    pub fn engine(&self) -> &HealthEngine {
        &self.engine
    }

    /// Active prober
    pub fn prober(&self) -> &Arc<Prober> {
        &self.prober
    }

    /// Snapshot backend
    pub fn backend(&self) -> &Arc<dyn StateBackend> {
        &self.backend
    }

    // ---- lifecycle ----

    /// Start the active prober (if enabled), persist after every tick and
    /// flush heartbeat updates periodically
    pub fn start(self: &Arc<Self>) {
        let mut listener = self.listener.lock();
        if listener.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let cancel = {
            let mut token = self.cancel.lock();
            if token.is_cancelled() {
                *token = CancellationToken::new();
            }
            token.clone()
        };
        let mut ticks = self.prober.subscribe();
        let mut flush = tokio::time::interval(self.flush_interval);
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let atlas = Arc::downgrade(self);

        *listener = Some(tokio::spawn(async move {
            loop {
                let summary = tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = flush.tick() => None,
                    received = ticks.recv() => match received {
                        Ok(summary) => Some(summary),
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "Tick listener lagged");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                };
                let Some(atlas) = atlas.upgrade() else { break };
                match summary {
                    Some(summary) => {
                        *atlas.last_tick.lock() = Some(summary);
                        atlas.persist_logged().await;
                    }
                    None => {
                        if let Err(e) = atlas.flush().await {
                            error!(error = %e, "Failed to flush snapshot");
                        }
                    }
                }
            }
        }));
        drop(listener);

        if self.probing_enabled {
            self.prober.start();
        } else {
            info!("Active probing disabled");
        }
    }

    /// Stop the prober and the tick listener
    pub async fn stop(&self) {
        self.prober.stop().await;
        self.cancel.lock().cancel();
        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Tick listener failed");
            }
        }
    }

    // ---- persistence ----

    /// Current state of the registry, ledger and route table
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            services: self.registry.list(),
            edges: self.ledger.snapshot(),
            routes: self.routes.snapshot(),
            saved_at: Some(Utc::now()),
        }
    }

    /// Write a snapshot to the backend
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        self.dirty.store(false, Ordering::Release);
        let snapshot = self.snapshot();
        if let Err(e) = self.backend.save(&snapshot).await {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }

    /// Write a snapshot only if heartbeats changed state since the last
    /// write. Returns whether anything was written.
    pub async fn flush(&self) -> Result<bool> {
        if !self.dirty.load(Ordering::Acquire) {
            return Ok(false);
        }
        self.persist().await?;
        Ok(true)
    }

    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            error!(backend = self.backend.name(), error = %e, "Failed to persist snapshot");
        }
    }

    /// Load the last snapshot, if any. Returns whether anything was restored.
    pub async fn restore(&self) -> Result<bool> {
        let Some(snapshot) = self.backend.load().await? else {
            return Ok(false);
        };
        if snapshot.is_empty() {
            return Ok(false);
        }

        info!(
            backend = self.backend.name(),
            services = snapshot.services.len(),
            edges = snapshot.edges.len(),
            routes = snapshot.routes.len(),
            "Restoring snapshot"
        );
        self.registry.restore(snapshot.services);
        self.ledger.restore(snapshot.edges);
        self.routes.restore(snapshot.routes);
        Ok(true)
    }

    /// Apply the configured services, then dependencies, then routes.
    ///
    /// Failures are logged and skipped. Routes identical to an existing one
    /// (same gateway, pattern and target) are not created twice.
    pub async fn preload(&self, config: &Config) -> PreloadSummary {
        let mut summary = PreloadSummary::default();

        for spec in &config.services {
            match self.register_inner(spec.clone()) {
                Ok(_) => summary.services += 1,
                Err(e) => {
                    warn!(name = %spec.descriptor.name, error = %e, "Preload: service rejected");
                    summary.failed += 1;
                }
            }
        }

        for spec in &config.dependencies {
            let duplicate = self.ledger.dependencies_of(&spec.source_service_id).iter().any(|e| {
                e.target_service_id == spec.target_service_id
            });
            if duplicate {
                debug!(
                    source = %spec.source_service_id,
                    target = %spec.target_service_id,
                    "Preload: dependency already present"
                );
                continue;
            }
            match self.ledger.add_edge(spec.clone()) {
                Ok(_) => summary.dependencies += 1,
                Err(e) => {
                    warn!(
                        source = %spec.source_service_id,
                        target = %spec.target_service_id,
                        error = %e,
                        "Preload: dependency rejected"
                    );
                    summary.failed += 1;
                }
            }
        }

        for spec in &config.routes {
            let duplicate = self
                .routes
                .list_routes(Some(&spec.gateway_service_id), false)
                .iter()
                .any(|r| {
                    r.path_pattern == spec.path_pattern.trim()
                        && r.target_service_id == spec.target_service_id
                });
            if duplicate {
                debug!(pattern = %spec.path_pattern, "Preload: route already present");
                continue;
            }
            match self.routes.add_route(spec.clone()) {
                Ok(_) => summary.routes += 1,
                Err(e) => {
                    warn!(
                        gateway = %spec.gateway_service_id,
                        pattern = %spec.path_pattern,
                        error = %e,
                        "Preload: route rejected"
                    );
                    summary.failed += 1;
                }
            }
        }

        info!(
            services = summary.services,
            dependencies = summary.dependencies,
            routes = summary.routes,
            failed = summary.failed,
            "Preload finished"
        );
        if summary.services + summary.dependencies + summary.routes > 0 {
            self.persist_logged().await;
        }
        summary
    }

    // ---- registration ----

    fn register_inner(&self, spec: ServiceSpec) -> Result<(ServiceRecord, Upsert)> {
        let id = spec.resolve_id()?;
        spec.descriptor.validate()?;

        let (record, outcome) = self.registry.upsert(&id, spec.descriptor, Utc::now());
        info!(
            service_id = %id,
            name = %record.descriptor.name,
            gateway = record.is_gateway(),
            replaced = outcome == Upsert::Replaced,
            "Service registered"
        );

        if outcome == Upsert::Created && !record.is_gateway() && self.auto_routes {
            self.ensure_default_route(&id);
        }
        Ok((record, outcome))
    }

    /// `/{id}/**` on the first gateway, unless the service already has a route
    fn ensure_default_route(&self, id: &str) {
        if self.routes.has_route_to(id) {
            return;
        }
        let Some(gateway) = self.registry.list().into_iter().find(|r| r.is_gateway()) else {
            return;
        };

        let spec =
            RouteSpec::new(gateway.id.clone(), format!("/{id}/**"), id).strip(format!("/{id}"));
        match self.routes.add_route(spec) {
            Ok(rule) => debug!(
                service_id = %id,
                route_id = rule.id,
                gateway = %gateway.id,
                "Default route created"
            ),
            Err(e) => warn!(service_id = %id, error = %e, "Failed to create default route"),
        }
    }

    /// Register a service, or replace an existing one's identity/config
    /// fields while keeping its health fields.
    pub async fn register(&self, spec: ServiceSpec) -> Result<(ServiceRecord, Upsert)> {
        let result = self.register_inner(spec)?;
        self.persist_logged().await;
        Ok(result)
    }

    /// Apply a partial update; NotFound if absent
    pub async fn update(&self, id: &str, patch: ServicePatch) -> Result<ServiceRecord> {
        let current = self
            .registry
            .get(id)
            .ok_or_else(|| Error::service_not_found(id))?;
        patch.apply(&current.descriptor).validate()?;

        let record = self
            .registry
            .update_descriptor(id, Utc::now(), |d| patch.apply(d))
            .ok_or_else(|| Error::service_not_found(id))?;
        info!(service_id = %id, "Service updated");
        self.persist_logged().await;
        Ok(record)
    }

    /// Remove a service. Its edges and routes stay and are skipped by reads.
    pub async fn deregister(&self, id: &str) -> Result<ServiceRecord> {
        let record = self
            .registry
            .remove(id)
            .ok_or_else(|| Error::service_not_found(id))?;
        info!(service_id = %id, "Service deregistered");
        self.persist_logged().await;
        Ok(record)
    }

    /// Record a heartbeat now; NotFound for unknown ids.
    ///
    /// The change is written by the next [`Atlas::flush`], not here.
    pub async fn heartbeat(&self, id: &str) -> Result<ServiceRecord> {
        self.engine.record_heartbeat(id, Utc::now())?;
        self.dirty.store(true, Ordering::Release);
        self.registry
            .get(id)
            .ok_or_else(|| Error::service_not_found(id))
    }

    // ---- discovery ----

    /// The record, whatever its status
    pub fn get(&self, id: &str) -> Result<ServiceRecord> {
        self.registry
            .get(id)
            .ok_or_else(|| Error::service_not_found(id))
    }

    /// The record, only if healthy
    pub fn discover(&self, id: &str) -> Result<ServiceRecord> {
        match self.registry.get(id) {
            Some(record) if record.status() == HealthStatus::Healthy => Ok(record),
            Some(_) => Err(Error::NotFound(format!("service '{id}' is not healthy"))),
            None => Err(Error::service_not_found(id)),
        }
    }

    /// Services matching `filter`, newest registration first
    pub fn list_services(&self, filter: &ServiceFilter) -> Vec<ServiceRecord> {
        let mut services: Vec<_> = self
            .registry
            .list()
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        services.sort_by(|a, b| {
            b.registered_at
                .cmp(&a.registered_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        services
    }

    /// Gateway services
    pub fn gateways(&self) -> Vec<ServiceRecord> {
        self.list_services(&ServiceFilter {
            is_gateway: Some(true),
            ..ServiceFilter::default()
        })
    }

    /// Status counts
    pub fn stats(&self) -> ServiceStats {
        self.registry.stats()
    }

    /// Monitoring overview
    pub fn overview(&self) -> Overview {
        Overview {
            services: self.registry.stats(),
            dependencies: self.ledger.len(),
            routes: self.routes.len(),
            prober_running: self.prober.is_running(),
            last_tick: self.last_tick.lock().clone(),
        }
    }

    /// Run a probe tick now and persist the result
    pub async fn trigger_health_check(&self) -> TickSummary {
        let summary = self.prober.run_tick().await;
        *self.last_tick.lock() = Some(summary.clone());
        self.persist_logged().await;
        summary
    }

    // ---- dependencies ----

    /// Create an edge
    pub async fn add_dependency(&self, spec: EdgeSpec) -> Result<DependencyEdge> {
        let edge = self.ledger.add_edge(spec)?;
        self.persist_logged().await;
        Ok(edge)
    }

    /// Delete an edge
    pub async fn remove_dependency(&self, id: u64) -> Result<DependencyEdge> {
        let edge = self.ledger.remove_edge(id)?;
        self.persist_logged().await;
        Ok(edge)
    }

    /// All edges, newest first
    pub fn list_dependencies(&self) -> Vec<DependencyEdge> {
        self.ledger.list_edges()
    }

    /// Edges where `id` is the source
    pub fn dependencies_of(&self, id: &str) -> Vec<DependencyEdge> {
        self.ledger.dependencies_of(id)
    }

    /// Edges where `id` is the target
    pub fn dependents_of(&self, id: &str) -> Vec<DependencyEdge> {
        self.ledger.dependents_of(id)
    }

    /// Services plus edges whose endpoints both exist
    pub fn topology(&self) -> Topology {
        self.ledger.list_topology()
    }

    // ---- routes ----

    /// Create a route rule
    pub async fn add_route(&self, spec: RouteSpec) -> Result<RouteRule> {
        let rule = self.routes.add_route(spec)?;
        self.persist_logged().await;
        Ok(rule)
    }

    /// Update a route rule
    pub async fn update_route(&self, id: u64, patch: RoutePatch) -> Result<RouteRule> {
        let rule = self.routes.update_route(id, patch)?;
        self.persist_logged().await;
        Ok(rule)
    }

    /// Delete a route rule
    pub async fn remove_route(&self, id: u64) -> Result<RouteRule> {
        let rule = self.routes.remove_route(id)?;
        self.persist_logged().await;
        Ok(rule)
    }

    /// One route rule
    pub fn get_route(&self, id: u64) -> Result<RouteRule> {
        self.routes
            .get_route(id)
            .ok_or_else(|| Error::NotFound(format!("route {id}")))
    }

    /// Route rules, optionally of one gateway
    pub fn list_routes(&self, gateway: Option<&str>, enabled_only: bool) -> Vec<RouteRule> {
        self.routes.list_routes(gateway, enabled_only)
    }

    /// Enabled routes of a gateway with their target details.
    ///
    /// Routes whose target is gone are skipped. NotFound if the gateway is
    /// unknown, Forbidden if the service is not a gateway.
    pub fn gateway_routes(&self, gateway_id: &str) -> Result<Vec<GatewayRoute>> {
        let gateway = self
            .registry
            .get(gateway_id)
            .ok_or_else(|| Error::service_not_found(gateway_id))?;
        if !gateway.is_gateway() {
            return Err(Error::Forbidden(format!(
                "service '{gateway_id}' is not a gateway"
            )));
        }

        Ok(self
            .routes
            .list_routes(Some(gateway_id), true)
            .into_iter()
            .filter_map(|rule| {
                let target = self.registry.get(&rule.target_service_id)?;
                Some(GatewayRoute {
                    target_service: RouteTarget {
                        base_url: target.base_url(),
                        status: target.status(),
                        id: target.id,
                        name: target.descriptor.name,
                        host: target.descriptor.host,
                        port: target.descriptor.port,
                        protocol: target.descriptor.protocol,
                    },
                    rule,
                })
            })
            .collect())
    }

    // ---- forwarding ----

    /// Forward a gateway request; the URI carries the path relative to the gateway
    pub async fn forward<B>(
        &self,
        gateway_id: &str,
        req: Request<B>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<ProxyBody>>
    where
        B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.forwarder.forward(gateway_id, req, client_addr).await
    }
}

impl Drop for Atlas {
    fn drop(&mut self) {
        self.cancel.lock().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use atlas_config::ConfigBuilder;
    use atlas_health::ProbeOutcome;
    use atlas_state::InMemoryBackend;
    use std::collections::HashMap;

    #[derive(Debug, Default)]
    struct StaticCheck {
        failing: parking_lot::Mutex<HashMap<String, bool>>,
    }

    impl StaticCheck {
        fn fail(&self, url: &str) {
            self.failing.lock().insert(url.to_string(), true);
        }
    }

    #[async_trait]
    impl HealthCheck for StaticCheck {
        async fn check(&self, url: &str) -> ProbeOutcome {
            if self.failing.lock().contains_key(url) {
                ProbeOutcome::unhealthy(std::time::Duration::ZERO, "scripted failure")
            } else {
                ProbeOutcome::healthy(std::time::Duration::ZERO)
            }
        }
    }

    fn atlas_with(config: Config) -> (Atlas, Arc<InMemoryBackend>, Arc<StaticCheck>) {
        let backend = Arc::new(InMemoryBackend::new());
        let check = Arc::new(StaticCheck::default());
        let atlas = Atlas::new(&config, backend.clone(), check.clone()).unwrap();
        (atlas, backend, check)
    }

    fn atlas() -> Atlas {
        atlas_with(Config::default()).0
    }

    #[tokio::test]
    async fn test_register_generates_id_and_persists() {
        let (atlas, backend, _) = atlas_with(Config::default());
        let mut spec = ServiceSpec::new("x", "Deck View", "10.0.0.5", 8080);
        spec.id = None;

        let (record, outcome) = atlas.register(spec).await.unwrap();
        assert_eq!(outcome, Upsert::Created);
        assert!(record.id.starts_with("deck-view-"));
        assert_eq!(record.status(), HealthStatus::Unknown);

        let saved = backend.load().await.unwrap().unwrap();
        assert_eq!(saved.services.len(), 1);
    }

    #[tokio::test]
    async fn test_reregister_keeps_health() {
        let atlas = atlas();
        atlas
            .register(ServiceSpec::new("billing", "Billing", "10.0.0.1", 7000))
            .await
            .unwrap();
        atlas.heartbeat("billing").await.unwrap();

        let (record, outcome) = atlas
            .register(ServiceSpec::new("billing", "Billing v2", "10.0.0.9", 7001))
            .await
            .unwrap();
        assert_eq!(outcome, Upsert::Replaced);
        assert_eq!(record.descriptor.host, "10.0.0.9");
        assert_eq!(record.status(), HealthStatus::Healthy);
        assert!(record.health.last_heartbeat_at.is_some());
    }

    #[tokio::test]
    async fn test_register_rejects_invalid() {
        let atlas = atlas();
        let err = atlas
            .register(ServiceSpec::new("billing", "", "10.0.0.1", 7000))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidService(_)));

        let err = atlas
            .register(ServiceSpec::new("", "Billing", "10.0.0.1", 7000))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidService(_)));
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_is_not_found() {
        let atlas = atlas();
        let err = atlas.heartbeat("ghost").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(atlas.registry().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_is_written_on_flush() {
        let (atlas, backend, _) = atlas_with(Config::default());
        atlas
            .register(ServiceSpec::new("billing", "Billing", "10.0.0.1", 7000))
            .await
            .unwrap();
        assert!(!atlas.flush().await.unwrap());

        atlas.heartbeat("billing").await.unwrap();
        let saved = backend.load().await.unwrap().unwrap();
        assert!(saved.services[0].health.last_heartbeat_at.is_none());

        assert!(atlas.flush().await.unwrap());
        let saved = backend.load().await.unwrap().unwrap();
        assert_eq!(saved.services[0].health.status, HealthStatus::Healthy);
        assert!(saved.services[0].health.last_heartbeat_at.is_some());
        assert!(!atlas.flush().await.unwrap());
    }

    #[tokio::test]
    async fn test_listener_flushes_heartbeats_without_prober() {
        let config = ConfigBuilder::new()
            .health(atlas_config::HealthConfig {
                interval: std::time::Duration::from_millis(50),
                timeout: std::time::Duration::from_millis(20),
                ..atlas_config::HealthConfig::default()
            })
            .without_prober()
            .build()
            .unwrap();
        let (atlas, backend, _) = atlas_with(config);
        let atlas = Arc::new(atlas);
        atlas
            .register(ServiceSpec::new("billing", "Billing", "10.0.0.1", 7000))
            .await
            .unwrap();

        atlas.start();
        atlas.heartbeat("billing").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        atlas.stop().await;

        assert!(!atlas.prober().is_running());
        let saved = backend.load().await.unwrap().unwrap();
        assert!(saved.services[0].health.last_heartbeat_at.is_some());
    }

    #[tokio::test]
    async fn test_default_route_on_first_gateway() {
        let atlas = atlas();
        atlas
            .register(ServiceSpec::new("edge-b", "Edge B", "10.0.0.3", 80).gateway())
            .await
            .unwrap();
        atlas
            .register(ServiceSpec::new("edge-a", "Edge A", "10.0.0.2", 80).gateway())
            .await
            .unwrap();
        atlas
            .register(ServiceSpec::new("deckview", "Deckview", "10.0.0.5", 8080))
            .await
            .unwrap();

        let routes = atlas.list_routes(None, false);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].gateway_service_id, "edge-a");
        assert_eq!(routes[0].path_pattern, "/deckview/**");
        assert!(routes[0].strip_prefix);
        assert_eq!(routes[0].strip_path, "/deckview");

        // re-registering does not add another
        atlas
            .register(ServiceSpec::new("deckview", "Deckview", "10.0.0.5", 8080))
            .await
            .unwrap();
        assert_eq!(atlas.list_routes(None, false).len(), 1);
    }

    #[tokio::test]
    async fn test_no_default_route_without_gateway_or_when_disabled() {
        let atlas = atlas();
        atlas
            .register(ServiceSpec::new("deckview", "Deckview", "10.0.0.5", 8080))
            .await
            .unwrap();
        assert!(atlas.list_routes(None, false).is_empty());

        let (atlas, _, _) = atlas_with(ConfigBuilder::new().auto_routes(false).build().unwrap());
        atlas
            .register(ServiceSpec::new("edge", "Edge", "10.0.0.2", 80).gateway())
            .await
            .unwrap();
        atlas
            .register(ServiceSpec::new("deckview", "Deckview", "10.0.0.5", 8080))
            .await
            .unwrap();
        assert!(atlas.list_routes(None, false).is_empty());
    }

    #[tokio::test]
    async fn test_update_and_deregister() {
        let atlas = atlas();
        atlas
            .register(ServiceSpec::new("billing", "Billing", "10.0.0.1", 7000))
            .await
            .unwrap();

        let patch = ServicePatch {
            port: Some(7100),
            ..ServicePatch::default()
        };
        let record = atlas.update("billing", patch).await.unwrap();
        assert_eq!(record.descriptor.port, 7100);

        let bad = ServicePatch {
            port: Some(0),
            ..ServicePatch::default()
        };
        assert!(atlas.update("billing", bad).await.is_err());
        assert!(matches!(
            atlas.update("ghost", ServicePatch::default()).await,
            Err(Error::NotFound(_))
        ));

        atlas.deregister("billing").await.unwrap();
        assert!(matches!(atlas.deregister("billing").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_discover_requires_healthy() {
        let atlas = atlas();
        atlas
            .register(ServiceSpec::new("billing", "Billing", "10.0.0.1", 7000))
            .await
            .unwrap();
        assert!(matches!(atlas.discover("billing"), Err(Error::NotFound(_))));

        atlas.heartbeat("billing").await.unwrap();
        assert_eq!(atlas.discover("billing").unwrap().id, "billing");
    }

    #[tokio::test]
    async fn test_list_services_filters() {
        let atlas = atlas();
        atlas
            .register(ServiceSpec::new("a", "A", "10.0.0.1", 7000))
            .await
            .unwrap();
        atlas
            .register(ServiceSpec::new("edge", "Edge", "10.0.0.2", 80).gateway())
            .await
            .unwrap();
        atlas.heartbeat("a").await.unwrap();

        let healthy = atlas.list_services(&ServiceFilter {
            status: Some(HealthStatus::Healthy),
            ..ServiceFilter::default()
        });
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].id, "a");

        let gateways = atlas.gateways();
        assert_eq!(gateways.len(), 1);
        assert_eq!(gateways[0].id, "edge");

        let stats = atlas.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.healthy, 1);
        assert_eq!(stats.unknown, 1);
        assert_eq!(stats.gateways, 1);
    }

    #[tokio::test]
    async fn test_gateway_routes() {
        let atlas = atlas();
        atlas
            .register(ServiceSpec::new("edge", "Edge", "10.0.0.2", 80).gateway())
            .await
            .unwrap();
        atlas
            .register(ServiceSpec::new("docs", "Docs", "10.0.0.7", 8000))
            .await
            .unwrap();
        atlas
            .register(ServiceSpec::new("gone", "Gone", "10.0.0.8", 8000))
            .await
            .unwrap();

        let routes = atlas.gateway_routes("edge").unwrap();
        assert_eq!(routes.len(), 2);

        atlas.deregister("gone").await.unwrap();
        let routes = atlas.gateway_routes("edge").unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].target_service.id, "docs");
        assert_eq!(routes[0].target_service.base_url, "http://10.0.0.7:8000");

        assert!(matches!(atlas.gateway_routes("docs"), Err(Error::Forbidden(_))));
        assert!(matches!(atlas.gateway_routes("ghost"), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_trigger_health_check() {
        let (atlas, _, check) = atlas_with(Config::default());
        atlas
            .register(ServiceSpec::new("ok", "Ok", "10.0.0.1", 7000))
            .await
            .unwrap();
        atlas
            .register(ServiceSpec::new("bad", "Bad", "10.0.0.2", 7000))
            .await
            .unwrap();
        check.fail("http://10.0.0.2:7000/health");

        let summary = atlas.trigger_health_check().await;
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.healthy, 1);
        assert_eq!(summary.unhealthy, 1);
        assert_eq!(atlas.get("ok").unwrap().status(), HealthStatus::Healthy);
        assert_eq!(atlas.overview().last_tick, Some(summary));
    }

    #[tokio::test]
    async fn test_restore_then_preload_is_idempotent() {
        let config = ConfigBuilder::new()
            .service(ServiceSpec::new("edge", "Edge", "10.0.0.2", 80).gateway())
            .service(ServiceSpec::new("docs", "Docs", "10.0.0.7", 8000))
            .dependency(EdgeSpec {
                source_service_id: "edge".to_string(),
                target_service_id: "docs".to_string(),
                description: None,
            })
            .route(RouteSpec::new("edge", "/manual/*", "docs"))
            .build()
            .unwrap();

        let (first, backend, _) = atlas_with(config.clone());
        let summary = first.preload(&config).await;
        assert_eq!(summary.services, 2);
        assert_eq!(summary.dependencies, 1);
        assert_eq!(summary.routes, 1);
        assert_eq!(first.list_routes(None, false).len(), 2);

        let second =
            Atlas::new(&config, backend.clone(), Arc::new(StaticCheck::default())).unwrap();
        assert!(second.restore().await.unwrap());
        second.preload(&config).await;
        assert_eq!(second.registry().len(), 2);
        assert_eq!(second.list_dependencies().len(), 1);
        assert_eq!(second.list_routes(None, false).len(), 2);
    }

    #[tokio::test]
    async fn test_preload_skips_bad_entries() {
        let config = ConfigBuilder::new()
            .service(ServiceSpec::new("docs", "Docs", "10.0.0.7", 8000))
            .dependency(EdgeSpec {
                source_service_id: "docs".to_string(),
                target_service_id: "ghost".to_string(),
                description: None,
            })
            .route(RouteSpec::new("docs", "/x/*", "docs"))
            .build()
            .unwrap();
        let (atlas, _, _) = atlas_with(config.clone());

        let summary = atlas.preload(&config).await;
        assert_eq!(summary.services, 1);
        assert_eq!(summary.failed, 2);
    }

    #[tokio::test]
    async fn test_start_persists_after_ticks() {
        let config = ConfigBuilder::new()
            .health(atlas_config::HealthConfig {
                interval: std::time::Duration::from_millis(50),
                timeout: std::time::Duration::from_millis(20),
                ..atlas_config::HealthConfig::default()
            })
            .build()
            .unwrap();
        let (atlas, backend, _) = atlas_with(config);
        let atlas = Arc::new(atlas);
        atlas
            .registry()
            .upsert("ok", ServiceSpec::new("ok", "Ok", "10.0.0.1", 7000).descriptor, Utc::now());

        atlas.start();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        atlas.stop().await;

        let saved = backend.load().await.unwrap().unwrap();
        assert_eq!(saved.services[0].health.status, HealthStatus::Healthy);
        assert!(!atlas.prober().is_running());
    }
}
