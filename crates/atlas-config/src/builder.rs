//! Configuration builder

use crate::types::{Config, HealthConfig, ProxyConfig};
use atlas_core::{EdgeSpec, Result, RouteSpec, ServiceSpec};
use atlas_state::StorageConfig;
use std::net::SocketAddr;
use std::time::Duration;

/// Builder for constructing configuration programmatically
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listen address
    pub fn listen(mut self, addr: SocketAddr) -> Self {
        self.config.server.listen = addr;
        self
    }

    /// Set the registry API prefix
    pub fn api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.server.api_prefix = prefix.into();
        self
    }

    /// Set the graceful shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.server.shutdown_timeout = timeout;
        self
    }

    /// Set health configuration
    pub fn health(mut self, health: HealthConfig) -> Self {
        self.config.health = health;
        self
    }

    /// Disable the active prober
    pub fn without_prober(mut self) -> Self {
        self.config.health.enabled = false;
        self
    }

    /// Set proxy configuration
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = proxy;
        self
    }

    /// Toggle default gateway route creation
    pub fn auto_routes(mut self, enabled: bool) -> Self {
        self.config.registry.auto_routes = enabled;
        self
    }

    /// Set snapshot storage
    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = storage;
        self
    }

    /// Add a service to preload
    pub fn service(mut self, spec: ServiceSpec) -> Self {
        self.config.services.push(spec);
        self
    }

    /// Add a dependency edge to preload
    pub fn dependency(mut self, edge: EdgeSpec) -> Self {
        self.config.dependencies.push(edge);
        self
    }

    /// Add a route rule to preload
    pub fn route(mut self, route: RouteSpec) -> Self {
        self.config.routes.push(route);
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<Config> {
        crate::validator::validate_config(&self.config)?;
        Ok(self.config)
    }
}
