//! Configuration types

use atlas_core::{EdgeSpec, RouteSpec, ServiceSpec};
use atlas_state::StorageConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// HTTP server
    #[serde(default)]
    pub server: ServerConfig,

    /// Health engine and prober
    #[serde(default)]
    pub health: HealthConfig,

    /// Gateway forwarder
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Registration behavior
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Snapshot persistence
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging defaults for the CLI
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Services registered at startup
    #[serde(default)]
    pub services: Vec<ServiceSpec>,

    /// Dependency edges created at startup
    #[serde(default)]
    pub dependencies: Vec<EdgeSpec>,

    /// Route rules created at startup
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Prefix of the registry API
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Prefix of gateway forwarding, followed by `/{gateway_id}/...`
    #[serde(default = "default_gateway_prefix")]
    pub gateway_prefix: String,

    /// Max request body size (bytes)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Graceful shutdown timeout (wait for in-flight requests)
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            api_prefix: default_api_prefix(),
            gateway_prefix: default_gateway_prefix(),
            max_body_size: default_max_body_size(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Health engine and active prober configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthConfig {
    /// Run the active prober
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Time between probe ticks
    #[serde(default = "default_health_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Per-probe timeout
    #[serde(default = "default_health_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Consecutive probe failures before a service is unhealthy
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,

    /// Heartbeats older than this are stale
    #[serde(default = "default_heartbeat_timeout", with = "humantime_serde")]
    pub heartbeat_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_health_interval(),
            timeout: default_health_timeout(),
            unhealthy_threshold: default_unhealthy_threshold(),
            heartbeat_timeout: default_heartbeat_timeout(),
        }
    }
}

/// Gateway forwarder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyConfig {
    /// Time allowed until the target's response headers arrive
    #[serde(default = "default_proxy_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// TCP connect timeout
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Add `X-Forwarded-*` headers
    #[serde(default = "default_true")]
    pub add_forwarded_headers: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout: default_proxy_timeout(),
            connect_timeout: default_connect_timeout(),
            add_forwarded_headers: true,
        }
    }
}

/// Registration behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryConfig {
    /// Create a `/{id}/**` route on the first gateway for new services
    #[serde(default = "default_true")]
    pub auto_routes: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { auto_routes: true }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, text)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default functions
fn default_true() -> bool {
    true
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}

fn default_api_prefix() -> String {
    "/api/v1".to_string()
}

fn default_gateway_prefix() -> String {
    "/gw".to_string()
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024 // 10 MiB
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_health_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_health_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_unhealthy_threshold() -> u32 {
    3
}

fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_proxy_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.listen.to_string(), "127.0.0.1:9000");
        assert_eq!(config.server.api_prefix, "/api/v1");
        assert_eq!(config.server.gateway_prefix, "/gw");
        assert_eq!(config.health.interval, Duration::from_secs(30));
        assert_eq!(config.health.timeout, Duration::from_secs(5));
        assert_eq!(config.health.unhealthy_threshold, 3);
        assert_eq!(config.health.heartbeat_timeout, Duration::from_secs(60));
        assert!(config.registry.auto_routes);
        assert_eq!(config.storage, StorageConfig::Memory);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_section_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"health": {"interval": "10s", "enabled": false}}"#).unwrap();
        assert!(!config.health.enabled);
        assert_eq!(config.health.interval, Duration::from_secs(10));
        assert_eq!(config.health.unhealthy_threshold, 3);
    }
}
