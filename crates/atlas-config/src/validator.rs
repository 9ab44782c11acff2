//! Configuration validation

use crate::Config;
use atlas_core::{Error, Result};
use atlas_state::StorageConfig;
use std::collections::HashSet;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_server(config)?;
    validate_health(config)?;
    validate_proxy(config)?;
    validate_storage(config)?;
    validate_services(config)?;
    validate_dependencies(config)?;
    validate_routes(config)?;

    Ok(())
}

fn validate_prefix(name: &str, prefix: &str) -> Result<()> {
    if !prefix.starts_with('/') || (prefix.len() > 1 && prefix.ends_with('/')) {
        return Err(Error::Config(format!(
            "{name} must start with '/' and not end with '/'"
        )));
    }
    Ok(())
}

fn validate_server(config: &Config) -> Result<()> {
    let server = &config.server;

    validate_prefix("api_prefix", &server.api_prefix)?;
    validate_prefix("gateway_prefix", &server.gateway_prefix)?;

    if server.gateway_prefix == "/" {
        return Err(Error::Config("gateway_prefix cannot be '/'".to_string()));
    }
    if server.api_prefix == server.gateway_prefix {
        return Err(Error::Config(
            "api_prefix and gateway_prefix must differ".to_string(),
        ));
    }

    if server.max_body_size == 0 {
        return Err(Error::Config("max_body_size must be > 0".to_string()));
    }

    if server.shutdown_timeout.is_zero() {
        return Err(Error::Config("shutdown_timeout must be > 0".to_string()));
    }

    Ok(())
}

fn validate_health(config: &Config) -> Result<()> {
    let health = &config.health;

    if health.interval.is_zero() {
        return Err(Error::Config("health.interval must be > 0".to_string()));
    }
    if health.timeout.is_zero() {
        return Err(Error::Config("health.timeout must be > 0".to_string()));
    }
    if health.heartbeat_timeout.is_zero() {
        return Err(Error::Config(
            "health.heartbeat_timeout must be > 0".to_string(),
        ));
    }
    if health.unhealthy_threshold == 0 {
        return Err(Error::Config(
            "health.unhealthy_threshold must be >= 1".to_string(),
        ));
    }

    if health.timeout > health.interval {
        tracing::warn!(
            timeout = ?health.timeout,
            interval = ?health.interval,
            "Probe timeout exceeds the probe interval; ticks will be skipped"
        );
    }

    Ok(())
}

fn validate_proxy(config: &Config) -> Result<()> {
    if config.proxy.timeout.is_zero() {
        return Err(Error::Config("proxy.timeout must be > 0".to_string()));
    }
    if config.proxy.connect_timeout.is_zero() {
        return Err(Error::Config(
            "proxy.connect_timeout must be > 0".to_string(),
        ));
    }
    if config.proxy.timeout.as_secs() > 300 {
        tracing::warn!("proxy.timeout is very high (>5 minutes)");
    }
    Ok(())
}

fn validate_storage(config: &Config) -> Result<()> {
    match &config.storage {
        StorageConfig::Memory => Ok(()),
        StorageConfig::File { path } if path.as_os_str().is_empty() => {
            Err(Error::Config("storage.path cannot be empty".to_string()))
        }
        StorageConfig::Sqlite { url } if url.is_empty() => {
            Err(Error::Config("storage.url cannot be empty".to_string()))
        }
        _ => Ok(()),
    }
}

fn validate_services(config: &Config) -> Result<()> {
    let mut seen = HashSet::new();

    for service in &config.services {
        service
            .descriptor
            .validate()
            .map_err(|e| Error::Config(format!("services: {e}")))?;

        if let Some(id) = &service.id {
            if id.trim().is_empty() {
                return Err(Error::Config("services: id cannot be empty".to_string()));
            }
            if !seen.insert(id.as_str()) {
                return Err(Error::Config(format!("services: duplicate id '{id}'")));
            }
        }
    }

    Ok(())
}

fn validate_dependencies(config: &Config) -> Result<()> {
    for edge in &config.dependencies {
        if edge.source_service_id.is_empty() || edge.target_service_id.is_empty() {
            return Err(Error::Config(
                "dependencies: source and target ids are required".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_routes(config: &Config) -> Result<()> {
    for route in &config.routes {
        if !route.path_pattern.starts_with('/') {
            return Err(Error::Config(format!(
                "routes: path_pattern '{}' must start with '/'",
                route.path_pattern
            )));
        }

        if route.gateway_service_id.is_empty() || route.target_service_id.is_empty() {
            return Err(Error::Config(
                "routes: gateway and target ids are required".to_string(),
            ));
        }

        if let Some(strip) = route.strip_path.as_deref() {
            if !strip.is_empty() && !strip.starts_with('/') {
                return Err(Error::Config(format!(
                    "routes: strip_path '{strip}' must start with '/'"
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::{EdgeSpec, RouteSpec, ServiceSpec};
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_durations_rejected() {
        let mut config = Config::default();
        config.health.interval = Duration::ZERO;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.proxy.timeout = Duration::ZERO;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.health.heartbeat_timeout = Duration::ZERO;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_threshold_must_be_positive() {
        let mut config = Config::default();
        config.health.unhealthy_threshold = 0;
        assert!(validate_config(&config).is_err());

        config.health.unhealthy_threshold = 1;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_prefixes() {
        let mut config = Config::default();
        config.server.api_prefix = "api".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.server.gateway_prefix = "/api/v1".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.server.gateway_prefix = "/gw/".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_duplicate_service_ids() {
        let mut config = Config::default();
        config.services = vec![
            ServiceSpec::new("billing", "Billing", "10.0.0.1", 7000),
            ServiceSpec::new("billing", "Billing v2", "10.0.0.2", 7000),
        ];
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_service_port_zero() {
        let mut config = Config::default();
        config.services = vec![ServiceSpec::new("billing", "Billing", "10.0.0.1", 0)];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_route_pattern_must_be_absolute() {
        let mut config = Config::default();
        config.routes = vec![RouteSpec::new("edge", "docs/*", "docs")];
        assert!(validate_config(&config).is_err());

        config.routes = vec![RouteSpec::new("edge", "/docs/*", "docs").strip("docs")];
        assert!(validate_config(&config).is_err());

        config.routes = vec![RouteSpec::new("edge", "/docs/*", "docs").strip("/docs")];
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_dependency_ids_required() {
        let mut config = Config::default();
        config.dependencies = vec![EdgeSpec {
            source_service_id: String::new(),
            target_service_id: "billing".to_string(),
            description: None,
        }];
        assert!(validate_config(&config).is_err());
    }
}
