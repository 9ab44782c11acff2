//! Common types used throughout ServiceAtlas

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Opaque key/value metadata attached to a service
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Wire protocol of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain HTTP
    #[default]
    Http,
    /// HTTP over TLS
    Https,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Https => write!(f, "https"),
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(Error::InvalidService(format!(
                "unsupported protocol '{other}' (expected http or https)"
            ))),
        }
    }
}

/// Fused health status of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No conclusive signal yet
    #[default]
    Unknown,
    /// Recently confirmed by probe or heartbeat
    Healthy,
    /// Both channels stale or failed
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

impl FromStr for HealthStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "unknown" => Ok(Self::Unknown),
            "healthy" => Ok(Self::Healthy),
            "unhealthy" => Ok(Self::Unhealthy),
            other => Err(Error::InvalidRequest(format!("unknown status '{other}'"))),
        }
    }
}

fn default_health_check_path() -> Option<String> {
    Some("/health".to_string())
}

fn default_heartbeat_interval() -> u64 {
    30
}

/// Identity and configuration fields of a service.
///
/// Written only by the registration API. Updates replace these fields and
/// never touch [`HealthState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Display name
    pub name: String,

    /// Host name or IP address
    pub host: String,

    /// TCP port
    pub port: u16,

    /// Wire protocol
    #[serde(default)]
    pub protocol: Protocol,

    /// Health endpoint path; `None` disables active probing
    #[serde(default = "default_health_check_path")]
    pub health_check_path: Option<String>,

    /// Whether this service forwards inbound requests per its route rules
    #[serde(default)]
    pub is_gateway: bool,

    /// Externally visible path prefix (advisory)
    #[serde(default)]
    pub base_path: String,

    /// Opaque metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Advisory heartbeat period in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
}

impl ServiceDescriptor {
    /// Create a descriptor with default protocol and health path
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            protocol: Protocol::default(),
            health_check_path: default_health_check_path(),
            is_gateway: false,
            base_path: String::new(),
            metadata: Metadata::new(),
            heartbeat_interval: default_heartbeat_interval(),
        }
    }

    /// Validate field ranges
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidService("name cannot be empty".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(Error::InvalidService("host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::InvalidService("port must be in 1..=65535".to_string()));
        }
        Ok(())
    }

    /// Health path with a leading slash, or `None` when probing is disabled
    pub fn probe_path(&self) -> Option<String> {
        let path = self.health_check_path.as_deref()?.trim();
        if path.is_empty() {
            return None;
        }
        if path.starts_with('/') {
            Some(path.to_string())
        } else {
            Some(format!("/{path}"))
        }
    }

    /// Base address, e.g. `http://127.0.0.1:8000`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// Full health endpoint URL, if probing is enabled
    pub fn health_url(&self) -> Option<String> {
        self.probe_path().map(|p| format!("{}{}", self.base_url(), p))
    }
}

/// Registration request: descriptor plus optional caller-chosen id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Requested id; generated from the name when absent
    #[serde(default)]
    pub id: Option<String>,

    /// Identity and configuration fields
    #[serde(flatten)]
    pub descriptor: ServiceDescriptor,
}

impl ServiceSpec {
    /// Create a spec with an explicit id
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: Some(id.into()),
            descriptor: ServiceDescriptor::new(name, host, port),
        }
    }

    /// Mark the service as a gateway
    pub fn gateway(mut self) -> Self {
        self.descriptor.is_gateway = true;
        self
    }

    /// Set the health check path (`None` disables probing)
    pub fn health_check_path(mut self, path: Option<&str>) -> Self {
        self.descriptor.health_check_path = path.map(str::to_string);
        self
    }

    /// Set the protocol
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.descriptor.protocol = protocol;
        self
    }

    /// Add a metadata entry
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.descriptor.metadata.insert(key.into(), value);
        self
    }

    /// The id to register under: the requested one, or a generated one
    pub fn resolve_id(&self) -> Result<String> {
        match self.id.as_deref().map(str::trim) {
            Some("") => Err(Error::InvalidService("id cannot be empty".to_string())),
            Some(id) if id.len() > 64 => Err(Error::InvalidService(
                "id must be at most 64 characters".to_string(),
            )),
            Some(id) => Ok(id.to_string()),
            None => Ok(generate_service_id(&self.descriptor.name)),
        }
    }
}

/// Partial update of a service's identity/config fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicePatch {
    /// New display name
    pub name: Option<String>,
    /// New host
    pub host: Option<String>,
    /// New port
    pub port: Option<u16>,
    /// New protocol
    pub protocol: Option<Protocol>,
    /// New health path; an empty string disables probing
    pub health_check_path: Option<String>,
    /// New gateway flag
    pub is_gateway: Option<bool>,
    /// New base path
    pub base_path: Option<String>,
    /// Replacement metadata
    pub metadata: Option<Metadata>,
    /// New heartbeat interval
    pub heartbeat_interval: Option<u64>,
}

impl ServicePatch {
    /// Apply the patch, returning the updated descriptor
    pub fn apply(&self, current: &ServiceDescriptor) -> ServiceDescriptor {
        let mut next = current.clone();
        if let Some(name) = &self.name {
            next.name = name.clone();
        }
        if let Some(host) = &self.host {
            next.host = host.clone();
        }
        if let Some(port) = self.port {
            next.port = port;
        }
        if let Some(protocol) = self.protocol {
            next.protocol = protocol;
        }
        if let Some(path) = &self.health_check_path {
            next.health_check_path = if path.trim().is_empty() {
                None
            } else {
                Some(path.clone())
            };
        }
        if let Some(is_gateway) = self.is_gateway {
            next.is_gateway = is_gateway;
        }
        if let Some(base_path) = &self.base_path {
            next.base_path = base_path.clone();
        }
        if let Some(metadata) = &self.metadata {
            next.metadata = metadata.clone();
        }
        if let Some(interval) = self.heartbeat_interval {
            next.heartbeat_interval = interval;
        }
        next
    }
}

/// Mutable health fields of a service, owned by the health engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthState {
    /// Fused status
    pub status: HealthStatus,
    /// Failed probes since the last positive signal
    pub consecutive_probe_failures: u32,
    /// Last accepted heartbeat
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Last probe result, success or failure
    pub last_probe_at: Option<DateTime<Utc>>,
    /// Last successful probe
    pub last_probe_success_at: Option<DateTime<Utc>>,
}

/// The registry's record of one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Globally unique, immutable id
    pub id: String,

    /// Identity and configuration
    #[serde(flatten)]
    pub descriptor: ServiceDescriptor,

    /// Health fields
    #[serde(flatten)]
    pub health: HealthState,

    /// Creation time
    pub registered_at: DateTime<Utc>,

    /// Last change of any field
    pub updated_at: DateTime<Utc>,
}

impl ServiceRecord {
    /// Create a fresh record with `unknown` status
    pub fn new(id: impl Into<String>, descriptor: ServiceDescriptor, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            descriptor,
            health: HealthState::default(),
            registered_at: now,
            updated_at: now,
        }
    }

    /// Current status
    pub fn status(&self) -> HealthStatus {
        self.health.status
    }

    /// Whether the service forwards requests
    pub fn is_gateway(&self) -> bool {
        self.descriptor.is_gateway
    }

    /// Base address of the service
    pub fn base_url(&self) -> String {
        self.descriptor.base_url()
    }
}

/// Directed call relationship `source → target`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Edge id
    pub id: u64,
    /// Calling service
    pub source_service_id: String,
    /// Called service
    pub target_service_id: String,
    /// What the call is for
    #[serde(default)]
    pub description: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Request to create a dependency edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// Calling service
    pub source_service_id: String,
    /// Called service
    pub target_service_id: String,
    /// What the call is for
    #[serde(default)]
    pub description: Option<String>,
}

/// Snapshot of services and the edges between them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    /// All registered services
    pub services: Vec<ServiceRecord>,
    /// Edges whose endpoints both exist
    pub edges: Vec<DependencyEdge>,
}

fn default_true() -> bool {
    true
}

/// Gateway routing rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    /// Rule id; also the creation order
    pub id: u64,
    /// Gateway the rule belongs to
    pub gateway_service_id: String,
    /// Prefix-with-wildcard pattern, e.g. `/docs/*`
    pub path_pattern: String,
    /// Service requests are forwarded to
    pub target_service_id: String,
    /// Whether to strip a prefix before forwarding
    #[serde(default)]
    pub strip_prefix: bool,
    /// Prefix to strip; empty means the matched literal prefix
    #[serde(default)]
    pub strip_path: String,
    /// Disabled rules never match
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Request to create a route rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    /// Gateway the rule belongs to
    pub gateway_service_id: String,
    /// Path pattern
    pub path_pattern: String,
    /// Target service
    pub target_service_id: String,
    /// Whether to strip a prefix
    #[serde(default)]
    pub strip_prefix: bool,
    /// Prefix to strip
    #[serde(default)]
    pub strip_path: Option<String>,
    /// Whether the rule is active
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RouteSpec {
    /// Create an enabled rule without prefix stripping
    pub fn new(
        gateway: impl Into<String>,
        pattern: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            gateway_service_id: gateway.into(),
            path_pattern: pattern.into(),
            target_service_id: target.into(),
            strip_prefix: false,
            strip_path: None,
            enabled: true,
        }
    }

    /// Strip `path` (or the matched prefix when empty) before forwarding
    pub fn strip(mut self, path: impl Into<String>) -> Self {
        self.strip_prefix = true;
        self.strip_path = Some(path.into());
        self
    }
}

/// Partial update of a route rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutePatch {
    /// New pattern
    pub path_pattern: Option<String>,
    /// New target
    pub target_service_id: Option<String>,
    /// New strip flag
    pub strip_prefix: Option<bool>,
    /// New strip path
    pub strip_path: Option<String>,
    /// New enabled flag
    pub enabled: Option<bool>,
}

/// Aggregate status counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Registered services
    pub total: usize,
    /// Healthy services
    pub healthy: usize,
    /// Unhealthy services
    pub unhealthy: usize,
    /// Services without a conclusive signal
    pub unknown: usize,
    /// Gateway services
    pub gateways: usize,
}

/// Generate an id of the form `<normalized-name>-<8 hex chars>`
pub fn generate_service_id(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut normalized = String::with_capacity(lowered.len());
    let mut pending_dash = false;
    for ch in lowered.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !normalized.is_empty() {
                normalized.push('-');
            }
            pending_dash = false;
            normalized.push(ch);
        } else if ch.is_whitespace() || ch == '_' || ch == '-' {
            pending_dash = true;
        }
    }
    if normalized.is_empty() {
        normalized.push_str("service");
    }
    let mut prefix: String = normalized.chars().take(20).collect();
    while prefix.ends_with('-') {
        prefix.pop();
    }

    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&HealthStatus::Unhealthy).unwrap();
        assert_eq!(json, "\"unhealthy\"");
        let status: HealthStatus = serde_json::from_str("\"healthy\"").unwrap();
        assert_eq!(status, HealthStatus::Healthy);
        assert_eq!("UNKNOWN".parse::<HealthStatus>().unwrap(), HealthStatus::Unknown);
    }

    #[test]
    fn test_spec_defaults_from_json() {
        let spec: ServiceSpec = serde_json::from_str(
            r#"{"id": "deckview", "name": "DeckView", "host": "127.0.0.1", "port": 8000}"#,
        )
        .unwrap();
        assert_eq!(spec.id.as_deref(), Some("deckview"));
        assert_eq!(spec.descriptor.protocol, Protocol::Http);
        assert_eq!(spec.descriptor.health_check_path.as_deref(), Some("/health"));
        assert_eq!(spec.descriptor.heartbeat_interval, 30);
        assert!(!spec.descriptor.is_gateway);
    }

    #[test]
    fn test_explicit_null_health_path_disables_probing() {
        let spec: ServiceSpec = serde_json::from_str(
            r#"{"name": "worker", "host": "10.0.0.2", "port": 7000, "health_check_path": null}"#,
        )
        .unwrap();
        assert!(spec.descriptor.probe_path().is_none());
        assert!(spec.descriptor.health_url().is_none());
    }

    #[test]
    fn test_health_url_normalizes_slash() {
        let mut descriptor = ServiceDescriptor::new("docs", "127.0.0.1", 8000);
        descriptor.health_check_path = Some("status".to_string());
        assert_eq!(
            descriptor.health_url().as_deref(),
            Some("http://127.0.0.1:8000/status")
        );
        descriptor.protocol = Protocol::Https;
        assert_eq!(descriptor.base_url(), "https://127.0.0.1:8000");
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        assert!(ServiceDescriptor::new("", "h", 1).validate().is_err());
        assert!(ServiceDescriptor::new("n", " ", 1).validate().is_err());
        assert!(ServiceDescriptor::new("n", "h", 0).validate().is_err());
        assert!(ServiceDescriptor::new("n", "h", 65535).validate().is_ok());
        assert!("ftp".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_generate_service_id() {
        let id = generate_service_id("DeckView 文档 Service_v2!");
        let (prefix, suffix) = id.rsplit_once('-').unwrap();
        assert_eq!(prefix, "deckview-service-v2");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));

        let fallback = generate_service_id("!!!");
        assert!(fallback.starts_with("service-"));

        let long = generate_service_id("a very long service name that keeps going");
        let (prefix, _) = long.rsplit_once('-').unwrap();
        assert!(prefix.len() <= 20);
        assert!(!prefix.ends_with('-'));
    }

    #[test]
    fn test_resolve_id() {
        let spec = ServiceSpec::new("deckview", "DeckView", "127.0.0.1", 8000);
        assert_eq!(spec.resolve_id().unwrap(), "deckview");

        let mut anonymous = spec.clone();
        anonymous.id = None;
        assert!(anonymous.resolve_id().unwrap().starts_with("deckview-"));

        let mut blank = spec;
        blank.id = Some("  ".to_string());
        assert!(blank.resolve_id().is_err());
    }

    #[test]
    fn test_patch_replaces_only_given_fields() {
        let current = ServiceDescriptor::new("docs", "127.0.0.1", 8000);
        let patch = ServicePatch {
            port: Some(9000),
            health_check_path: Some(String::new()),
            ..Default::default()
        };
        let next = patch.apply(&current);
        assert_eq!(next.port, 9000);
        assert_eq!(next.name, "docs");
        assert!(next.health_check_path.is_none());
    }

    #[test]
    fn test_record_round_trips_flattened() {
        let now = Utc::now();
        let record = ServiceRecord::new(
            "deckview",
            ServiceDescriptor::new("DeckView", "127.0.0.1", 8000),
            now,
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "unknown");
        assert_eq!(value["port"], 8000);
        let back: ServiceRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }
}
