//! Error types for ServiceAtlas

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for ServiceAtlas
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown service, edge or route id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Registration data failed validation
    #[error("Invalid service: {0}")]
    InvalidService(String),

    /// Dependency edge violates referential or uniqueness rules
    #[error("Invalid dependency edge: {0}")]
    InvalidEdge(String),

    /// Route rule violates referential rules or has a malformed pattern
    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    /// No route rule of the gateway matches the inbound path
    #[error("No route on gateway '{gateway}' matches '{path}'")]
    NoRoute {
        /// Gateway service id
        gateway: String,
        /// Inbound request path
        path: String,
    },

    /// Route target is missing or confirmed unhealthy
    #[error("Target service unavailable: {0}")]
    TargetUnavailable(String),

    /// Outbound call to the target failed
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    /// Outbound call to the target timed out
    #[error("Upstream request timed out")]
    UpstreamTimeout,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Durable store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP protocol error on the inbound side
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// Invalid HTTP request
    #[error("Invalid HTTP request: {0}")]
    InvalidRequest(String),

    /// Operation not permitted for this service
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Internal error (should not happen in production)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert error to HTTP status code
    pub fn to_status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::NotFound(_) | Error::NoRoute { .. } => StatusCode::NOT_FOUND,
            Error::InvalidService(_)
            | Error::InvalidEdge(_)
            | Error::InvalidRoute(_)
            | Error::InvalidRequest(_)
            | Error::Serialization(_) => StatusCode::BAD_REQUEST,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::TargetUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the forwarder tried the target and the network failed
    pub fn is_upstream(&self) -> bool {
        matches!(self, Error::Upstream(_) | Error::UpstreamTimeout)
    }

    /// Create a not-found error for a service id
    pub fn service_not_found(id: impl AsRef<str>) -> Self {
        Error::NotFound(format!("service '{}'", id.as_ref()))
    }
}
