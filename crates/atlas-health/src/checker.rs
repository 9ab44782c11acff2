//! Active health checking against a service's health endpoint

use async_trait::async_trait;
use atlas_core::{Error, Result};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of one probe
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Whether the endpoint answered 2xx in time
    pub success: bool,
    /// Time taken for the check
    pub duration: Duration,
    /// Failure reason
    pub message: Option<String>,
}

impl ProbeOutcome {
    /// Create a successful outcome
    pub fn healthy(duration: Duration) -> Self {
        Self {
            success: true,
            duration,
            message: None,
        }
    }

    /// Create a failed outcome with a message
    pub fn unhealthy(duration: Duration, message: impl Into<String>) -> Self {
        Self {
            success: false,
            duration,
            message: Some(message.into()),
        }
    }
}

/// Trait for performing health checks
#[async_trait]
pub trait HealthCheck: Send + Sync + fmt::Debug {
    /// Probe the given health URL
    async fn check(&self, url: &str) -> ProbeOutcome;
}

/// HTTP health checker
///
/// Issues `GET url`; any 2xx is a success, everything else (other status,
/// connection error, timeout, malformed response) is a failure.
#[derive(Debug, Clone)]
pub struct HttpHealthCheck {
    client: reqwest::Client,
    timeout_duration: Duration,
}

impl HttpHealthCheck {
    /// Create a new HTTP health checker
    pub fn new(timeout_duration: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout_duration)
            .connect_timeout(timeout_duration)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|e| Error::Config(format!("failed to build health check client: {e}")))?;

        Ok(Self {
            client,
            timeout_duration,
        })
    }

    /// Configured per-request timeout
    pub fn timeout(&self) -> Duration {
        self.timeout_duration
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self, url: &str) -> ProbeOutcome {
        let start = Instant::now();

        debug!(url = %url, "Performing HTTP health check");

        match self.client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                let duration = start.elapsed();

                if status.is_success() {
                    debug!(url = %url, status = %status, "Health check passed");
                    ProbeOutcome::healthy(duration)
                } else {
                    debug!(url = %url, status = %status, "Health check failed: unexpected status");
                    ProbeOutcome::unhealthy(duration, format!("Unexpected status code: {}", status))
                }
            }
            Err(e) if e.is_timeout() => {
                debug!(url = %url, "Health check failed: timeout");
                ProbeOutcome::unhealthy(start.elapsed(), "Timeout")
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Health check failed: request error");
                ProbeOutcome::unhealthy(start.elapsed(), format!("Request error: {}", e))
            }
        }
    }
}
