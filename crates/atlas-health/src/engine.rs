//! Health state machine fusing probe results and heartbeats

use atlas_core::{Error, HealthState, HealthStatus, Result};
use atlas_state::ServiceRegistry;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Health engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Consecutive probe failures that mark a service unhealthy
    pub unhealthy_threshold: u32,
    /// How long a heartbeat keeps a service healthy
    pub heartbeat_timeout: Duration,
    /// How long a successful probe keeps a service healthy
    pub probe_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3,
            heartbeat_timeout: Duration::from_secs(60),
            probe_window: Duration::from_secs(35),
        }
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

fn is_fresh(at: Option<DateTime<Utc>>, now: DateTime<Utc>, window: chrono::Duration) -> bool {
    at.is_some_and(|t| now - t <= window)
}

/// Sole writer of the health fields of every [`ServiceRecord`].
///
/// Every update runs under the record's own lock, so a heartbeat and a probe
/// result for the same service are applied one after the other and neither
/// is lost. Signals older than the last one seen on the same channel are
/// discarded.
///
/// [`ServiceRecord`]: atlas_core::ServiceRecord
#[derive(Debug, Clone)]
pub struct HealthEngine {
    registry: ServiceRegistry,
    config: EngineConfig,
}

impl HealthEngine {
    /// Create an engine over `registry`
    pub fn new(registry: ServiceRegistry, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    /// The underlying registry
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn threshold(&self) -> u32 {
        self.config.unhealthy_threshold.max(1)
    }

    /// Apply one active probe result.
    ///
    /// Returns the resulting status, or `None` if the id is unknown (the
    /// result is dropped and logged).
    pub fn record_probe_result(
        &self,
        id: &str,
        success: bool,
        at: DateTime<Utc>,
    ) -> Option<HealthStatus> {
        let threshold = self.threshold();
        let heartbeat_window = to_chrono(self.config.heartbeat_timeout);

        let applied = self.registry.update_health(id, |h: &mut HealthState| {
            let before = h.status;
            if h.last_probe_at.is_some_and(|last| at < last) {
                return (before, before, false);
            }

            h.last_probe_at = Some(at);
            if success {
                h.status = HealthStatus::Healthy;
                h.consecutive_probe_failures = 0;
                h.last_probe_success_at = Some(at);
            } else {
                h.consecutive_probe_failures = h.consecutive_probe_failures.saturating_add(1);
                if h.consecutive_probe_failures >= threshold
                    && !is_fresh(h.last_heartbeat_at, at, heartbeat_window)
                {
                    h.status = HealthStatus::Unhealthy;
                }
            }
            (before, h.status, true)
        });

        let Some((before, after, accepted)) = applied else {
            warn!(service_id = %id, success, "Probe result for unknown service ignored");
            return None;
        };

        if !accepted {
            debug!(service_id = %id, at = %at, "Discarded out-of-order probe result");
        } else if before != after {
            info!(
                service_id = %id,
                from = %before,
                to = %after,
                channel = "probe",
                "Service health changed"
            );
        }
        Some(after)
    }

    /// Apply a heartbeat. Heartbeats never auto-register.
    pub fn record_heartbeat(&self, id: &str, at: DateTime<Utc>) -> Result<HealthStatus> {
        let (before, after) = self
            .registry
            .update_health(id, |h: &mut HealthState| {
                let before = h.status;
                if h.last_heartbeat_at.is_some_and(|last| at < last) {
                    return (before, before);
                }
                h.status = HealthStatus::Healthy;
                h.consecutive_probe_failures = 0;
                h.last_heartbeat_at = Some(at);
                (before, h.status)
            })
            .ok_or_else(|| Error::service_not_found(id))?;

        if before != after {
            info!(
                service_id = %id,
                from = %before,
                to = %after,
                channel = "heartbeat",
                "Service health changed"
            );
        } else {
            debug!(service_id = %id, "Heartbeat received");
        }
        Ok(after)
    }

    /// Demote healthy services whose heartbeat went stale while no probe
    /// vouches for them.
    ///
    /// A service is demoted only if its last heartbeat is older than
    /// `heartbeat_timeout` and it has no successful probe inside the probe
    /// window with a failure streak below threshold. Probe-only services
    /// (never sent a heartbeat) are left to the probe failure counter.
    /// Returns the demoted ids.
    pub fn sweep_stale_heartbeats(
        &self,
        now: DateTime<Utc>,
        heartbeat_timeout: Duration,
    ) -> Vec<String> {
        let threshold = self.threshold();
        let heartbeat_window = to_chrono(heartbeat_timeout);
        let probe_window = to_chrono(self.config.probe_window);

        let mut demoted = Vec::new();
        for id in self.registry.ids() {
            let changed = self
                .registry
                .update_health(&id, |h: &mut HealthState| {
                    if h.status != HealthStatus::Healthy || h.last_heartbeat_at.is_none() {
                        return false;
                    }
                    if is_fresh(h.last_heartbeat_at, now, heartbeat_window) {
                        return false;
                    }
                    let probe_confirms = h.consecutive_probe_failures < threshold
                        && is_fresh(h.last_probe_success_at, now, probe_window);
                    if probe_confirms {
                        return false;
                    }
                    h.status = HealthStatus::Unhealthy;
                    true
                })
                .unwrap_or(false);

            if changed {
                info!(
                    service_id = %id,
                    from = %HealthStatus::Healthy,
                    to = %HealthStatus::Unhealthy,
                    channel = "sweep",
                    "Service health changed"
                );
                demoted.push(id);
            }
        }

        if !demoted.is_empty() {
            debug!(count = demoted.len(), "Heartbeat sweep demoted services");
        }
        demoted
    }

    /// Current status of a service
    pub fn status(&self, id: &str) -> Option<HealthStatus> {
        self.registry.status(id)
    }
}
