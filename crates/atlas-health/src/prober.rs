//! Recurring active prober

use crate::{HealthCheck, HealthEngine};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Prober configuration
#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// Time between ticks
    pub interval: Duration,
    /// Per-probe timeout
    pub timeout: Duration,
    /// Heartbeat staleness passed to the sweep
    pub heartbeat_timeout: Duration,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(60),
        }
    }
}

/// Aggregate counts of one tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    /// Services probed
    pub checked: usize,
    /// Probes that succeeded
    pub healthy: usize,
    /// Probes that failed
    pub unhealthy: usize,
    /// Services with probing disabled
    pub skipped: usize,
    /// Services demoted by the heartbeat sweep
    pub demoted: usize,
    /// When the tick started
    pub timestamp: DateTime<Utc>,
}

/// Drives active probes on a recurring tick.
///
/// Scheduled ticks are skipped while a previous tick is still draining;
/// manual ticks ([`Prober::run_tick`]) wait for the running one instead.
/// Each tick fans out one task per probed service, each bounded by the
/// probe timeout.
#[derive(Debug)]
pub struct Prober {
    engine: HealthEngine,
    checker: Arc<dyn HealthCheck>,
    config: ProberConfig,
    tick_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<TickSummary>,
    cancel: Mutex<CancellationToken>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Prober {
    /// Create a prober
    pub fn new(engine: HealthEngine, checker: Arc<dyn HealthCheck>, config: ProberConfig) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            engine,
            checker,
            config,
            tick_lock: tokio::sync::Mutex::new(()),
            events,
            cancel: Mutex::new(CancellationToken::new()),
            handle: Mutex::new(None),
        }
    }

    /// Prober configuration
    pub fn config(&self) -> &ProberConfig {
        &self.config
    }

    /// Subscribe to tick summaries
    pub fn subscribe(&self) -> broadcast::Receiver<TickSummary> {
        self.events.subscribe()
    }

    /// Whether the background loop is running
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start the recurring tick. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Prober already running");
            return;
        }

        let prober = Arc::clone(self);
        let cancel = {
            let mut token = self.cancel.lock();
            if token.is_cancelled() {
                *token = CancellationToken::new();
            }
            token.clone()
        };
        let period = self.config.interval;

        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(interval = ?period, "Active prober started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let prober = Arc::clone(&prober);
                        // run detached so a slow tick never delays the timer
                        tokio::spawn(async move {
                            if prober.try_run_tick().await.is_none() {
                                debug!("Previous tick still running, skipping");
                            }
                        });
                    }
                }
            }
            info!("Active prober stopped");
        }));
    }

    /// Stop the recurring tick and wait for the loop to exit
    pub async fn stop(&self) {
        self.cancel.lock().cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Prober task failed");
            }
        }
    }

    /// Run one tick unless another tick is in progress
    pub async fn try_run_tick(&self) -> Option<TickSummary> {
        let _guard = self.tick_lock.try_lock().ok()?;
        Some(self.tick().await)
    }

    /// Run one tick now, waiting for any in-progress tick to finish first
    pub async fn run_tick(&self) -> TickSummary {
        let _guard = self.tick_lock.lock().await;
        self.tick().await
    }

    async fn tick(&self) -> TickSummary {
        let started = Utc::now();
        let services = self.engine.registry().list();

        let mut summary = TickSummary {
            checked: 0,
            healthy: 0,
            unhealthy: 0,
            skipped: 0,
            demoted: 0,
            timestamp: started,
        };

        let mut probes = JoinSet::new();
        for service in services {
            let Some(url) = service.descriptor.health_url() else {
                summary.skipped += 1;
                continue;
            };

            let checker = Arc::clone(&self.checker);
            let limit = self.config.timeout;
            probes.spawn(async move {
                let success = match timeout(limit, checker.check(&url)).await {
                    Ok(outcome) => {
                        if let Some(message) = &outcome.message {
                            debug!(service_id = %service.id, url = %url, reason = %message, "Probe failed");
                        }
                        outcome.success
                    }
                    Err(_) => {
                        debug!(service_id = %service.id, url = %url, "Probe abandoned after timeout");
                        false
                    }
                };
                (service.id, success, Utc::now())
            });
            summary.checked += 1;
        }

        summary.demoted = self
            .engine
            .sweep_stale_heartbeats(Utc::now(), self.config.heartbeat_timeout)
            .len();

        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((id, success, at)) => {
                    if success {
                        summary.healthy += 1;
                    } else {
                        summary.unhealthy += 1;
                        warn!(service_id = %id, "Health probe failed");
                    }
                    self.engine.record_probe_result(&id, success, at);
                }
                Err(e) => {
                    summary.unhealthy += 1;
                    error!(error = %e, "Probe task panicked");
                }
            }
        }

        debug!(
            checked = summary.checked,
            healthy = summary.healthy,
            unhealthy = summary.unhealthy,
            demoted = summary.demoted,
            "Probe tick finished"
        );
        let _ = self.events.send(summary.clone());
        summary
    }
}

impl Drop for Prober {
    fn drop(&mut self) {
        self.cancel.lock().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EngineConfig, ProbeOutcome};
    use async_trait::async_trait;
    use atlas_core::{HealthStatus, ServiceDescriptor};
    use atlas_state::ServiceRegistry;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers from a per-url script, defaulting to success
    #[derive(Debug, Default)]
    struct ScriptedCheck {
        failing: parking_lot::Mutex<HashMap<String, bool>>,
        hang: parking_lot::Mutex<HashMap<String, bool>>,
        calls: AtomicUsize,
    }

    impl ScriptedCheck {
        fn set_failing(&self, url: &str, failing: bool) {
            self.failing.lock().insert(url.to_string(), failing);
        }

        fn set_hanging(&self, url: &str) {
            self.hang.lock().insert(url.to_string(), true);
        }
    }

    #[async_trait]
    impl HealthCheck for ScriptedCheck {
        async fn check(&self, url: &str) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang.lock().get(url).copied().unwrap_or(false) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.failing.lock().get(url).copied().unwrap_or(false) {
                ProbeOutcome::unhealthy(Duration::ZERO, "scripted failure")
            } else {
                ProbeOutcome::healthy(Duration::ZERO)
            }
        }
    }

    fn setup(checker: Arc<ScriptedCheck>) -> (ServiceRegistry, Arc<Prober>) {
        let registry = ServiceRegistry::new();
        let engine = HealthEngine::new(registry.clone(), EngineConfig::default());
        let config = ProberConfig {
            interval: Duration::from_secs(30),
            timeout: Duration::from_millis(100),
            heartbeat_timeout: Duration::from_secs(60),
        };
        (registry, Arc::new(Prober::new(engine, checker, config)))
    }

    #[tokio::test]
    async fn test_deckview_scenario() {
        let checker = Arc::new(ScriptedCheck::default());
        let (registry, prober) = setup(checker.clone());
        registry.upsert(
            "deckview",
            ServiceDescriptor::new("DeckView", "127.0.0.1", 8000),
            Utc::now(),
        );
        let url = "http://127.0.0.1:8000/health";

        let summary = prober.run_tick().await;
        assert_eq!((summary.checked, summary.healthy, summary.unhealthy), (1, 1, 0));
        let record = registry.get("deckview").unwrap();
        assert_eq!(record.health.status, HealthStatus::Healthy);
        assert_eq!(record.health.consecutive_probe_failures, 0);

        checker.set_failing(url, true);
        for _ in 0..3 {
            prober.run_tick().await;
        }
        assert_eq!(registry.status("deckview"), Some(HealthStatus::Unhealthy));

        let engine = HealthEngine::new(registry.clone(), EngineConfig::default());
        engine.record_heartbeat("deckview", Utc::now()).unwrap();
        assert_eq!(registry.status("deckview"), Some(HealthStatus::Healthy));
    }

    #[tokio::test]
    async fn test_services_without_health_path_are_skipped() {
        let checker = Arc::new(ScriptedCheck::default());
        let (registry, prober) = setup(checker.clone());
        let mut passive = ServiceDescriptor::new("Worker", "10.0.0.9", 7000);
        passive.health_check_path = None;
        registry.upsert("worker", passive, Utc::now());

        let summary = prober.run_tick().await;
        assert_eq!(summary.checked, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(checker.calls.load(Ordering::SeqCst), 0);
        assert_eq!(registry.status("worker"), Some(HealthStatus::Unknown));
    }

    #[tokio::test]
    async fn test_hanging_target_does_not_block_others() {
        let checker = Arc::new(ScriptedCheck::default());
        let (registry, prober) = setup(checker.clone());
        registry.upsert("slow", ServiceDescriptor::new("Slow", "10.0.0.1", 80), Utc::now());
        registry.upsert("fast", ServiceDescriptor::new("Fast", "10.0.0.2", 80), Utc::now());
        checker.set_hanging("http://10.0.0.1:80/health");

        let started = std::time::Instant::now();
        let summary = prober.run_tick().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.healthy, 1);
        assert_eq!(summary.unhealthy, 1);
        assert_eq!(registry.status("fast"), Some(HealthStatus::Healthy));
        assert_eq!(
            registry.get("slow").unwrap().health.consecutive_probe_failures,
            1
        );
    }

    #[tokio::test]
    async fn test_busy_tick_is_skipped() {
        let checker = Arc::new(ScriptedCheck::default());
        let (registry, prober) = setup(checker.clone());
        registry.upsert("slow", ServiceDescriptor::new("Slow", "10.0.0.1", 80), Utc::now());
        checker.set_hanging("http://10.0.0.1:80/health");

        let running = {
            let prober = Arc::clone(&prober);
            tokio::spawn(async move { prober.run_tick().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(prober.try_run_tick().await.is_none());
        running.await.unwrap();
        assert!(prober.try_run_tick().await.is_some());
    }

    #[tokio::test]
    async fn test_tick_summaries_are_broadcast() {
        let checker = Arc::new(ScriptedCheck::default());
        let (registry, prober) = setup(checker);
        registry.upsert("a", ServiceDescriptor::new("A", "10.0.0.1", 80), Utc::now());

        let mut events = prober.subscribe();
        let summary = prober.run_tick().await;
        assert_eq!(events.recv().await.unwrap(), summary);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let checker = Arc::new(ScriptedCheck::default());
        let (registry, prober) = setup(checker.clone());
        registry.upsert("a", ServiceDescriptor::new("A", "10.0.0.1", 80), Utc::now());

        let mut events = prober.subscribe();
        prober.start();
        prober.start();
        assert!(prober.is_running());

        // the first tick fires immediately
        let summary = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.checked, 1);

        prober.stop().await;
        assert!(!prober.is_running());
    }
}
