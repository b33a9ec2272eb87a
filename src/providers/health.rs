/*!
 * Provider Health Monitor
 * Periodic probing, EWMA tracking, and deterministic provider selection
 *
 * Health state is published through arc-swap: the monitor is the single
 * writer, dispatch workers read immutable snapshots without ever blocking a
 * write in progress. The probe loop and the task-result feedback hook share
 * one update path, so a stream of live failures degrades a provider faster
 * than slow probes alone.
 */

use super::adapter::ProviderAdapter;
use super::types::{HealthStatus, ProviderHealth, TaskInvocation};
use crate::core::config::HealthConfig;
use crate::core::errors::OrchestratorError;
use crate::core::types::{CostCents, ProviderId};
use crate::events::{AlertBus, Category, Event, Payload, Severity};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Per-provider registration: adapter + published health snapshot
struct ProviderSlot {
    adapter: Arc<dyn ProviderAdapter>,
    health: ArcSwap<ProviderHealth>,
    /// Serializes the probe loop and the feedback hook on the update path
    update_lock: Mutex<()>,
}

/// Monitors registered providers and ranks them for task routing
pub struct ProviderHealthMonitor {
    config: HealthConfig,
    providers: DashMap<ProviderId, Arc<ProviderSlot>>,
    bus: Option<AlertBus>,
    shutdown: Arc<Notify>,
}

impl ProviderHealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            providers: DashMap::new(),
            bus: None,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Attach an alert bus for health transition events
    #[must_use]
    pub fn with_alert_bus(mut self, bus: AlertBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Register a provider adapter; starts Healthy until probed
    pub fn register(&self, adapter: Arc<dyn ProviderAdapter>) {
        let id: ProviderId = adapter.id().to_string();
        info!("Registered provider {}", id);
        self.providers.insert(
            id.clone(),
            Arc::new(ProviderSlot {
                adapter,
                health: ArcSwap::from_pointee(ProviderHealth::new(id)),
                update_lock: Mutex::new(()),
            }),
        );
    }

    /// Remove a provider from rotation
    pub fn deregister(&self, provider_id: &str) -> bool {
        self.providers.remove(provider_id).is_some()
    }

    /// Immutable health snapshot for one provider
    pub fn snapshot(&self, provider_id: &str) -> Option<ProviderHealth> {
        self.providers
            .get(provider_id)
            .map(|slot| ProviderHealth::clone(&slot.health.load()))
    }

    /// Snapshots for all registered providers, ordered by id
    pub fn snapshot_all(&self) -> Vec<ProviderHealth> {
        let mut all: Vec<ProviderHealth> = self
            .providers
            .iter()
            .map(|entry| ProviderHealth::clone(&entry.value().health.load()))
            .collect();
        all.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        all
    }

    /// Select the best provider for an invocation
    ///
    /// Critical providers are excluded. The rest are ranked by health score
    /// weighted by cost efficiency against the tenant's remaining budget
    /// headroom; ties break by provider id so selection is reproducible.
    pub fn select(
        &self,
        invocation: &TaskInvocation,
        budget_headroom: Option<CostCents>,
    ) -> Result<ProviderId, OrchestratorError> {
        let mut best: Option<(f64, ProviderId)> = None;

        for entry in self.providers.iter() {
            let health = entry.value().health.load();
            if health.is_critical() {
                continue;
            }

            let estimate = entry.value().adapter.estimate_cost(invocation);
            let score = health.score() * cost_efficiency(estimate, budget_headroom);
            let id = entry.key().clone();

            let better = match &best {
                None => true,
                Some((best_score, best_id)) => {
                    score > *best_score || (score == *best_score && id < *best_id)
                }
            };
            if better {
                best = Some((score, id));
            }
        }

        best.map(|(_, id)| id)
            .ok_or(OrchestratorError::ProviderUnavailable)
    }

    /// Fetch the adapter for a selected provider
    pub fn adapter(&self, provider_id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers
            .get(provider_id)
            .map(|slot| Arc::clone(&slot.adapter))
    }

    /// Feedback hook invoked by the queue after every real task
    pub fn on_task_result(&self, provider_id: &str, success: bool, latency: Duration) {
        if let Some(slot) = self.providers.get(provider_id) {
            self.apply_outcome(slot.value(), success, latency);
        }
    }

    /// Probe every registered provider once
    pub async fn probe_all(&self) {
        let slots: Vec<Arc<ProviderSlot>> = self
            .providers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for slot in slots {
            let probe = tokio::time::timeout(self.config.probe_timeout, slot.adapter.health_probe());
            match probe.await {
                Ok(Ok(report)) => self.apply_outcome(&slot, true, report.latency),
                Ok(Err(e)) => {
                    debug!("Probe failed for {}: {}", slot.adapter.id(), e);
                    self.apply_outcome(&slot, false, self.config.probe_timeout);
                }
                Err(_) => {
                    debug!("Probe timed out for {}", slot.adapter.id());
                    self.apply_outcome(&slot, false, self.config.probe_timeout);
                }
            }
        }
    }

    /// Spawn the fixed-interval probe loop
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let monitor = self;
        let shutdown = Arc::clone(&monitor.shutdown);
        let interval = monitor.config.probe_interval;
        info!("Health monitor probe loop started (every {:?})", interval);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately; skip it so registration settles
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => monitor.probe_all().await,
                    _ = shutdown.notified() => {
                        info!("Health monitor probe loop stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the probe loop
    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }

    /// Shared EWMA + classification update for probes and task feedback
    fn apply_outcome(&self, slot: &ProviderSlot, success: bool, latency: Duration) {
        let _guard = slot.update_lock.lock();
        let current = slot.health.load();
        let alpha = self.config.ewma_alpha;

        let mut next = ProviderHealth::clone(&current);
        next.last_probe_at = Some(OffsetDateTime::now_utc());
        let observed = if success { 1.0 } else { 0.0 };
        next.success_rate_ewma = alpha * observed + (1.0 - alpha) * current.success_rate_ewma;

        if success {
            let latency_ms = latency.as_secs_f64() * 1000.0;
            next.latency_ewma_ms = alpha * latency_ms + (1.0 - alpha) * current.latency_ewma_ms;
            next.consecutive_failures = 0;
            // Direct reset: one good probe clears Warning and Critical alike
            next.status = HealthStatus::Healthy;
        } else {
            next.consecutive_failures = current.consecutive_failures + 1;
            next.status = if next.consecutive_failures >= self.config.critical_threshold {
                HealthStatus::Critical
            } else if next.consecutive_failures >= self.config.warn_threshold {
                HealthStatus::Warning
            } else {
                HealthStatus::Healthy
            };
        }

        let transition = (current.status != next.status).then(|| (current.status, next.status));
        slot.health.store(Arc::new(next));
        drop(_guard);

        if let Some((from, to)) = transition {
            let severity = match to {
                HealthStatus::Critical => Severity::Critical,
                HealthStatus::Warning => Severity::Warn,
                HealthStatus::Healthy => Severity::Info,
            };
            warn!(
                "Provider {} health: {} -> {}",
                slot.adapter.id(),
                from,
                to
            );
            if let Some(ref bus) = self.bus {
                bus.publish(Event::new(
                    severity,
                    Category::Provider,
                    Payload::HealthChanged {
                        provider: slot.adapter.id().to_string(),
                        from: from.to_string(),
                        to: to.to_string(),
                    },
                ));
            }
        }
    }
}

/// Weight a provider's cost against the tenant's remaining headroom
///
/// Cheap providers approach 1.0; providers whose estimate eats most of the
/// headroom are deprioritized; with no headroom information cost is neutral.
fn cost_efficiency(estimate: CostCents, headroom: Option<CostCents>) -> f64 {
    match headroom {
        None => 1.0,
        Some(0) => 0.0,
        Some(headroom) => {
            if estimate == 0 {
                1.0
            } else {
                (headroom as f64 / (estimate as f64 * 4.0)).min(1.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ProviderError;
    use crate::core::types::{TaskId, TenantId};
    use crate::providers::types::{InvocationResult, ProbeReport};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Adapter whose probes succeed or fail on a switch
    struct SwitchAdapter {
        id: String,
        healthy: AtomicBool,
        cost: CostCents,
    }

    impl SwitchAdapter {
        fn new(id: &str, cost: CostCents) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                healthy: AtomicBool::new(true),
                cost,
            })
        }

        fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ProviderAdapter for SwitchAdapter {
        fn id(&self) -> &str {
            &self.id
        }

        async fn execute(
            &self,
            _invocation: TaskInvocation,
        ) -> Result<InvocationResult, ProviderError> {
            Ok(InvocationResult {
                cost_cents: self.cost,
                latency: Duration::from_millis(10),
                payload: serde_json::json!({}),
            })
        }

        async fn health_probe(&self) -> Result<ProbeReport, ProviderError> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(ProbeReport {
                    latency: Duration::from_millis(20),
                })
            } else {
                Err(ProviderError::Transient("probe refused".into()))
            }
        }

        fn estimate_cost(&self, _invocation: &TaskInvocation) -> CostCents {
            self.cost
        }
    }

    fn invocation() -> TaskInvocation {
        TaskInvocation {
            task_id: TaskId::new_v4(),
            tenant_id: TenantId::new_v4(),
            kind: "build".into(),
            payload: serde_json::json!({}),
        }
    }

    fn monitor() -> ProviderHealthMonitor {
        ProviderHealthMonitor::new(HealthConfig {
            probe_interval: Duration::from_millis(10),
            probe_timeout: Duration::from_millis(100),
            warn_threshold: 2,
            critical_threshold: 3,
            ewma_alpha: 0.3,
        })
    }

    #[tokio::test]
    async fn test_three_failures_reach_critical() {
        let monitor = monitor();
        let adapter = SwitchAdapter::new("p1", 10);
        monitor.register(adapter.clone());
        adapter.set_healthy(false);

        monitor.probe_all().await;
        assert_eq!(monitor.snapshot("p1").unwrap().status, HealthStatus::Healthy);
        monitor.probe_all().await;
        assert_eq!(monitor.snapshot("p1").unwrap().status, HealthStatus::Warning);
        monitor.probe_all().await;
        assert_eq!(monitor.snapshot("p1").unwrap().status, HealthStatus::Critical);
    }

    #[tokio::test]
    async fn test_critical_excluded_until_success() {
        let monitor = monitor();
        let adapter = SwitchAdapter::new("p1", 10);
        monitor.register(adapter.clone());
        adapter.set_healthy(false);
        for _ in 0..3 {
            monitor.probe_all().await;
        }
        assert!(matches!(
            monitor.select(&invocation(), None),
            Err(OrchestratorError::ProviderUnavailable)
        ));

        // One good probe restores eligibility immediately
        adapter.set_healthy(true);
        monitor.probe_all().await;
        assert_eq!(monitor.snapshot("p1").unwrap().status, HealthStatus::Healthy);
        assert_eq!(monitor.select(&invocation(), None).unwrap(), "p1");
    }

    #[tokio::test]
    async fn test_select_prefers_healthier_provider() {
        let monitor = monitor();
        let good = SwitchAdapter::new("good", 10);
        let bad = SwitchAdapter::new("bad", 10);
        monitor.register(good.clone());
        monitor.register(bad.clone());

        bad.set_healthy(false);
        monitor.probe_all().await;
        monitor.probe_all().await;

        assert_eq!(monitor.select(&invocation(), None).unwrap(), "good");
    }

    #[tokio::test]
    async fn test_select_tie_breaks_by_id() {
        let monitor = monitor();
        monitor.register(SwitchAdapter::new("beta", 10));
        monitor.register(SwitchAdapter::new("alpha", 10));

        // Identical (never-probed) health: deterministic lexicographic winner
        assert_eq!(monitor.select(&invocation(), None).unwrap(), "alpha");
    }

    #[tokio::test]
    async fn test_headroom_weights_cost() {
        let monitor = monitor();
        monitor.register(SwitchAdapter::new("cheap", 5));
        monitor.register(SwitchAdapter::new("pricey", 500));

        // Tiny headroom: the cheap provider must win despite equal health
        assert_eq!(monitor.select(&invocation(), Some(20)).unwrap(), "cheap");
    }

    #[tokio::test]
    async fn test_task_feedback_degrades_health() {
        let monitor = monitor();
        monitor.register(SwitchAdapter::new("p1", 10));

        for _ in 0..3 {
            monitor.on_task_result("p1", false, Duration::from_millis(50));
        }
        assert_eq!(
            monitor.snapshot("p1").unwrap().status,
            HealthStatus::Critical
        );
    }
}
