/*!
 * Provider Types
 * Health classification and invocation payloads
 */

use crate::core::types::{CostCents, ProviderId, TaskId, TenantId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;

/// Provider health classification
///
/// Critical providers are excluded from selection until a probe succeeds,
/// at which point they return directly to Healthy (no staged recovery).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Health snapshot for one provider
///
/// Single writer (the monitor), many readers (dispatch workers). Readers get
/// immutable snapshots and never block an update in progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProviderHealth {
    pub provider_id: ProviderId,
    pub status: HealthStatus,
    pub latency_ewma_ms: f64,
    pub success_rate_ewma: f64,
    pub consecutive_failures: u32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_probe_at: Option<OffsetDateTime>,
}

impl ProviderHealth {
    pub fn new(provider_id: ProviderId) -> Self {
        Self {
            provider_id,
            status: HealthStatus::Healthy,
            latency_ewma_ms: crate::core::limits::INITIAL_LATENCY_MS,
            success_rate_ewma: 1.0,
            consecutive_failures: 0,
            last_probe_at: None,
        }
    }

    /// Composite health score for provider ranking (higher is better)
    #[inline]
    #[must_use]
    pub fn score(&self) -> f64 {
        self.success_rate_ewma * 1000.0 / (1.0 + self.latency_ewma_ms)
    }

    #[inline]
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self.status, HealthStatus::Critical)
    }
}

/// One unit of work handed to a provider adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TaskInvocation {
    pub task_id: TaskId,
    pub tenant_id: TenantId,
    pub kind: String,
    pub payload: serde_json::Value,
}

/// Successful provider invocation outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct InvocationResult {
    pub cost_cents: CostCents,
    pub latency: Duration,
    pub payload: serde_json::Value,
}

/// Lightweight health-check response
#[derive(Debug, Clone, Copy)]
pub struct ProbeReport {
    pub latency: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_prefers_fast_reliable_providers() {
        let mut fast = ProviderHealth::new("fast".into());
        fast.latency_ewma_ms = 50.0;
        fast.success_rate_ewma = 0.99;

        let mut slow = ProviderHealth::new("slow".into());
        slow.latency_ewma_ms = 900.0;
        slow.success_rate_ewma = 0.99;

        assert!(fast.score() > slow.score());
    }

    #[test]
    fn test_new_provider_starts_healthy() {
        let health = ProviderHealth::new("p".into());
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.consecutive_failures, 0);
    }
}
