/*!
 * Queue Types
 * Tasks, terminal outcomes, and queue statistics
 */

use crate::core::errors::FailureReason;
use crate::core::types::{CostCents, Priority, ProviderId, TaskId, TenantId};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Unit of queued work
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    pub id: TaskId,
    pub tenant_id: TenantId,
    /// Lower value = dispatched sooner
    pub priority: Priority,
    pub kind: String,
    pub payload: serde_json::Value,
    pub max_retries: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Task {
    pub fn new(
        tenant_id: TenantId,
        priority: Priority,
        kind: impl Into<String>,
        payload: serde_json::Value,
        max_retries: u32,
    ) -> Self {
        Self {
            id: TaskId::new_v4(),
            tenant_id,
            priority,
            kind: kind.into(),
            payload,
            max_retries,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Task state machine: Queued -> Running -> terminal
///
/// Retries stay inside Running (the attempt counter increments); a task
/// never re-enters Queued once dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Terminal report for one task, delivered on the outcome channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub tenant_id: TenantId,
    pub status: TaskStatus,
    /// Attempts actually made (1 = first try succeeded)
    pub attempts: u32,
    pub provider: Option<ProviderId>,
    pub failure: Option<FailureReason>,
    pub cost_cents: CostCents,
    pub payload: Option<serde_json::Value>,
}

/// Aggregate queue counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QueueStats {
    pub submitted: u64,
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub queued_now: usize,
    pub running_now: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }
}
