/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use crate::core::types::{Priority, TaskId, TenantId};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level orchestrator errors with serialization support
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum OrchestratorError {
    #[error("Invalid startup config: {0}")]
    #[diagnostic(
        code(orchestrator::config_invalid),
        help("Fix the startup configuration and resubmit. Nothing was allocated.")
    )]
    ConfigInvalid(String),

    #[error("Concurrency limit reached: {current} live startups, limit {limit}")]
    #[diagnostic(
        code(orchestrator::concurrency_limit),
        help("Wait for a running startup to reach a terminal state, then retry.")
    )]
    ConcurrencyLimit { current: usize, limit: usize },

    #[error("Resource exhausted: {resource} (requested {requested}, available {available})")]
    #[diagnostic(
        code(orchestrator::resource_exhausted),
        help("The pool cannot satisfy the request right now. Retry later or shrink requirements.")
    )]
    ResourceExhausted {
        resource: String,
        requested: u64,
        available: u64,
    },

    #[error("No eligible provider: all candidates are critical")]
    #[diagnostic(
        code(orchestrator::provider_unavailable),
        help("Every registered provider is failing health probes. Check provider status.")
    )]
    ProviderUnavailable,

    #[error("Budget exceeded for tenant {tenant} on {tier} tier")]
    #[diagnostic(
        code(orchestrator::budget_exceeded),
        help("Spending is halted until the tier window resets or an operator raises the limit.")
    )]
    BudgetExceeded { tenant: TenantId, tier: String },

    #[error("Task timed out after {attempts} attempts")]
    #[diagnostic(
        code(orchestrator::task_timeout),
        help("The provider did not answer within the per-task timeout across all retries.")
    )]
    TaskTimeout { attempts: u32 },

    #[error("Tenant {0} not found")]
    #[diagnostic(
        code(orchestrator::tenant_not_found),
        help("The startup may have been archived or never existed. Check the id.")
    )]
    TenantNotFound(TenantId),

    #[error("Task {0} not found")]
    #[diagnostic(code(orchestrator::task_not_found))]
    TaskNotFound(TaskId),

    #[error("Invalid state transition: {from} -> {to}")]
    #[diagnostic(
        code(orchestrator::invalid_state),
        help("Operation cannot be performed in the current lifecycle state.")
    )]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid priority {0}")]
    #[diagnostic(code(orchestrator::invalid_priority))]
    InvalidPriority(Priority),

    #[error("Storage error: {0}")]
    #[diagnostic(
        code(orchestrator::storage),
        help("Persistence of orchestration state failed. Check the state directory.")
    )]
    Storage(String),
}

/// Machine-readable reason attached to a terminal FAILED startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ResourceExhausted,
    ProviderUnavailable,
    BudgetExceeded,
    TaskTimeout,
    ConfigInvalid,
    ProviderError,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::ResourceExhausted => "resource_exhausted",
            FailureReason::ProviderUnavailable => "provider_unavailable",
            FailureReason::BudgetExceeded => "budget_exceeded",
            FailureReason::TaskTimeout => "task_timeout",
            FailureReason::ConfigInvalid => "config_invalid",
            FailureReason::ProviderError => "provider_error",
        };
        f.write_str(s)
    }
}

/// Provider invocation errors, split by retry eligibility
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ProviderError {
    /// Retried with backoff up to the task's max_retries
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// Fails the task immediately, no retry
    #[error("Fatal provider error: {0}")]
    Fatal(String),
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        OrchestratorError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization_round_trip() {
        let err = OrchestratorError::ResourceExhausted {
            resource: "ports".into(),
            requested: 3,
            available: 1,
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: OrchestratorError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(FailureReason::BudgetExceeded.to_string(), "budget_exceeded");
        assert_eq!(FailureReason::TaskTimeout.to_string(), "task_timeout");
    }
}
