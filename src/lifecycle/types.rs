/*!
 * Lifecycle Types
 * Startup configuration, per-tenant state machine, and instance records
 */

use crate::budget::BudgetLimits;
use crate::core::errors::{FailureReason, OrchestratorError};
use crate::core::types::{Priority, TenantId};
use crate::resources::{ResourceAllocation, ResourceRequirements};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One build phase in a startup's pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PhaseSpec {
    pub name: String,
    /// Task kind handed to the provider adapter for this phase
    pub kind: String,
}

impl PhaseSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }
}

/// Immutable job configuration supplied by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StartupConfig {
    pub name: String,
    pub phases: Vec<PhaseSpec>,
    pub requirements: ResourceRequirements,
    pub budget: BudgetLimits,
    /// Priority for every task this startup enqueues (lower = more urgent)
    pub task_priority: Priority,
    /// Retry budget for each phase task
    pub max_retries: u32,
}

impl StartupConfig {
    pub fn new(name: impl Into<String>, phases: Vec<PhaseSpec>) -> Self {
        Self {
            name: name.into(),
            phases,
            requirements: ResourceRequirements::default(),
            budget: BudgetLimits::unlimited(),
            task_priority: 5,
            max_retries: crate::core::limits::DEFAULT_MAX_RETRIES,
        }
    }

    #[must_use]
    pub fn with_requirements(mut self, requirements: ResourceRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    #[must_use]
    pub fn with_budget(mut self, budget: BudgetLimits) -> Self {
        self.budget = budget;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.task_priority = priority;
        self
    }

    /// Fail fast before any resource is touched
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.name.trim().is_empty() {
            return Err(OrchestratorError::ConfigInvalid("name is empty".into()));
        }
        if self.phases.is_empty() {
            return Err(OrchestratorError::ConfigInvalid("no phases defined".into()));
        }
        if self.requirements.is_empty() {
            return Err(OrchestratorError::ConfigInvalid(
                "resource requirements are all zero".into(),
            ));
        }
        Ok(())
    }
}

/// Startup lifecycle state machine
///
/// `Initializing` exists only transiently inside create_startup; an observer
/// never sees it persisted if allocation fails. The three terminal states
/// are final and release resources exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum StartupState {
    Initializing,
    ResourceAllocated,
    Running { phase: usize },
    Completed,
    Failed,
    Cancelled,
}

impl StartupState {
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            StartupState::Completed | StartupState::Failed | StartupState::Cancelled
        )
    }
}

impl std::fmt::Display for StartupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartupState::Initializing => f.write_str("initializing"),
            StartupState::ResourceAllocated => f.write_str("resource_allocated"),
            StartupState::Running { phase } => write!(f, "running(phase {})", phase),
            StartupState::Completed => f.write_str("completed"),
            StartupState::Failed => f.write_str("failed"),
            StartupState::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// One tenant job: config, state, and held allocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StartupInstance {
    pub id: TenantId,
    pub config: StartupConfig,
    pub status: StartupState,
    /// Held while status is non-terminal
    pub allocation: Option<ResourceAllocation>,
    pub current_phase: usize,
    pub failure: Option<FailureReason>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl StartupInstance {
    pub fn new(id: TenantId, config: StartupConfig, allocation: ResourceAllocation) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id,
            config,
            status: StartupState::ResourceAllocated,
            allocation: Some(allocation),
            current_phase: 0,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[inline]
    #[must_use]
    pub fn phase_count(&self) -> usize {
        self.config.phases.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StartupConfig {
        StartupConfig::new("acme", vec![PhaseSpec::new("scaffold", "codegen")])
    }

    #[test]
    fn test_validation() {
        assert!(config().validate().is_ok());

        let mut bad = config();
        bad.name = "  ".into();
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.phases.clear();
        assert!(bad.validate().is_err());

        let bad = config().with_requirements(ResourceRequirements::new(0, 0, 0, 0));
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(StartupState::Completed.is_terminal());
        assert!(StartupState::Failed.is_terminal());
        assert!(StartupState::Cancelled.is_terminal());
        assert!(!StartupState::Running { phase: 2 }.is_terminal());
        assert!(!StartupState::ResourceAllocated.is_terminal());
    }

    #[test]
    fn test_state_serde_round_trip() {
        let state = StartupState::Running { phase: 3 };
        let json = serde_json::to_string(&state).unwrap();
        let back: StartupState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }
}
