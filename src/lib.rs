/*!
 * Foundry Kernel Library
 * Orchestration core for concurrent startup-build tenants
 */

pub mod budget;
pub mod core;
pub mod events;
pub mod lifecycle;
pub mod providers;
pub mod queue;
pub mod resources;
pub mod store;

// Re-exports
pub use crate::budget::{BudgetLimits, BudgetMonitor, BudgetSnapshot, BudgetTier};
pub use crate::core::{
    FailureReason, OrchestratorConfig, OrchestratorError, OrchestratorResult, ProviderError,
};
pub use crate::events::{init_tracing, AlertBus};
pub use crate::lifecycle::{
    PhaseExecutor, PhaseSpec, StartupConfig, StartupInstance, StartupLifecycleManager, StartupState,
};
pub use crate::providers::{ProviderAdapter, ProviderHealthMonitor};
pub use crate::queue::{QueueProcessor, Task, TaskOutcome, TaskStatus};
pub use crate::resources::{ResourceAllocation, ResourcePool, ResourceRequirements};
pub use crate::store::{BudgetJournal, StateStore};
