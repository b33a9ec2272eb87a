/*!
 * Provider Adapter Contract
 * Fixed capability set every AI provider implementation satisfies
 */

use super::types::{InvocationResult, ProbeReport, TaskInvocation};
use crate::core::errors::ProviderError;
use crate::core::types::CostCents;
use async_trait::async_trait;

/// External provider implementation executing tasks on behalf of the core
///
/// The orchestrator is agnostic to how a provider performs its work; it only
/// relies on this contract for execution, health probing, and cost estimates.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable provider identifier, used for registration and tie-breaking
    fn id(&self) -> &str;

    /// Execute a task; transient errors are retried, fatal errors are not
    async fn execute(&self, invocation: TaskInvocation) -> Result<InvocationResult, ProviderError>;

    /// Lightweight health-check call
    async fn health_probe(&self) -> Result<ProbeReport, ProviderError>;

    /// Estimated cost of executing `invocation`, in cents
    fn estimate_cost(&self, invocation: &TaskInvocation) -> CostCents;
}
