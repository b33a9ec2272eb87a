/*!
 * Phase Executor Seam
 * External template/codegen collaborator invoked at phase boundaries
 */

use super::types::StartupConfig;
use crate::core::errors::OrchestratorError;
use crate::core::types::TenantId;
use async_trait::async_trait;

/// Builds the task payload for a startup phase
///
/// Implemented outside the core (template rendering, code generation). The
/// orchestrator treats it as a black box returning payloads to enqueue.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    async fn build_payload(
        &self,
        tenant: TenantId,
        phase_index: usize,
        config: &StartupConfig,
    ) -> Result<serde_json::Value, OrchestratorError>;
}

/// Pass-through executor: the phase spec itself is the payload
///
/// Useful for tests and for callers whose providers interpret phase kinds
/// directly.
pub struct IdentityPhaseExecutor;

#[async_trait]
impl PhaseExecutor for IdentityPhaseExecutor {
    async fn build_payload(
        &self,
        tenant: TenantId,
        phase_index: usize,
        config: &StartupConfig,
    ) -> Result<serde_json::Value, OrchestratorError> {
        let phase = config.phases.get(phase_index).ok_or_else(|| {
            OrchestratorError::ConfigInvalid(format!("phase {} out of range", phase_index))
        })?;
        Ok(serde_json::json!({
            "tenant": tenant,
            "phase": phase_index,
            "name": phase.name,
            "kind": phase.kind,
        }))
    }
}
