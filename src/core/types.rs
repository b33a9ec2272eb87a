/*!
 * Core Types
 * Common types used across the orchestrator
 */

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant (startup instance) identifier
pub type TenantId = Uuid;

/// Queued task identifier
pub type TaskId = Uuid;

/// Provider identifier (stable, human-readable)
pub type ProviderId = String;

/// Task priority (lower value = more urgent)
pub type Priority = u8;

/// Monetary cost in integer cents
pub type CostCents = u64;

/// Common result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, super::errors::OrchestratorError>;

/// Point-in-time snapshot of pool-wide capacity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CapacitySnapshot {
    pub free_ports: usize,
    pub free_memory_mb: u64,
    pub free_cpu_cores: u32,
    pub free_storage_gb: u64,
    pub live_allocations: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_ids_are_unique() {
        let a = TenantId::new_v4();
        let b = TenantId::new_v4();
        assert_ne!(a, b);
    }
}
