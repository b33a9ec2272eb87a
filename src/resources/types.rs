/*!
 * Resource Types
 * Requirements, allocations, and pool snapshots
 */

use crate::core::types::TenantId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use time::OffsetDateTime;

/// Resource requirements for one tenant workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ResourceRequirements {
    pub ports: usize,
    pub memory_mb: u64,
    pub cpu_cores: u32,
    pub storage_gb: u64,
}

impl ResourceRequirements {
    #[inline]
    #[must_use]
    pub const fn new(ports: usize, memory_mb: u64, cpu_cores: u32, storage_gb: u64) -> Self {
        Self {
            ports,
            memory_mb,
            cpu_cores,
            storage_gb,
        }
    }

    /// A request for nothing is a config bug, caught during validation
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.ports == 0 && self.memory_mb == 0 && self.cpu_cores == 0 && self.storage_gb == 0
    }
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self::new(1, 512, 1, 4)
    }
}

/// Resources exclusively held by one tenant while live
///
/// The union of `ports` across all live allocations is disjoint; the sum of
/// `memory_mb` never exceeds pool capacity. Both are enforced by the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ResourceAllocation {
    pub tenant_id: TenantId,
    pub ports: BTreeSet<u16>,
    pub memory_mb: u64,
    pub cpu_cores: u32,
    pub storage_gb: u64,
    /// Unique logical namespace, doubles as the workspace directory name
    pub namespace: String,
    pub workspace_dir: PathBuf,
    #[serde(with = "time::serde::rfc3339")]
    pub allocated_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl ResourceAllocation {
    /// Whether the allocation's lease has lapsed
    #[inline]
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.map_or(false, |deadline| now >= deadline)
    }
}
