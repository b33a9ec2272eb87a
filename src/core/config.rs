/*!
 * Orchestrator Configuration
 * Explicit per-component config, constructed and passed down (no globals)
 */

use crate::core::limits;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::PathBuf;
use std::time::Duration;

/// Resource pool capacity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PoolConfig {
    /// Fixed numeric range ports are drawn from
    pub port_range: Range<u16>,
    pub memory_mb: u64,
    pub cpu_cores: u32,
    pub storage_gb: u64,
    /// Root under which per-tenant workspace directories are created
    pub workspace_root: PathBuf,
    /// Bounded retry window for allocation (attempts * delay)
    pub alloc_retry_attempts: u32,
    pub alloc_retry_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            port_range: limits::DEFAULT_PORT_RANGE,
            memory_mb: limits::DEFAULT_POOL_MEMORY_MB,
            cpu_cores: limits::DEFAULT_POOL_CPU_CORES,
            storage_gb: limits::DEFAULT_POOL_STORAGE_GB,
            workspace_root: std::env::temp_dir().join("foundry-workspaces"),
            alloc_retry_attempts: limits::ALLOC_RETRY_ATTEMPTS,
            alloc_retry_delay: limits::ALLOC_RETRY_DELAY,
        }
    }
}

/// Provider health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthConfig {
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub warn_threshold: u32,
    pub critical_threshold: u32,
    pub ewma_alpha: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval: limits::DEFAULT_PROBE_INTERVAL,
            probe_timeout: limits::DEFAULT_PROBE_TIMEOUT,
            warn_threshold: limits::DEFAULT_WARN_THRESHOLD,
            critical_threshold: limits::DEFAULT_CRITICAL_THRESHOLD,
            ewma_alpha: limits::DEFAULT_EWMA_ALPHA,
        }
    }
}

/// Task queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QueueConfig {
    pub max_concurrent_tasks: usize,
    pub task_timeout: Duration,
    pub retry_base: Duration,
    pub retry_cap: Duration,
    pub default_max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: limits::DEFAULT_MAX_CONCURRENT_TASKS,
            task_timeout: limits::DEFAULT_TASK_TIMEOUT,
            retry_base: limits::DEFAULT_RETRY_BASE,
            retry_cap: limits::DEFAULT_RETRY_CAP,
            default_max_retries: limits::DEFAULT_MAX_RETRIES,
        }
    }
}

/// Budget monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BudgetConfig {
    /// Fraction of a tier limit that triggers a threshold alert
    pub alert_fraction: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            alert_fraction: limits::DEFAULT_ALERT_FRACTION,
        }
    }
}

/// Top-level orchestrator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    pub max_concurrent_startups: Option<usize>,
    pub pool: PoolConfig,
    pub health: HealthConfig,
    pub queue: QueueConfig,
    pub budget: BudgetConfig,
}

impl OrchestratorConfig {
    /// Admission ceiling, falling back to the built-in default
    #[inline]
    #[must_use]
    pub fn max_concurrent_startups(&self) -> usize {
        self.max_concurrent_startups
            .unwrap_or(limits::DEFAULT_MAX_CONCURRENT_STARTUPS)
    }

    #[inline]
    #[must_use]
    pub fn with_max_startups(mut self, limit: usize) -> Self {
        self.max_concurrent_startups = Some(limit);
        self
    }
}
