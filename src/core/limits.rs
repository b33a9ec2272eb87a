/*!
 * Orchestrator Limits and Constants
 *
 * Centralized location for all system-wide limits, thresholds, and magic numbers.
 * Organized by domain for maintainability and discoverability.
 */

use std::ops::Range;
use std::time::Duration;

// =============================================================================
// ADMISSION LIMITS
// =============================================================================

/// Maximum startups admitted concurrently
/// Admission beyond this fails fast with ConcurrencyLimit (no implicit queueing)
pub const DEFAULT_MAX_CONCURRENT_STARTUPS: usize = 5;

/// Maximum tasks dispatched in parallel across all tenants
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 10;

// =============================================================================
// RESOURCE POOL
// =============================================================================

/// Default port range handed out to tenant workloads
/// High ephemeral-adjacent range to avoid well-known services
pub const DEFAULT_PORT_RANGE: Range<u16> = 30000..30100;

/// Total pool memory available for tenant allocations (MB)
pub const DEFAULT_POOL_MEMORY_MB: u64 = 16 * 1024;

/// Total pool CPU cores available for tenant allocations
pub const DEFAULT_POOL_CPU_CORES: u32 = 32;

/// Total pool storage available for tenant workspaces (GB)
pub const DEFAULT_POOL_STORAGE_GB: u64 = 512;

/// Attempts within the bounded allocation retry window
/// Allocation fails fast rather than queueing; a short window absorbs
/// release/allocate races without making admission unpredictable
pub const ALLOC_RETRY_ATTEMPTS: u32 = 3;

/// Delay between allocation retry attempts
pub const ALLOC_RETRY_DELAY: Duration = Duration::from_millis(50);

// =============================================================================
// PROVIDER HEALTH
// =============================================================================

/// Interval between health probe sweeps
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// Per-probe timeout; a probe that exceeds this counts as a failure
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive failures before a provider is classified Warning
pub const DEFAULT_WARN_THRESHOLD: u32 = 2;

/// Consecutive failures before a provider is classified Critical
/// Critical providers are excluded from selection until a probe succeeds
pub const DEFAULT_CRITICAL_THRESHOLD: u32 = 3;

/// EWMA smoothing factor for latency and success rate (0..1, higher = more reactive)
pub const DEFAULT_EWMA_ALPHA: f64 = 0.3;

/// Latency assumed for a provider that has never been probed (ms)
pub const INITIAL_LATENCY_MS: f64 = 500.0;

// =============================================================================
// TASK QUEUE
// =============================================================================

/// Per-attempt provider invocation timeout
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(120);

/// Base delay for exponential retry backoff (base * 2^attempt)
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(1);

/// Cap on a single backoff delay
pub const DEFAULT_RETRY_CAP: Duration = Duration::from_secs(30);

/// Default retry budget for a task when the config does not override it
pub const DEFAULT_MAX_RETRIES: u32 = 3;

// =============================================================================
// BUDGET
// =============================================================================

/// Fraction of a tier limit that triggers a threshold alert
pub const DEFAULT_ALERT_FRACTION: f64 = 0.8;
