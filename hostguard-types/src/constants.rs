//! Tuning constants for caches, policies, monitoring, and coordination.

use std::time::Duration;

// ====================================================================
// Caching
// ====================================================================

/// How long a cached permission-check result stays valid.
pub const PERMISSION_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// How long a cached policy stays valid. Policies change less often
/// than individual permission outcomes, so this is the longer TTL.
pub const POLICY_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

/// Hard cap on permission cache entries before LRU eviction kicks in.
pub const MAX_CACHE_ENTRIES: usize = 1000;

/// Interval between background sweeps of expired cache entries.
pub const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(2 * 60);

// ====================================================================
// Memory ceilings
// ====================================================================

pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 256 * 1024 * 1024;
pub const RESTRICTIVE_MAX_MEMORY_BYTES: u64 = 64 * 1024 * 1024;
pub const PERMISSIVE_MAX_MEMORY_BYTES: u64 = 1024 * 1024 * 1024;
pub const MIN_MEMORY_BYTES: u64 = 1024 * 1024;

// ====================================================================
// CPU ceilings
// ====================================================================

pub const DEFAULT_MAX_CPU_PERCENT: u32 = 25;
pub const RESTRICTIVE_MAX_CPU_PERCENT: u32 = 10;
pub const PERMISSIVE_MAX_CPU_PERCENT: u32 = 50;

/// Fraction of the CPU ceiling at which a warning is raised.
pub const CPU_WARNING_THRESHOLD: f64 = 0.7;

/// Fraction of the memory ceiling at which a warning is raised.
pub const MEMORY_WARNING_THRESHOLD: f64 = 0.8;

// ====================================================================
// Thread ceilings
// ====================================================================

pub const DEFAULT_MAX_THREADS: u32 = 10;
pub const RESTRICTIVE_MAX_THREADS: u32 = 5;
pub const PERMISSIVE_MAX_THREADS: u32 = 20;

// ====================================================================
// Execution time ceilings
// ====================================================================

pub const DEFAULT_MAX_EXECUTION_SECS: u64 = 300;
pub const RESTRICTIVE_MAX_EXECUTION_SECS: u64 = 60;
pub const PERMISSIVE_MAX_EXECUTION_SECS: u64 = 600;

// ====================================================================
// Coordination
// ====================================================================

/// Ceiling on waiting for a coordinated (shared) operation slot.
pub const COORDINATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Ceiling on waiting for exclusive access to global configuration.
pub const EXCLUSIVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval between sweeps of stale plugin state entries.
pub const STATE_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Stopped entries older than this are removed by the sweep.
pub const STALE_STOPPED_AGE: Duration = Duration::from_secs(30 * 60);

// ====================================================================
// Monitoring
// ====================================================================

pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 5000;

/// Container sandboxes cannot sample faster than this.
pub const CONTAINER_MIN_CHECK_INTERVAL_MS: u64 = 2000;

/// Smallest interval any monitoring policy may configure.
pub const MIN_CHECK_INTERVAL_MS: u64 = 100;

/// Rolling window of usage snapshots kept per plugin.
pub const SNAPSHOT_WINDOW: usize = 60;

/// Resource-usage cache windows for the optimizing decorator.
pub const RESOURCE_CACHE_SHORT: Duration = Duration::from_secs(10);
pub const RESOURCE_CACHE_MEDIUM: Duration = Duration::from_secs(30);
pub const RESOURCE_CACHE_LONG: Duration = Duration::from_secs(60);

/// Minimum monitoring intervals imposed by the optimizing decorator.
pub const HIGH_THROUGHPUT_MIN_INTERVAL_MS: u64 = 10_000;
pub const LOW_LATENCY_MIN_INTERVAL_MS: u64 = 30_000;

// ====================================================================
// File system policy
// ====================================================================

pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_MAX_TOTAL_FILES: u32 = 1000;

// ====================================================================
// Network policy
// ====================================================================

pub const DEFAULT_ALLOWED_PORTS: [u16; 6] = [80, 443, 10332, 10333, 20332, 20333];
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

// ====================================================================
// Audit log
// ====================================================================

pub const MAX_AUDIT_EVENTS: usize = 10_000;

/// Oldest events are dropped in batches of this size when full.
pub const AUDIT_DROP_BATCH: usize = MAX_AUDIT_EVENTS / 10;

/// Returns the coordinated-operation permit count for this host.
pub fn max_concurrent_operations() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        * 2
}
