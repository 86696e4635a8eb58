//! Performance-optimizing decorator.
//!
//! Wraps any strategy to cut monitoring overhead: resource-usage reads
//! are served from a short-lived cache, the effective monitoring
//! interval gets a profile-dependent floor, and rolling execution-time
//! statistics are recorded per sandbox. Security outcomes of the
//! wrapped strategy are never altered.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;

use hostguard_types::constants::{
    HIGH_THROUGHPUT_MIN_INTERVAL_MS, LOW_LATENCY_MIN_INTERVAL_MS, RESOURCE_CACHE_LONG,
    RESOURCE_CACHE_MEDIUM, RESOURCE_CACHE_SHORT,
};
use hostguard_types::{PluginPermissions, ResourceUsage, SecurityError, SecurityPolicy};

use crate::sandbox::{PluginSandbox, SandboxAction, SandboxResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PerformanceProfile {
    /// Many short calls; cache aggressively, sample rarely.
    HighThroughput,
    /// Latency-sensitive host; keep monitoring out of the hot path.
    LowLatency,
    #[default]
    Balanced,
}

impl PerformanceProfile {
    fn usage_cache_window(self) -> Duration {
        match self {
            Self::HighThroughput => RESOURCE_CACHE_MEDIUM,
            Self::LowLatency => RESOURCE_CACHE_LONG,
            Self::Balanced => RESOURCE_CACHE_SHORT,
        }
    }

    fn interval_floor_ms(self) -> u64 {
        match self {
            Self::HighThroughput => HIGH_THROUGHPUT_MIN_INTERVAL_MS,
            Self::LowLatency => LOW_LATENCY_MIN_INTERVAL_MS,
            Self::Balanced => 0,
        }
    }
}

/// Rolling execution-time statistics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ExecutionStats {
    pub executions: u64,
    pub total_ms: u64,
    pub max_ms: u64,
}

impl ExecutionStats {
    pub fn mean_ms(&self) -> u64 {
        if self.executions == 0 {
            0
        } else {
            self.total_ms / self.executions
        }
    }
}

pub struct OptimizedSandbox {
    inner: Box<dyn PluginSandbox>,
    profile: PerformanceProfile,
    cached_usage: Mutex<Option<(Instant, ResourceUsage)>>,
    stats: Mutex<ExecutionStats>,
}

impl OptimizedSandbox {
    pub fn new(inner: Box<dyn PluginSandbox>, profile: PerformanceProfile) -> Self {
        Self {
            inner,
            profile,
            cached_usage: Mutex::new(None),
            stats: Mutex::new(ExecutionStats::default()),
        }
    }

    pub fn profile(&self) -> PerformanceProfile {
        self.profile
    }

    /// The monitoring interval the monitor should actually use: the
    /// policy's interval raised to the profile's floor.
    pub fn effective_check_interval_ms(&self, policy_interval_ms: u64) -> u64 {
        policy_interval_ms.max(self.profile.interval_floor_ms())
    }

    pub fn execution_stats(&self) -> ExecutionStats {
        *self.stats.lock().expect("stats lock poisoned")
    }

    fn record_execution(&self, duration_ms: u64) {
        let mut stats = self.stats.lock().expect("stats lock poisoned");
        stats.executions += 1;
        stats.total_ms += duration_ms;
        stats.max_ms = stats.max_ms.max(duration_ms);
    }

    fn invalidate_usage_cache(&self) {
        *self.cached_usage.lock().expect("usage cache poisoned") = None;
    }
}

#[async_trait]
impl PluginSandbox for OptimizedSandbox {
    async fn initialize(&self, policy: &SecurityPolicy) -> Result<(), SecurityError> {
        self.inner.initialize(policy).await
    }

    async fn execute(&self, action: SandboxAction) -> SandboxResult {
        let result = self.inner.execute(action).await;
        self.record_execution(result.duration_ms);
        self.invalidate_usage_cache();
        result
    }

    fn validate_permission(&self, permission: PluginPermissions) -> bool {
        // Never cached: security answers always come from the delegate.
        self.inner.validate_permission(permission)
    }

    fn resource_usage(&self) -> ResourceUsage {
        let window = self.profile.usage_cache_window();
        let mut cached = self.cached_usage.lock().expect("usage cache poisoned");
        if let Some((at, usage)) = *cached {
            if at.elapsed() < window {
                return usage;
            }
        }
        let fresh = self.inner.resource_usage();
        *cached = Some((Instant::now(), fresh));
        fresh
    }

    async fn suspend(&self) -> Result<(), SecurityError> {
        self.inner.suspend().await
    }

    async fn resume(&self) -> Result<(), SecurityError> {
        self.inner.resume().await
    }

    async fn terminate(&self) -> Result<(), SecurityError> {
        self.invalidate_usage_cache();
        self.inner.terminate().await
    }

    async fn teardown(&self) {
        self.invalidate_usage_cache();
        self.inner.teardown().await;
    }

    fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn plugin_name(&self) -> &str {
        self.inner.plugin_name()
    }

    fn strategy_name(&self) -> &'static str {
        "optimized"
    }
}
