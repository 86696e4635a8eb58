//! Resource usage accounting.
//!
//! Snapshots are point-in-time measurements; `ResourceUsage` is the
//! cumulative delta against a baseline captured at sandbox
//! initialization. Raw measurements jitter (allocator reuse, sampling
//! skew), so every delta saturates at zero instead of going negative.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time measurement of one plugin's footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub memory_bytes: u64,
    pub cpu_percent: u32,
    pub thread_count: u32,
    pub handle_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl ResourceSnapshot {
    pub fn now(memory_bytes: u64, cpu_percent: u32, thread_count: u32, handle_count: u32) -> Self {
        Self {
            memory_bytes,
            cpu_percent,
            thread_count,
            handle_count,
            timestamp: Utc::now(),
        }
    }
}

/// Cumulative usage of a sandbox or operation relative to its baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory_used_bytes: u64,
    pub cpu_time_ms: u64,
    pub threads_created: u32,
    pub execution_time_ms: u64,
}

impl ResourceUsage {
    /// Delta of `current` against `baseline`, saturating at zero.
    pub fn delta(baseline: &ResourceSnapshot, current: &ResourceSnapshot) -> Self {
        let elapsed = (current.timestamp - baseline.timestamp)
            .num_milliseconds()
            .max(0) as u64;
        Self {
            memory_used_bytes: current.memory_bytes.saturating_sub(baseline.memory_bytes),
            cpu_time_ms: elapsed.saturating_mul(u64::from(current.cpu_percent)) / 100,
            threads_created: current.thread_count.saturating_sub(baseline.thread_count),
            execution_time_ms: elapsed,
        }
    }

    /// Component-wise accumulation of per-operation usage.
    pub fn accumulate(&mut self, other: &ResourceUsage) {
        self.memory_used_bytes = self.memory_used_bytes.max(other.memory_used_bytes);
        self.cpu_time_ms = self.cpu_time_ms.saturating_add(other.cpu_time_ms);
        self.threads_created = self.threads_created.max(other.threads_created);
        self.execution_time_ms = self.execution_time_ms.saturating_add(other.execution_time_ms);
    }
}

/// Usage of an external OS process, as reported by a
/// process resource controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessUsage {
    pub memory_bytes: u64,
    pub virtual_memory_bytes: u64,
    pub cpu_time_ms: u64,
    pub thread_count: u32,
    pub handle_count: u32,
}
