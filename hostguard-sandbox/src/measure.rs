//! Best-effort process self-measurement.
//!
//! Reads `/proc/self` where available and degrades to zeroed samples
//! elsewhere. Callers must treat every field as an estimate; deltas
//! against a baseline are clamped at zero downstream.

use hostguard_types::ResourceSnapshot;

/// Samples the current process footprint.
pub fn current_snapshot() -> ResourceSnapshot {
    let (memory_bytes, thread_count) = proc_self_sample().unwrap_or((0, 0));
    ResourceSnapshot::now(memory_bytes, 0, thread_count, 0)
}

#[cfg(target_os = "linux")]
fn proc_self_sample() -> Option<(u64, u32)> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = 4096;

    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let threads: u32 = status
        .lines()
        .find(|l| l.starts_with("Threads:"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);

    Some((resident_pages * page_size, threads))
}

#[cfg(not(target_os = "linux"))]
fn proc_self_sample() -> Option<(u64, u32)> {
    None
}
