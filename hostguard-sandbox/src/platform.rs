//! One-time host capability detection.
//!
//! Detected once at startup and passed around as plain data; no code
//! path gates on runtime version checks afterward.

use serde::Serialize;

/// What the host can do, captured at startup.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformInfo {
    /// `std::env::consts::OS` value ("linux", "macos", "windows", ...).
    pub os: &'static str,
    /// Cgroup hierarchy present, so container-style limits can work.
    pub container_capable: bool,
    /// The host can create unloadable module-loading contexts.
    pub loader_isolation: bool,
    /// Spawning resource-limited child processes is plausible here.
    pub process_capable: bool,
    pub core_count: usize,
}

impl PlatformInfo {
    /// Probes the host. Call once at startup and share the result.
    pub fn detect() -> Self {
        let os = std::env::consts::OS;
        let container_capable = os == "linux" && std::path::Path::new("/sys/fs/cgroup").exists();
        Self {
            os,
            container_capable,
            loader_isolation: true,
            process_capable: matches!(os, "linux" | "macos" | "windows"),
            core_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }

    /// Fixed capabilities for deterministic tests.
    pub fn fixed(
        os: &'static str,
        container_capable: bool,
        loader_isolation: bool,
        process_capable: bool,
    ) -> Self {
        Self {
            os,
            container_capable,
            loader_isolation,
            process_capable,
            core_count: 4,
        }
    }

    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    pub fn is_unix_like(&self) -> bool {
        matches!(self.os, "linux" | "macos" | "freebsd" | "openbsd" | "netbsd")
    }
}
