//! Plugin lifecycle state and global security mode.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of one plugin.
///
/// Unknown → Loading → Running ⇄ Suspended → Stopped, with Error
/// reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    #[default]
    Unknown,
    Loading,
    Running,
    Suspended,
    Stopped,
    Error,
}

/// Global security posture applied across all plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    Disabled,
    Permissive,
    #[default]
    Default,
    Strict,
}

/// One entry per active plugin, guarded by a per-entry lock in the
/// coordinator. Created on first reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginState {
    pub plugin_name: String,
    pub status: PluginStatus,
    pub last_updated: DateTime<Utc>,
    /// Label of the thread that last touched this entry.
    pub owning_thread: String,
    /// Free-form extension data attached by components.
    pub extensions: HashMap<String, serde_json::Value>,
}

impl PluginState {
    pub fn new(plugin_name: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            status: PluginStatus::Unknown,
            last_updated: Utc::now(),
            owning_thread: current_thread_label(),
            extensions: HashMap::new(),
        }
    }

    /// Applies a status transition and refreshes bookkeeping fields.
    pub fn set_status(&mut self, status: PluginStatus) {
        self.status = status;
        self.last_updated = Utc::now();
        self.owning_thread = current_thread_label();
    }

    /// Seconds since this entry last changed.
    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.last_updated).num_seconds()
    }
}

pub(crate) fn current_thread_label() -> String {
    let thread = std::thread::current();
    thread
        .name()
        .map(str::to_owned)
        .unwrap_or_else(|| format!("{:?}", thread.id()))
}
