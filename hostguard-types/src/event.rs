//! Audit event schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::current_thread_label;

/// Category of a recorded security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    PermissionRequest,
    PermissionDenied,
    ResourceViolation,
    ResourceWarning,
    SandboxOperation,
    ConfigurationChange,
    FileAccess,
    NetworkAccess,
    SecurityViolation,
    PluginLoad,
    PluginUnload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One audit record. Append-only; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: SecurityEventType,
    pub plugin_name: String,
    pub message: String,
    pub details: serde_json::Value,
    pub severity: Severity,
    pub thread: String,
}

impl SecurityEvent {
    pub fn new(
        event_type: SecurityEventType,
        plugin_name: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            plugin_name: plugin_name.into(),
            message: message.into(),
            details: serde_json::Value::Null,
            severity,
            thread: current_thread_label(),
        }
    }

    /// Attaches structured details to the event.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}
