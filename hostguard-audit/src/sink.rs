//! Pluggable audit sinks.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use hostguard_types::{SecurityError, SecurityEvent, Severity};

/// Accepts one event, best-effort. Failures are reported to the caller
/// so they can be logged, but the audit call itself never aborts.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, event: &SecurityEvent) -> Result<(), SecurityError>;

    /// Identifies the sink in failure logs.
    fn name(&self) -> &str;
}

/// Appends events as JSON lines to a file.
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AuditSink for FileSink {
    async fn write(&self, event: &SecurityEvent) -> Result<(), SecurityError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Forwards events to `tracing` at a severity-mapped level.
pub struct TracingSink;

#[async_trait]
impl AuditSink for TracingSink {
    async fn write(&self, event: &SecurityEvent) -> Result<(), SecurityError> {
        match event.severity {
            Severity::Critical => error!(
                plugin = %event.plugin_name,
                event_type = ?event.event_type,
                "{}",
                event.message
            ),
            Severity::High => warn!(
                plugin = %event.plugin_name,
                event_type = ?event.event_type,
                "{}",
                event.message
            ),
            Severity::Medium => info!(
                plugin = %event.plugin_name,
                event_type = ?event.event_type,
                "{}",
                event.message
            ),
            Severity::Low => debug!(
                plugin = %event.plugin_name,
                event_type = ?event.event_type,
                "{}",
                event.message
            ),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}
