//! Bounded ring buffer of security events with fan-out and statistics.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;

use hostguard_types::constants::{AUDIT_DROP_BATCH, MAX_AUDIT_EVENTS};
use hostguard_types::{SecurityEvent, SecurityEventType, Severity};

use crate::sink::AuditSink;

/// Running counters for one event type.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EventTypeStats {
    pub count: u64,
    pub last_occurrence: DateTime<Utc>,
}

/// Snapshot of the log's overall counters.
#[derive(Debug, Clone, Serialize)]
pub struct AuditStatistics {
    pub total_recorded: u64,
    pub buffered: usize,
    pub dropped: u64,
    pub by_type: HashMap<SecurityEventType, EventTypeStats>,
}

struct Buffer {
    events: VecDeque<SecurityEvent>,
    by_type: HashMap<SecurityEventType, EventTypeStats>,
    total_recorded: u64,
    dropped: u64,
}

/// Append-only audit log. Oldest entries are dropped in batches once
/// the buffer is full. Constructed explicitly and shared by `Arc`.
pub struct AuditLog {
    buffer: Mutex<Buffer>,
    sinks: RwLock<Vec<Arc<dyn AuditSink>>>,
    capacity: usize,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(MAX_AUDIT_EVENTS)
    }
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(Buffer {
                events: VecDeque::with_capacity(capacity.min(1024)),
                by_type: HashMap::new(),
                total_recorded: 0,
                dropped: 0,
            }),
            sinks: RwLock::new(Vec::new()),
            capacity,
        }
    }

    pub fn add_sink(&self, sink: Arc<dyn AuditSink>) {
        self.sinks.write().expect("sink lock poisoned").push(sink);
    }

    /// Records one event: buffer append, statistics update, sink
    /// fan-out. Sink failures are logged and swallowed.
    pub async fn record(&self, event: SecurityEvent) {
        {
            let mut buffer = self.buffer.lock().expect("audit buffer poisoned");
            if buffer.events.len() >= self.capacity {
                let batch = AUDIT_DROP_BATCH.min(buffer.events.len());
                buffer.events.drain(..batch);
                buffer.dropped += batch as u64;
            }
            buffer.total_recorded += 1;
            let stats = buffer
                .by_type
                .entry(event.event_type)
                .or_insert(EventTypeStats {
                    count: 0,
                    last_occurrence: event.timestamp,
                });
            stats.count += 1;
            stats.last_occurrence = event.timestamp;
            buffer.events.push_back(event.clone());
        }

        let sinks: Vec<Arc<dyn AuditSink>> = self
            .sinks
            .read()
            .expect("sink lock poisoned")
            .iter()
            .cloned()
            .collect();
        for sink in sinks {
            if let Err(err) = sink.write(&event).await {
                warn!(sink = sink.name(), error = %err, "audit sink write failed");
            }
        }
    }

    /// Most recent `n` events, newest last.
    pub fn recent(&self, n: usize) -> Vec<SecurityEvent> {
        let buffer = self.buffer.lock().expect("audit buffer poisoned");
        let skip = buffer.events.len().saturating_sub(n);
        buffer.events.iter().skip(skip).cloned().collect()
    }

    pub fn by_plugin(&self, plugin: &str) -> Vec<SecurityEvent> {
        let buffer = self.buffer.lock().expect("audit buffer poisoned");
        buffer
            .events
            .iter()
            .filter(|e| e.plugin_name == plugin)
            .cloned()
            .collect()
    }

    pub fn by_type(&self, event_type: SecurityEventType) -> Vec<SecurityEvent> {
        let buffer = self.buffer.lock().expect("audit buffer poisoned");
        buffer
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn in_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<SecurityEvent> {
        let buffer = self.buffer.lock().expect("audit buffer poisoned");
        buffer
            .events
            .iter()
            .filter(|e| e.timestamp >= from && e.timestamp <= to)
            .cloned()
            .collect()
    }

    /// True when the plugin has a Critical event within the last hour.
    /// Scans newest-first so the common negative case stays cheap.
    pub fn has_recent_critical(&self, plugin: &str) -> bool {
        let cutoff = Utc::now() - Duration::hours(1);
        let buffer = self.buffer.lock().expect("audit buffer poisoned");
        buffer
            .events
            .iter()
            .rev()
            .take_while(|e| e.timestamp >= cutoff)
            .any(|e| e.severity == Severity::Critical && e.plugin_name == plugin)
    }

    pub fn statistics(&self) -> AuditStatistics {
        let buffer = self.buffer.lock().expect("audit buffer poisoned");
        AuditStatistics {
            total_recorded: buffer.total_recorded,
            buffered: buffer.events.len(),
            dropped: buffer.dropped,
            by_type: buffer.by_type.clone(),
        }
    }
}
