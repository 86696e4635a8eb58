//! Append-only audit log for plugin security events.
//!
//! Events land in a bounded in-memory ring buffer and fan out to any
//! number of pluggable sinks. Sink failures are logged and swallowed;
//! recording an event never fails.

mod log;
mod sink;

pub use log::{AuditLog, AuditStatistics, EventTypeStats};
pub use sink::{AuditSink, FileSink, TracingSink};
