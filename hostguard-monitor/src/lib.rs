//! Event-driven resource monitoring.
//!
//! Producers push usage snapshots and operation start/end events onto
//! an unbounded queue; a single consumer task drains it, evaluates
//! registered plugins against their policy ceilings, and dispatches
//! violations through a [`ViolationResponder`]. The single consumer is
//! what guarantees per-plugin ordering.

mod monitor;
mod responder;

pub use monitor::{MonitorNotice, MonitorStats, ResourceMonitor};
pub use responder::{NoopResponder, ViolationResponder};
