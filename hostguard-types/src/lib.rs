//! Core type definitions shared across the hostguard workspace.
//!
//! Everything here is plain data: the permission bitmask, the security
//! policy model, plugin state, resource usage accounting, audit events,
//! and the shared error enum. Behavior lives in the sibling crates.

pub mod constants;
mod error;
mod event;
mod permissions;
mod policy;
mod state;
mod usage;

pub use error::SecurityError;
pub use event::{SecurityEvent, SecurityEventType, Severity};
pub use permissions::PluginPermissions;
pub use policy::{
    FileSystemPolicy, MonitoringPolicy, NetworkPolicy, SandboxKind, SecurityPolicy,
    ViolationAction,
};
pub use state::{PluginState, PluginStatus, SecurityMode};
pub use usage::{ProcessUsage, ResourceSnapshot, ResourceUsage};
