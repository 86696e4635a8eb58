//! Error types shared across the hostguard crates.

use thiserror::Error;

use crate::permissions::PluginPermissions;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("policy validation failed: {}", .0.join("; "))]
    PolicyValidation(Vec<String>),

    #[error("sandbox not active for plugin '{0}'")]
    SandboxNotActive(String),

    #[error("sandbox suspended for plugin '{0}'")]
    SandboxSuspended(String),

    #[error("sandbox already initialized for plugin '{0}'")]
    AlreadyInitialized(String),

    #[error("timeout: plugin '{plugin}' exceeded {timeout_ms}ms execution ceiling")]
    Timeout { plugin: String, timeout_ms: u64 },

    #[error("permission denied: plugin '{plugin}' lacks {permission:?}")]
    PermissionDenied {
        plugin: String,
        permission: PluginPermissions,
    },

    #[error("path not permitted: {0}")]
    PathNotPermitted(String),

    #[error("endpoint not permitted: {0}")]
    EndpointNotPermitted(String),

    #[error("module not permitted: {0}")]
    ModuleNotPermitted(String),

    #[error("coordination timeout after {0}ms")]
    CoordinationTimeout(u64),

    #[error("unsupported on this host: {0}")]
    Unsupported(String),

    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("sandbox already exists for plugin '{0}'")]
    SandboxAlreadyExists(String),

    #[error("security initialization did not complete within {0}ms")]
    InitializationTimeout(u64),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SecurityError {
    /// Operational errors travel inside a failed `SandboxResult` and are
    /// cloned into audit details, so a cheap textual clone is enough.
    pub fn duplicate(&self) -> SecurityError {
        match self {
            SecurityError::PolicyValidation(errors) => {
                SecurityError::PolicyValidation(errors.clone())
            }
            SecurityError::SandboxNotActive(p) => SecurityError::SandboxNotActive(p.clone()),
            SecurityError::SandboxSuspended(p) => SecurityError::SandboxSuspended(p.clone()),
            SecurityError::AlreadyInitialized(p) => SecurityError::AlreadyInitialized(p.clone()),
            SecurityError::Timeout { plugin, timeout_ms } => SecurityError::Timeout {
                plugin: plugin.clone(),
                timeout_ms: *timeout_ms,
            },
            SecurityError::PermissionDenied { plugin, permission } => {
                SecurityError::PermissionDenied {
                    plugin: plugin.clone(),
                    permission: *permission,
                }
            }
            SecurityError::PathNotPermitted(p) => SecurityError::PathNotPermitted(p.clone()),
            SecurityError::EndpointNotPermitted(e) => {
                SecurityError::EndpointNotPermitted(e.clone())
            }
            SecurityError::ModuleNotPermitted(m) => SecurityError::ModuleNotPermitted(m.clone()),
            SecurityError::CoordinationTimeout(ms) => SecurityError::CoordinationTimeout(*ms),
            SecurityError::Unsupported(s) => SecurityError::Unsupported(s.clone()),
            SecurityError::PluginNotFound(p) => SecurityError::PluginNotFound(p.clone()),
            SecurityError::SandboxAlreadyExists(p) => {
                SecurityError::SandboxAlreadyExists(p.clone())
            }
            SecurityError::InitializationTimeout(ms) => {
                SecurityError::InitializationTimeout(*ms)
            }
            SecurityError::Config(s) => SecurityError::Config(s.clone()),
            other => SecurityError::Config(other.to_string()),
        }
    }

    /// True for errors that signal an execution deadline breach.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SecurityError::Timeout { .. }
                | SecurityError::CoordinationTimeout(_)
                | SecurityError::InitializationTimeout(_)
        )
    }
}
