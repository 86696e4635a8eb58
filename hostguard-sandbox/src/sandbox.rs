//! The sandbox contract shared by every isolation strategy.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use hostguard_types::{PluginPermissions, ResourceUsage, SecurityError, SecurityPolicy};

type ActionFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, SecurityError>> + Send>>;

/// One unit of plugin work submitted to a sandbox.
pub struct SandboxAction {
    name: String,
    work: ActionFuture,
}

impl SandboxAction {
    pub fn new<F>(name: impl Into<String>, work: F) -> Self
    where
        F: Future<Output = Result<serde_json::Value, SecurityError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            work: Box::pin(work),
        }
    }

    /// Wraps a synchronous closure. The closure runs on the blocking
    /// pool so a slow action cannot stall the runtime.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Result<serde_json::Value, SecurityError> + Send + 'static,
    {
        Self {
            name: name.into(),
            work: Box::pin(async move {
                tokio::task::spawn_blocking(f)
                    .await
                    .map_err(|e| SecurityError::Config(format!("action panicked: {e}")))?
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (String, ActionFuture) {
        (self.name, self.work)
    }
}

impl std::fmt::Debug for SandboxAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxAction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Outcome of one `execute` call. Operational failures (timeout,
/// suspension, denied path) land here; they are never panics and never
/// cross the sandbox boundary as raw errors.
#[derive(Debug)]
pub struct SandboxResult {
    pub success: bool,
    pub output: Option<serde_json::Value>,
    pub error: Option<SecurityError>,
    pub resource_usage: ResourceUsage,
    pub duration_ms: u64,
}

impl SandboxResult {
    pub fn ok(output: serde_json::Value, usage: ResourceUsage, duration_ms: u64) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            resource_usage: usage,
            duration_ms,
        }
    }

    pub fn failed(error: SecurityError, usage: ResourceUsage, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error),
            resource_usage: usage,
            duration_ms,
        }
    }

    /// Rejection before any work ran (inactive or suspended sandbox).
    pub fn rejected(error: SecurityError) -> Self {
        Self::failed(error, ResourceUsage::default(), 0)
    }

    pub fn is_timeout(&self) -> bool {
        self.error.as_ref().is_some_and(SecurityError::is_timeout)
    }
}

/// Contract implemented by every isolation strategy.
#[async_trait]
pub trait PluginSandbox: Send + Sync {
    /// Captures baseline measurements and activates the sandbox.
    /// Fails if already initialized or if the policy is invalid.
    async fn initialize(&self, policy: &SecurityPolicy) -> Result<(), SecurityError>;

    /// Runs one action under the policy's execution-time ceiling.
    /// Timeouts and rejections come back as failed results.
    async fn execute(&self, action: SandboxAction) -> SandboxResult;

    /// Checks against the policy's maximum permission set. The result
    /// is independent of strict mode.
    fn validate_permission(&self, permission: PluginPermissions) -> bool;

    /// Cumulative usage since initialization.
    fn resource_usage(&self) -> ResourceUsage;

    async fn suspend(&self) -> Result<(), SecurityError>;

    async fn resume(&self) -> Result<(), SecurityError>;

    /// One-way transition; the sandbox never becomes active again.
    async fn terminate(&self) -> Result<(), SecurityError>;

    /// Best-effort cleanup. Internal failures are logged, never
    /// propagated.
    async fn teardown(&self);

    fn is_active(&self) -> bool;

    fn plugin_name(&self) -> &str;

    fn strategy_name(&self) -> &'static str;
}
