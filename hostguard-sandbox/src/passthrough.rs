//! No-isolation strategy.
//!
//! Plugin code runs unmodified, but the permission contract, the
//! execution ceiling, and best-effort usage accounting all still
//! apply, so a pass-through plugin remains policy-observable.

use async_trait::async_trait;
use tracing::debug;

use hostguard_types::{PluginPermissions, ResourceUsage, SecurityError, SecurityPolicy};

use crate::core::SandboxCore;
use crate::sandbox::{PluginSandbox, SandboxAction, SandboxResult};

pub struct PassThroughSandbox {
    core: SandboxCore,
}

impl PassThroughSandbox {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            core: SandboxCore::new(plugin),
        }
    }
}

#[async_trait]
impl PluginSandbox for PassThroughSandbox {
    async fn initialize(&self, policy: &SecurityPolicy) -> Result<(), SecurityError> {
        self.core.initialize(policy)?;
        debug!(plugin = %self.core.plugin_name(), "pass-through sandbox initialized");
        Ok(())
    }

    async fn execute(&self, action: SandboxAction) -> SandboxResult {
        self.core.run_with_ceiling(action).await
    }

    fn validate_permission(&self, permission: PluginPermissions) -> bool {
        self.core.validate_permission(permission)
    }

    fn resource_usage(&self) -> ResourceUsage {
        self.core.resource_usage()
    }

    async fn suspend(&self) -> Result<(), SecurityError> {
        self.core.suspend();
        Ok(())
    }

    async fn resume(&self) -> Result<(), SecurityError> {
        self.core.resume();
        Ok(())
    }

    async fn terminate(&self) -> Result<(), SecurityError> {
        self.core.terminate();
        Ok(())
    }

    async fn teardown(&self) {
        self.core.deactivate();
    }

    fn is_active(&self) -> bool {
        self.core.is_active()
    }

    fn plugin_name(&self) -> &str {
        self.core.plugin_name()
    }

    fn strategy_name(&self) -> &'static str {
        "pass_through"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn initialized() -> PassThroughSandbox {
        let sandbox = PassThroughSandbox::new("demo");
        sandbox.initialize(&SecurityPolicy::default()).await.unwrap();
        sandbox
    }

    #[tokio::test]
    async fn executes_action_and_returns_output() {
        let sandbox = initialized().await;
        let result = sandbox
            .execute(SandboxAction::new("compute", async {
                Ok(serde_json::json!({ "answer": 42 }))
            }))
            .await;
        assert!(result.success);
        assert_eq!(result.output.unwrap()["answer"], 42);
    }

    #[tokio::test]
    async fn suspended_sandbox_rejects_execution() {
        let sandbox = initialized().await;
        sandbox.suspend().await.unwrap();
        let result = sandbox
            .execute(SandboxAction::new("noop", async { Ok(serde_json::Value::Null) }))
            .await;
        assert!(!result.success);
        assert!(matches!(result.error, Some(SecurityError::SandboxSuspended(_))));

        sandbox.resume().await.unwrap();
        let result = sandbox
            .execute(SandboxAction::new("noop", async { Ok(serde_json::Value::Null) }))
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn terminate_is_one_way() {
        let sandbox = initialized().await;
        sandbox.terminate().await.unwrap();
        assert!(!sandbox.is_active());
        sandbox.resume().await.unwrap();
        assert!(!sandbox.is_active());
    }

    #[tokio::test]
    async fn permission_check_without_initialization_denies() {
        let sandbox = PassThroughSandbox::new("demo");
        assert!(!sandbox.validate_permission(PluginPermissions::READ_ONLY_ACCESS));
    }
}
