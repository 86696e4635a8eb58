//! Auto-selecting strategy.
//!
//! Picks the best concrete strategy for the detected host capabilities
//! and adapts the policy with OS-specific denied paths, port filtering,
//! and path normalization before delegating everything to the inner
//! sandbox.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use hostguard_audit::AuditLog;
use hostguard_types::{PluginPermissions, ResourceUsage, SecurityError, SecurityPolicy};

use crate::container::ContainerSandbox;
use crate::isolated::IsolatedLoaderSandbox;
use crate::passthrough::PassThroughSandbox;
use crate::platform::PlatformInfo;
use crate::sandbox::{PluginSandbox, SandboxAction, SandboxResult};

const UNIX_DENIED_PATHS: &[&str] = &["/etc", "/sys", "/proc", "/boot"];
const WINDOWS_DENIED_PATHS: &[&str] = &["C:/Windows", "C:/Program Files"];

pub struct CrossPlatformSandbox {
    platform: PlatformInfo,
    inner: Box<dyn PluginSandbox>,
}

impl CrossPlatformSandbox {
    pub fn new(plugin: impl Into<String>, platform: PlatformInfo) -> Self {
        Self::build(plugin.into(), platform, None)
    }

    pub fn with_audit(
        plugin: impl Into<String>,
        platform: PlatformInfo,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self::build(plugin.into(), platform, Some(audit))
    }

    fn build(plugin: String, platform: PlatformInfo, audit: Option<Arc<AuditLog>>) -> Self {
        let inner: Box<dyn PluginSandbox> = if platform.loader_isolation {
            Box::new(IsolatedLoaderSandbox::new(&plugin))
        } else if platform.container_capable {
            match audit {
                Some(audit) => Box::new(ContainerSandbox::with_audit(&plugin, audit)),
                None => Box::new(ContainerSandbox::new(&plugin)),
            }
        } else {
            Box::new(PassThroughSandbox::new(&plugin))
        };
        info!(
            plugin = %plugin,
            os = platform.os,
            delegate = inner.strategy_name(),
            "cross-platform sandbox selected delegate"
        );
        Self { platform, inner }
    }

    pub fn delegate_name(&self) -> &'static str {
        self.inner.strategy_name()
    }

    /// Applies host-specific tightening before the policy reaches the
    /// delegate.
    pub fn adapt_policy(&self, policy: &SecurityPolicy) -> SecurityPolicy {
        let mut adapted = policy.clone();

        let denied: &[&str] = if self.platform.is_windows() {
            WINDOWS_DENIED_PATHS
        } else {
            UNIX_DENIED_PATHS
        };
        for path in denied {
            if !adapted
                .file_system
                .restricted_paths
                .iter()
                .any(|p| p.eq_ignore_ascii_case(path))
            {
                adapted.file_system.restricted_paths.push((*path).to_string());
            }
        }

        // Plugins never get privileged ports other than standard HTTP.
        adapted
            .network
            .allowed_ports
            .retain(|&port| port >= 1024 || port == 80 || port == 443);

        if self.platform.is_windows() {
            for path in adapted
                .file_system
                .allowed_paths
                .iter_mut()
                .chain(adapted.file_system.restricted_paths.iter_mut())
            {
                *path = path.replace('\\', "/").to_ascii_lowercase();
            }
        }

        adapted
    }
}

#[async_trait]
impl PluginSandbox for CrossPlatformSandbox {
    async fn initialize(&self, policy: &SecurityPolicy) -> Result<(), SecurityError> {
        let adapted = self.adapt_policy(policy);
        self.inner.initialize(&adapted).await
    }

    async fn execute(&self, action: SandboxAction) -> SandboxResult {
        self.inner.execute(action).await
    }

    fn validate_permission(&self, permission: PluginPermissions) -> bool {
        self.inner.validate_permission(permission)
    }

    fn resource_usage(&self) -> ResourceUsage {
        self.inner.resource_usage()
    }

    async fn suspend(&self) -> Result<(), SecurityError> {
        self.inner.suspend().await
    }

    async fn resume(&self) -> Result<(), SecurityError> {
        self.inner.resume().await
    }

    async fn terminate(&self) -> Result<(), SecurityError> {
        self.inner.terminate().await
    }

    async fn teardown(&self) {
        self.inner.teardown().await;
    }

    fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn plugin_name(&self) -> &str {
        self.inner.plugin_name()
    }

    fn strategy_name(&self) -> &'static str {
        "cross_platform"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_isolated_loader_when_runtime_supports_it() {
        let platform = PlatformInfo::fixed("linux", true, true, true);
        let sandbox = CrossPlatformSandbox::new("demo", platform);
        assert_eq!(sandbox.delegate_name(), "isolated_loader");
    }

    #[test]
    fn selects_container_on_cgroup_linux_without_loader() {
        let platform = PlatformInfo::fixed("linux", true, false, true);
        let sandbox = CrossPlatformSandbox::new("demo", platform);
        assert_eq!(sandbox.delegate_name(), "container");
    }

    #[test]
    fn falls_back_to_pass_through() {
        let platform = PlatformInfo::fixed("freebsd", false, false, false);
        let sandbox = CrossPlatformSandbox::new("demo", platform);
        assert_eq!(sandbox.delegate_name(), "pass_through");
    }

    #[test]
    fn adapt_adds_unix_denied_paths_once() {
        let platform = PlatformInfo::fixed("linux", false, false, true);
        let sandbox = CrossPlatformSandbox::new("demo", platform);
        let adapted = sandbox.adapt_policy(&SecurityPolicy::default());
        assert!(adapted
            .file_system
            .restricted_paths
            .iter()
            .any(|p| p == "/etc"));

        // Re-adapting must not duplicate entries.
        let again = sandbox.adapt_policy(&adapted);
        let etc_count = again
            .file_system
            .restricted_paths
            .iter()
            .filter(|p| p.as_str() == "/etc")
            .count();
        assert_eq!(etc_count, 1);
    }

    #[test]
    fn adapt_filters_privileged_ports() {
        let platform = PlatformInfo::fixed("linux", false, false, true);
        let sandbox = CrossPlatformSandbox::new("demo", platform);
        let mut policy = SecurityPolicy::default();
        policy.network.allowed_ports = vec![22, 80, 443, 8080];
        let adapted = sandbox.adapt_policy(&policy);
        assert_eq!(adapted.network.allowed_ports, vec![80, 443, 8080]);
    }

    #[test]
    fn adapt_normalizes_windows_paths() {
        let platform = PlatformInfo::fixed("windows", false, false, true);
        let sandbox = CrossPlatformSandbox::new("demo", platform);
        let mut policy = SecurityPolicy::default();
        policy.file_system.allowed_paths = vec!["C:\\Users\\Plugins".into()];
        let adapted = sandbox.adapt_policy(&policy);
        assert_eq!(adapted.file_system.allowed_paths[0], "c:/users/plugins");
    }

    #[tokio::test]
    async fn delegates_execution() {
        let platform = PlatformInfo::fixed("linux", false, true, true);
        let sandbox = CrossPlatformSandbox::new("demo", platform);
        sandbox.initialize(&SecurityPolicy::default()).await.unwrap();
        let result = sandbox
            .execute(SandboxAction::new("noop", async { Ok(serde_json::json!(1)) }))
            .await;
        assert!(result.success);
    }
}
