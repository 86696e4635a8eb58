//! Strategy selection and construction.

use std::sync::Arc;

use tracing::info;

use hostguard_audit::AuditLog;
use hostguard_types::{SandboxKind, SecurityPolicy};

use crate::container::ContainerSandbox;
use crate::controller::{NullResourceController, ProcessResourceController};
use crate::cross_platform::CrossPlatformSandbox;
use crate::isolated::IsolatedLoaderSandbox;
use crate::optimized::{OptimizedSandbox, PerformanceProfile};
use crate::passthrough::PassThroughSandbox;
use crate::platform::PlatformInfo;
use crate::process::ProcessSandbox;
use crate::sandbox::PluginSandbox;

/// Picks a strategy for a policy on a given host.
///
/// An explicit `sandbox_type` other than the cross-platform default is
/// honored as-is. Otherwise: strict mode on a container-capable host
/// gets the software container; a memory ceiling with loader isolation
/// gets the isolated loader; a signed-plugin requirement on a
/// process-capable OS gets the (stub) process strategy; everything
/// else goes through the cross-platform selector.
pub fn select_kind(policy: &SecurityPolicy, platform: &PlatformInfo) -> SandboxKind {
    if policy.sandbox_type != SandboxKind::CrossPlatform {
        return policy.sandbox_type;
    }
    if policy.strict_mode && platform.container_capable {
        return SandboxKind::Container;
    }
    if policy.max_memory_bytes > 0 && platform.loader_isolation {
        return SandboxKind::IsolatedLoader;
    }
    if policy.require_signed_plugins && platform.process_capable {
        return SandboxKind::Process;
    }
    SandboxKind::CrossPlatform
}

/// Builds sandboxes with shared host services wired in.
pub struct SandboxFactory {
    platform: PlatformInfo,
    controller: Arc<dyn ProcessResourceController>,
    audit: Option<Arc<AuditLog>>,
    profile: Option<PerformanceProfile>,
}

impl SandboxFactory {
    pub fn new(platform: PlatformInfo) -> Self {
        Self {
            platform,
            controller: Arc::new(NullResourceController),
            audit: None,
            profile: None,
        }
    }

    pub fn with_controller(mut self, controller: Arc<dyn ProcessResourceController>) -> Self {
        self.controller = controller;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Wraps every built sandbox in the optimizing decorator.
    pub fn with_profile(mut self, profile: PerformanceProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn platform(&self) -> &PlatformInfo {
        &self.platform
    }

    pub fn build(&self, plugin: &str, policy: &SecurityPolicy) -> Box<dyn PluginSandbox> {
        let kind = select_kind(policy, &self.platform);
        let sandbox: Box<dyn PluginSandbox> = match kind {
            SandboxKind::PassThrough => Box::new(PassThroughSandbox::new(plugin)),
            SandboxKind::IsolatedLoader => Box::new(IsolatedLoaderSandbox::new(plugin)),
            SandboxKind::Container => match &self.audit {
                Some(audit) => Box::new(ContainerSandbox::with_audit(plugin, audit.clone())),
                None => Box::new(ContainerSandbox::new(plugin)),
            },
            SandboxKind::Process => {
                Box::new(ProcessSandbox::new(plugin, self.controller.clone()))
            }
            SandboxKind::CrossPlatform => match &self.audit {
                Some(audit) => Box::new(CrossPlatformSandbox::with_audit(
                    plugin,
                    self.platform.clone(),
                    audit.clone(),
                )),
                None => Box::new(CrossPlatformSandbox::new(plugin, self.platform.clone())),
            },
        };
        info!(plugin, kind = ?kind, "sandbox built");
        match self.profile {
            Some(profile) => Box::new(OptimizedSandbox::new(sandbox, profile)),
            None => sandbox,
        }
    }
}

/// One-off construction without shared services.
pub fn build_sandbox(
    plugin: &str,
    policy: &SecurityPolicy,
    platform: PlatformInfo,
) -> Box<dyn PluginSandbox> {
    SandboxFactory::new(platform).build(plugin, policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capable_platform() -> PlatformInfo {
        PlatformInfo::fixed("linux", true, true, true)
    }

    #[test]
    fn strict_mode_prefers_container() {
        let policy = SecurityPolicy {
            strict_mode: true,
            ..SecurityPolicy::default()
        };
        assert_eq!(
            select_kind(&policy, &capable_platform()),
            SandboxKind::Container
        );
    }

    #[test]
    fn memory_ceiling_prefers_isolated_loader() {
        let policy = SecurityPolicy::default();
        assert_eq!(
            select_kind(&policy, &capable_platform()),
            SandboxKind::IsolatedLoader
        );
    }

    #[test]
    fn signed_requirement_selects_process() {
        let policy = SecurityPolicy {
            require_signed_plugins: true,
            ..SecurityPolicy::default()
        };
        let platform = PlatformInfo::fixed("linux", false, false, true);
        assert_eq!(select_kind(&policy, &platform), SandboxKind::Process);
    }

    #[test]
    fn fallback_is_cross_platform() {
        let policy = SecurityPolicy::default();
        let platform = PlatformInfo::fixed("freebsd", false, false, false);
        assert_eq!(select_kind(&policy, &platform), SandboxKind::CrossPlatform);
    }

    #[test]
    fn explicit_kind_wins() {
        let policy = SecurityPolicy {
            sandbox_type: SandboxKind::PassThrough,
            strict_mode: true,
            ..SecurityPolicy::default()
        };
        assert_eq!(
            select_kind(&policy, &capable_platform()),
            SandboxKind::PassThrough
        );
    }

    #[test]
    fn factory_builds_selected_strategy() {
        let factory = SandboxFactory::new(capable_platform());
        let sandbox = factory.build("demo", &SecurityPolicy::default());
        assert_eq!(sandbox.strategy_name(), "isolated_loader");
    }

    #[test]
    fn factory_wraps_with_profile() {
        let factory = SandboxFactory::new(capable_platform())
            .with_profile(PerformanceProfile::HighThroughput);
        let sandbox = factory.build("demo", &SecurityPolicy::default());
        assert_eq!(sandbox.strategy_name(), "optimized");
    }

    #[tokio::test]
    async fn built_sandbox_initializes_and_runs() {
        let sandbox = build_sandbox("demo", &SecurityPolicy::default(), capable_platform());
        sandbox.initialize(&SecurityPolicy::default()).await.unwrap();
        let result = sandbox
            .execute(crate::sandbox::SandboxAction::new("noop", async {
                Ok(serde_json::json!(true))
            }))
            .await;
        assert!(result.success);
    }
}
