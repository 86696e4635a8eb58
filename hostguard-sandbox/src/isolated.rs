//! In-process isolated-loader strategy.
//!
//! Actions run against a dedicated, unloadable module-loading context.
//! The context gates which dependent modules may load: built-ins and
//! same-vendor modules are always allowed; anything else only when the
//! policy is not in strict mode. Teardown unloads the whole context.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use hostguard_types::{PluginPermissions, ResourceUsage, SecurityError, SecurityPolicy};

use crate::core::SandboxCore;
use crate::sandbox::{PluginSandbox, SandboxAction, SandboxResult};

/// Modules the host itself provides; always loadable.
const BUILTIN_MODULES: &[&str] = &["std", "core", "alloc", "host", "hostguard"];

struct LoaderContext {
    id: Uuid,
    loaded: HashSet<String>,
    unloaded: bool,
}

pub struct IsolatedLoaderSandbox {
    core: SandboxCore,
    vendor_prefix: String,
    context: Mutex<LoaderContext>,
}

impl IsolatedLoaderSandbox {
    pub fn new(plugin: impl Into<String>) -> Self {
        let plugin = plugin.into();
        let vendor_prefix = vendor_prefix_of(&plugin);
        Self {
            core: SandboxCore::new(plugin),
            vendor_prefix,
            context: Mutex::new(LoaderContext {
                id: Uuid::new_v4(),
                loaded: HashSet::new(),
                unloaded: false,
            }),
        }
    }

    /// Registers a dependent module with the loading context, applying
    /// the allow rules. Returns the set of modules now loaded.
    pub fn load_module(&self, module: &str) -> Result<usize, SecurityError> {
        let policy = self.core.ensure_executable()?;
        if !self.module_allowed(module, policy.strict_mode) {
            return Err(SecurityError::ModuleNotPermitted(module.to_string()));
        }
        let mut context = self.context.lock().expect("loader context poisoned");
        if context.unloaded {
            return Err(SecurityError::SandboxNotActive(
                self.core.plugin_name().to_string(),
            ));
        }
        context.loaded.insert(module.to_string());
        debug!(
            plugin = %self.core.plugin_name(),
            context = %context.id,
            module,
            "module loaded into isolated context"
        );
        Ok(context.loaded.len())
    }

    pub fn loaded_modules(&self) -> Vec<String> {
        let context = self.context.lock().expect("loader context poisoned");
        context.loaded.iter().cloned().collect()
    }

    fn module_allowed(&self, module: &str, strict: bool) -> bool {
        let root = module.split(['.', ':', '/']).next().unwrap_or(module);
        if BUILTIN_MODULES.contains(&root) {
            return true;
        }
        if root.eq_ignore_ascii_case(&self.vendor_prefix) {
            return true;
        }
        !strict
    }

    fn unload_context(&self) {
        let mut context = self.context.lock().expect("loader context poisoned");
        if !context.unloaded {
            info!(
                plugin = %self.core.plugin_name(),
                context = %context.id,
                modules = context.loaded.len(),
                "unloading isolated context"
            );
            context.loaded.clear();
            context.unloaded = true;
        }
    }
}

fn vendor_prefix_of(plugin: &str) -> String {
    plugin
        .split(['.', '-', '_'])
        .next()
        .unwrap_or(plugin)
        .to_string()
}

#[async_trait]
impl PluginSandbox for IsolatedLoaderSandbox {
    async fn initialize(&self, policy: &SecurityPolicy) -> Result<(), SecurityError> {
        self.core.initialize(policy)?;
        let context = self.context.lock().expect("loader context poisoned");
        info!(
            plugin = %self.core.plugin_name(),
            context = %context.id,
            "isolated-loader sandbox initialized"
        );
        Ok(())
    }

    async fn execute(&self, action: SandboxAction) -> SandboxResult {
        {
            let context = self.context.lock().expect("loader context poisoned");
            if context.unloaded {
                return SandboxResult::rejected(SecurityError::SandboxNotActive(
                    self.core.plugin_name().to_string(),
                ));
            }
        }
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
        self.unload_context();
        Ok(())
    }

    async fn teardown(&self) {
        self.core.deactivate();
        self.unload_context();
    }

    fn is_active(&self) -> bool {
        self.core.is_active()
    }

    fn plugin_name(&self) -> &str {
        self.core.plugin_name()
    }

    fn strategy_name(&self) -> &'static str {
        "isolated_loader"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sandbox_with(strict: bool) -> IsolatedLoaderSandbox {
        let sandbox = IsolatedLoaderSandbox::new("acme-metrics");
        let policy = SecurityPolicy {
            strict_mode: strict,
            ..SecurityPolicy::default()
        };
        sandbox.initialize(&policy).await.unwrap();
        sandbox
    }

    #[tokio::test]
    async fn builtins_always_load() {
        let sandbox = sandbox_with(true).await;
        assert!(sandbox.load_module("std").is_ok());
        assert!(sandbox.load_module("host.rpc").is_ok());
    }

    #[tokio::test]
    async fn same_vendor_loads_in_strict_mode() {
        let sandbox = sandbox_with(true).await;
        assert!(sandbox.load_module("acme.extra").is_ok());
        assert!(sandbox.load_module("Acme.other").is_ok());
    }

    #[tokio::test]
    async fn third_party_blocked_only_in_strict_mode() {
        let strict = sandbox_with(true).await;
        assert!(matches!(
            strict.load_module("shady.tools"),
            Err(SecurityError::ModuleNotPermitted(_))
        ));

        let relaxed = sandbox_with(false).await;
        assert!(relaxed.load_module("shady.tools").is_ok());
    }

    #[tokio::test]
    async fn teardown_unloads_context() {
        let sandbox = sandbox_with(false).await;
        sandbox.load_module("extra").unwrap();
        assert_eq!(sandbox.loaded_modules().len(), 1);

        sandbox.teardown().await;
        assert!(sandbox.loaded_modules().is_empty());
        let result = sandbox
            .execute(SandboxAction::new("noop", async { Ok(serde_json::Value::Null) }))
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn executes_inside_context() {
        let sandbox = sandbox_with(false).await;
        let result = sandbox
            .execute(SandboxAction::new("compute", async {
                Ok(serde_json::json!(7))
            }))
            .await;
        assert!(result.success);
    }
}
