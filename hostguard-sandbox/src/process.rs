//! OS-process strategy stub.
//!
//! Intended to run actions in a separate resource-limited process.
//! Without a host-supplied process bridge there is nothing to execute
//! in, so `execute` always fails with a typed `Unsupported` error and
//! never silently degrades to another strategy. Suspend and resume
//! delegate to the process controller when a child pid is attached.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{info, warn};

use hostguard_types::{PluginPermissions, ResourceUsage, SecurityError, SecurityPolicy};

use crate::controller::ProcessResourceController;
use crate::core::SandboxCore;
use crate::sandbox::{PluginSandbox, SandboxAction, SandboxResult};

pub struct ProcessSandbox {
    core: SandboxCore,
    controller: Arc<dyn ProcessResourceController>,
    child_pid: Mutex<Option<u32>>,
}

impl ProcessSandbox {
    pub fn new(
        plugin: impl Into<String>,
        controller: Arc<dyn ProcessResourceController>,
    ) -> Self {
        Self {
            core: SandboxCore::new(plugin),
            controller,
            child_pid: Mutex::new(None),
        }
    }

    /// Attaches an externally spawned child process and applies the
    /// policy ceilings to it through the controller.
    pub async fn attach_process(&self, pid: u32) -> Result<(), SecurityError> {
        let policy = self.core.ensure_executable()?;
        self.controller
            .apply_limits(pid, policy.max_memory_bytes, policy.max_cpu_percent)
            .await?;
        *self.child_pid.lock().expect("pid lock poisoned") = Some(pid);
        info!(plugin = %self.core.plugin_name(), pid, "process attached");
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        *self.child_pid.lock().expect("pid lock poisoned")
    }
}

#[async_trait]
impl PluginSandbox for ProcessSandbox {
    async fn initialize(&self, policy: &SecurityPolicy) -> Result<(), SecurityError> {
        self.core.initialize(policy)?;
        info!(
            plugin = %self.core.plugin_name(),
            "process sandbox initialized (execution requires a host process bridge)"
        );
        Ok(())
    }

    async fn execute(&self, action: SandboxAction) -> SandboxResult {
        if let Err(err) = self.core.ensure_executable() {
            return SandboxResult::rejected(err);
        }
        SandboxResult::rejected(SecurityError::Unsupported(format!(
            "process isolation has no execution bridge (action '{}')",
            action.name()
        )))
    }

    fn validate_permission(&self, permission: PluginPermissions) -> bool {
        self.core.validate_permission(permission)
    }

    fn resource_usage(&self) -> ResourceUsage {
        self.core.resource_usage()
    }

    async fn suspend(&self) -> Result<(), SecurityError> {
        if let Some(pid) = self.pid() {
            self.controller.suspend(pid).await?;
        }
        self.core.suspend();
        Ok(())
    }

    async fn resume(&self) -> Result<(), SecurityError> {
        if let Some(pid) = self.pid() {
            self.controller.resume(pid).await?;
        }
        self.core.resume();
        Ok(())
    }

    async fn terminate(&self) -> Result<(), SecurityError> {
        if let Some(pid) = self.pid() {
            // Best effort; the child may already be gone.
            if let Err(err) = self.controller.suspend(pid).await {
                warn!(plugin = %self.core.plugin_name(), pid, error = %err, "suspend on terminate failed");
            }
        }
        self.core.terminate();
        Ok(())
    }

    async fn teardown(&self) {
        self.core.deactivate();
        *self.child_pid.lock().expect("pid lock poisoned") = None;
    }

    fn is_active(&self) -> bool {
        self.core.is_active()
    }

    fn plugin_name(&self) -> &str {
        self.core.plugin_name()
    }

    fn strategy_name(&self) -> &'static str {
        "process"
    }
}
