//! Lifecycle state and the execution path shared by the in-process
//! strategies.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use hostguard_types::{
    PluginPermissions, ResourceSnapshot, ResourceUsage, SecurityError, SecurityPolicy,
    ViolationAction,
};

use crate::measure;
use crate::sandbox::{SandboxAction, SandboxResult};

#[derive(Default)]
struct CoreState {
    policy: Option<SecurityPolicy>,
    active: bool,
    suspended: bool,
    terminated: bool,
    baseline: Option<ResourceSnapshot>,
    usage: ResourceUsage,
}

/// Shared lifecycle plumbing embedded in every in-process strategy.
/// The lock is held only for short, non-awaiting sections.
pub(crate) struct SandboxCore {
    plugin: String,
    state: Mutex<CoreState>,
}

impl SandboxCore {
    pub(crate) fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            state: Mutex::new(CoreState::default()),
        }
    }

    pub(crate) fn plugin_name(&self) -> &str {
        &self.plugin
    }

    pub(crate) fn initialize(&self, policy: &SecurityPolicy) -> Result<(), SecurityError> {
        policy.validate()?;
        let mut state = self.state.lock().expect("sandbox state poisoned");
        if state.active || state.terminated {
            return Err(SecurityError::AlreadyInitialized(self.plugin.clone()));
        }
        state.policy = Some(policy.clone());
        state.baseline = Some(measure::current_snapshot());
        state.active = true;
        state.suspended = false;
        Ok(())
    }

    /// Rejects execution unless the sandbox is active and not
    /// suspended; returns the policy for the caller's ceiling checks.
    pub(crate) fn ensure_executable(&self) -> Result<SecurityPolicy, SecurityError> {
        let state = self.state.lock().expect("sandbox state poisoned");
        if state.terminated || !state.active {
            return Err(SecurityError::SandboxNotActive(self.plugin.clone()));
        }
        if state.suspended {
            return Err(SecurityError::SandboxSuspended(self.plugin.clone()));
        }
        state
            .policy
            .clone()
            .ok_or_else(|| SecurityError::SandboxNotActive(self.plugin.clone()))
    }

    pub(crate) fn policy(&self) -> Option<SecurityPolicy> {
        self.state.lock().expect("sandbox state poisoned").policy.clone()
    }

    pub(crate) fn validate_permission(&self, permission: PluginPermissions) -> bool {
        // Always the maximum set; strict mode never changes the answer.
        self.state
            .lock()
            .expect("sandbox state poisoned")
            .policy
            .as_ref()
            .is_some_and(|p| p.max_permissions.permits(permission))
    }

    pub(crate) fn resource_usage(&self) -> ResourceUsage {
        let state = self.state.lock().expect("sandbox state poisoned");
        let mut usage = state.usage;
        if let Some(baseline) = &state.baseline {
            let live = ResourceUsage::delta(baseline, &measure::current_snapshot());
            usage.memory_used_bytes = usage.memory_used_bytes.max(live.memory_used_bytes);
            usage.threads_created = usage.threads_created.max(live.threads_created);
        }
        usage
    }

    pub(crate) fn suspend(&self) {
        let mut state = self.state.lock().expect("sandbox state poisoned");
        if state.active && !state.terminated {
            state.suspended = true;
        }
    }

    pub(crate) fn resume(&self) {
        let mut state = self.state.lock().expect("sandbox state poisoned");
        if state.active && !state.terminated {
            state.suspended = false;
        }
    }

    pub(crate) fn terminate(&self) {
        let mut state = self.state.lock().expect("sandbox state poisoned");
        state.terminated = true;
        state.active = false;
        state.suspended = false;
    }

    pub(crate) fn deactivate(&self) {
        let mut state = self.state.lock().expect("sandbox state poisoned");
        state.active = false;
        state.suspended = false;
    }

    pub(crate) fn is_active(&self) -> bool {
        let state = self.state.lock().expect("sandbox state poisoned");
        state.active && !state.terminated
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.state.lock().expect("sandbox state poisoned").terminated
    }

    fn record_usage(&self, usage: &ResourceUsage) {
        self.state
            .lock()
            .expect("sandbox state poisoned")
            .usage
            .accumulate(usage);
    }

    /// Runs one action under the policy's wall-clock ceiling, records
    /// usage, and applies the violation action when a ceiling was
    /// breached during the run. On timeout the action future is
    /// dropped, which cancels it at its next suspension point.
    pub(crate) async fn run_with_ceiling(&self, action: SandboxAction) -> SandboxResult {
        let policy = match self.ensure_executable() {
            Ok(policy) => policy,
            Err(err) => return SandboxResult::rejected(err),
        };

        let timeout_ms = policy.max_execution_time_ms();
        let (name, work) = action.into_parts();
        let before = measure::current_snapshot();
        let started = Instant::now();

        let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), work).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let usage = ResourceUsage::delta(&before, &measure::current_snapshot());
        self.record_usage(&usage);

        let result = match outcome {
            Ok(Ok(output)) => SandboxResult::ok(output, usage, duration_ms),
            Ok(Err(err)) => {
                debug!(plugin = %self.plugin, action = %name, error = %err, "action failed");
                SandboxResult::failed(err, usage, duration_ms)
            }
            Err(_) => {
                warn!(
                    plugin = %self.plugin,
                    action = %name,
                    timeout_ms,
                    "action exceeded execution ceiling"
                );
                SandboxResult::failed(
                    SecurityError::Timeout {
                        plugin: self.plugin.clone(),
                        timeout_ms,
                    },
                    usage,
                    duration_ms,
                )
            }
        };

        self.enforce_ceilings(&policy, &usage);
        result
    }

    /// Checks measured usage against the policy ceilings and applies
    /// the configured violation action.
    fn enforce_ceilings(&self, policy: &SecurityPolicy, usage: &ResourceUsage) {
        let mut breaches = Vec::new();
        if usage.memory_used_bytes > policy.max_memory_bytes {
            breaches.push(format!(
                "memory {} over ceiling {}",
                usage.memory_used_bytes, policy.max_memory_bytes
            ));
        }
        if usage.threads_created > policy.max_threads {
            breaches.push(format!(
                "threads {} over ceiling {}",
                usage.threads_created, policy.max_threads
            ));
        }
        if breaches.is_empty() {
            return;
        }

        for breach in &breaches {
            warn!(plugin = %self.plugin, "resource violation: {breach}");
        }
        match policy.violation_action {
            ViolationAction::Log => {}
            ViolationAction::Suspend => self.suspend(),
            ViolationAction::Terminate => self.terminate(),
        }
    }
}
