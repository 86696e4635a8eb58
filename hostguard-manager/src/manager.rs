//! The security manager façade.
//!
//! Single orchestration entry point: resolves and validates policies,
//! builds sandboxes through the factory, keeps the monitor and the
//! state coordinator in lock-step with sandbox lifecycle, and audits
//! every security-relevant step. Constructed explicitly and shared by
//! `Arc`; there is no process-wide instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Notify, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use hostguard_audit::{AuditLog, AuditStatistics};
use hostguard_monitor::{MonitorStats, ResourceMonitor, ViolationResponder};
use hostguard_sandbox::{PlatformInfo, PluginSandbox, SandboxAction, SandboxFactory, SandboxResult};
use hostguard_types::{
    PluginPermissions, PluginStatus, SecurityError, SecurityEvent, SecurityEventType,
    SecurityMode, SecurityPolicy, Severity, ViolationAction,
};

use crate::cache::{CacheStatistics, SecurityCache};
use crate::config::SecurityConfig;
use crate::coordinator::{CoordinatorStatistics, StateCoordinator};

/// Ceiling on waiting for `initialize` before the first privileged
/// call gives up.
const INIT_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct SecurityStatistics {
    pub cache: CacheStatistics,
    pub coordinator: CoordinatorStatistics,
    pub monitor: MonitorStats,
    pub audit: AuditStatistics,
    pub active_sandboxes: usize,
}

struct ManagerInner {
    cache: Arc<SecurityCache>,
    coordinator: Arc<StateCoordinator>,
    audit: Arc<AuditLog>,
    factory: SandboxFactory,
    monitor: OnceLock<Arc<ResourceMonitor>>,
    config: RwLock<SecurityConfig>,
    sandboxes: RwLock<HashMap<String, Arc<dyn PluginSandbox>>>,
    ready: AtomicBool,
    ready_notify: Notify,
}

impl ManagerInner {
    fn monitor(&self) -> &Arc<ResourceMonitor> {
        self.monitor.get().expect("monitor wired at construction")
    }

    async fn audit_event(
        &self,
        event_type: SecurityEventType,
        plugin: &str,
        message: String,
        severity: Severity,
    ) {
        self.audit
            .record(SecurityEvent::new(event_type, plugin, message, severity))
            .await;
    }
}

/// Applies violation actions raised by the monitor back onto the
/// owning manager. Holds a weak reference so the monitor never keeps a
/// dropped manager alive.
struct ViolationHandler {
    inner: Weak<ManagerInner>,
}

#[async_trait]
impl ViolationResponder for ViolationHandler {
    async fn respond(&self, plugin: &str, action: ViolationAction, detail: &str) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        match action {
            ViolationAction::Log => {
                // The monitor already audited the violation.
            }
            ViolationAction::Suspend => {
                if let Err(err) = suspend_plugin(&inner, plugin).await {
                    error!(plugin, error = %err, "violation suspend failed");
                }
            }
            ViolationAction::Terminate => {
                if let Err(err) = terminate_plugin(&inner, plugin, PluginStatus::Error).await {
                    error!(plugin, error = %err, "violation terminate failed");
                }
                inner
                    .audit_event(
                        SecurityEventType::SecurityViolation,
                        plugin,
                        format!("plugin terminated after violation: {detail}"),
                        Severity::Critical,
                    )
                    .await;
            }
        }
    }
}

async fn suspend_plugin(inner: &Arc<ManagerInner>, plugin: &str) -> Result<(), SecurityError> {
    let sandbox = {
        let sandboxes = inner.sandboxes.read().await;
        sandboxes
            .get(plugin)
            .cloned()
            .ok_or_else(|| SecurityError::PluginNotFound(plugin.to_string()))?
    };
    sandbox.suspend().await?;
    inner
        .coordinator
        .update_state(plugin, |s| s.set_status(PluginStatus::Suspended))
        .await;
    inner
        .audit_event(
            SecurityEventType::SandboxOperation,
            plugin,
            "plugin suspended".to_string(),
            Severity::Medium,
        )
        .await;
    Ok(())
}

async fn terminate_plugin(
    inner: &Arc<ManagerInner>,
    plugin: &str,
    final_status: PluginStatus,
) -> Result<(), SecurityError> {
    let sandbox = {
        let sandboxes = inner.sandboxes.read().await;
        sandboxes
            .get(plugin)
            .cloned()
            .ok_or_else(|| SecurityError::PluginNotFound(plugin.to_string()))?
    };
    sandbox.terminate().await?;
    inner
        .coordinator
        .update_state(plugin, |s| s.set_status(final_status))
        .await;
    inner.monitor().unregister(plugin);
    inner
        .audit_event(
            SecurityEventType::SandboxOperation,
            plugin,
            "plugin terminated".to_string(),
            Severity::High,
        )
        .await;
    Ok(())
}

pub struct SecurityManager {
    inner: Arc<ManagerInner>,
}

impl SecurityManager {
    /// Manager with detected platform capabilities and default
    /// services.
    pub fn new(config: SecurityConfig) -> Self {
        let audit = Arc::new(AuditLog::default());
        let factory = SandboxFactory::new(PlatformInfo::detect()).with_audit(audit.clone());
        Self::with_services(
            config,
            Arc::new(SecurityCache::new()),
            Arc::new(StateCoordinator::new()),
            audit,
            factory,
        )
    }

    /// Fully dependency-injected construction. Tests supply sweepless
    /// caches and fixed platforms through here.
    pub fn with_services(
        config: SecurityConfig,
        cache: Arc<SecurityCache>,
        coordinator: Arc<StateCoordinator>,
        audit: Arc<AuditLog>,
        factory: SandboxFactory,
    ) -> Self {
        let inner = Arc::new(ManagerInner {
            cache,
            coordinator,
            audit: audit.clone(),
            factory,
            monitor: OnceLock::new(),
            config: RwLock::new(config),
            sandboxes: RwLock::new(HashMap::new()),
            ready: AtomicBool::new(false),
            ready_notify: Notify::new(),
        });
        let responder = Arc::new(ViolationHandler {
            inner: Arc::downgrade(&inner),
        });
        let monitor = Arc::new(ResourceMonitor::with_audit(responder, audit));
        inner
            .monitor
            .set(monitor)
            .unwrap_or_else(|_| unreachable!("monitor set once"));
        Self { inner }
    }

    /// Completes startup. Privileged calls made before this block
    /// until it runs (bounded by [`INIT_WAIT`]).
    pub async fn initialize(&self) {
        self.inner.ready.store(true, Ordering::SeqCst);
        self.inner.ready_notify.notify_waiters();
        self.inner
            .audit_event(
                SecurityEventType::ConfigurationChange,
                "",
                "security manager initialized".to_string(),
                Severity::Low,
            )
            .await;
        info!("security manager initialized");
    }

    async fn wait_ready(&self) -> Result<(), SecurityError> {
        if self.inner.ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        let waiter = async {
            loop {
                let notified = self.inner.ready_notify.notified();
                if self.inner.ready.load(Ordering::SeqCst) {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(INIT_WAIT, waiter)
            .await
            .map_err(|_| SecurityError::InitializationTimeout(INIT_WAIT.as_millis() as u64))
    }

    // ================================================================
    // Policy resolution
    // ================================================================

    /// Cache, then per-plugin override, then the default policy. An
    /// invalid override falls back to the default with every collected
    /// error logged.
    pub async fn resolve_policy(&self, plugin: &str) -> SecurityPolicy {
        if let Some(policy) = self.inner.cache.cached_policy(plugin) {
            return policy;
        }
        let config = self.inner.config.read().await;
        let candidate = config.policy_for(plugin);
        let policy = match candidate.validate() {
            Ok(()) => candidate,
            Err(SecurityError::PolicyValidation(errors)) => {
                for problem in &errors {
                    warn!(plugin, problem, "policy validation error");
                }
                config.default_policy.clone()
            }
            Err(err) => {
                warn!(plugin, error = %err, "policy validation error");
                config.default_policy.clone()
            }
        };
        drop(config);
        self.inner.cache.cache_policy(plugin, &policy);
        policy
    }

    // ================================================================
    // Sandbox lifecycle
    // ================================================================

    /// Creates, initializes, and registers a sandbox for a plugin.
    /// Any failure leaves the plugin in `Error` state.
    pub async fn create_sandbox(
        &self,
        plugin: &str,
        policy_override: Option<SecurityPolicy>,
    ) -> Result<(), SecurityError> {
        self.wait_ready().await?;
        let inner = self.inner.clone();
        let plugin = plugin.to_string();

        let outcome = inner
            .coordinator
            .coordinated(|global| {
                let inner = inner.clone();
                let plugin = plugin.clone();
                let manager = self;
                async move {
                    if !global.enabled {
                        warn!(plugin = %plugin, "security disabled, sandbox not created");
                        return Err(SecurityError::Config(
                            "security is globally disabled".to_string(),
                        ));
                    }
                    {
                        let sandboxes = inner.sandboxes.read().await;
                        if sandboxes.contains_key(&plugin) {
                            return Err(SecurityError::SandboxAlreadyExists(plugin.clone()));
                        }
                    }

                    let policy = match policy_override {
                        Some(candidate) => {
                            candidate.validate()?;
                            inner.cache.invalidate_plugin(&plugin);
                            inner.cache.cache_policy(&plugin, &candidate);
                            candidate
                        }
                        None => manager.resolve_policy(&plugin).await,
                    };

                    // A racing create for the same plugin may already
                    // have won; never demote a Running entry.
                    inner
                        .coordinator
                        .update_state_if(
                            &plugin,
                            |s| {
                                !matches!(
                                    s.status,
                                    PluginStatus::Running | PluginStatus::Suspended
                                )
                            },
                            |s| s.set_status(PluginStatus::Loading),
                        )
                        .await;

                    let sandbox: Arc<dyn PluginSandbox> =
                        Arc::from(inner.factory.build(&plugin, &policy));
                    sandbox.initialize(&policy).await?;

                    {
                        // Re-check under the write lock: two concurrent
                        // creates can both pass the early read check.
                        let mut sandboxes = inner.sandboxes.write().await;
                        if sandboxes.contains_key(&plugin) {
                            drop(sandboxes);
                            sandbox.teardown().await;
                            return Err(SecurityError::SandboxAlreadyExists(plugin.clone()));
                        }
                        sandboxes.insert(plugin.clone(), sandbox);
                    }
                    inner.monitor().register(&plugin, &policy);
                    inner
                        .coordinator
                        .update_state(&plugin, |s| s.set_status(PluginStatus::Running))
                        .await;
                    inner
                        .audit_event(
                            SecurityEventType::PluginLoad,
                            &plugin,
                            "sandbox created".to_string(),
                            Severity::Low,
                        )
                        .await;
                    Ok(())
                }
            })
            .await?;

        if let Err(err) = &outcome {
            if !matches!(err, SecurityError::SandboxAlreadyExists(_)) {
                self.inner
                    .coordinator
                    .update_state(&plugin, |s| s.set_status(PluginStatus::Error))
                    .await;
                self.inner
                    .audit_event(
                        SecurityEventType::PluginLoad,
                        &plugin,
                        format!("sandbox creation failed: {err}"),
                        Severity::High,
                    )
                    .await;
            }
        }
        outcome
    }

    /// Reverses `create_sandbox`: stop, tear down, unregister,
    /// invalidate, forget.
    pub async fn remove_sandbox(&self, plugin: &str) -> Result<(), SecurityError> {
        self.wait_ready().await?;
        let sandbox = {
            let mut sandboxes = self.inner.sandboxes.write().await;
            sandboxes
                .remove(plugin)
                .ok_or_else(|| SecurityError::PluginNotFound(plugin.to_string()))?
        };

        self.inner
            .coordinator
            .update_state(plugin, |s| s.set_status(PluginStatus::Stopped))
            .await;
        // Teardown is unconditional; failures stay inside teardown.
        sandbox.teardown().await;
        self.inner.monitor().unregister(plugin);
        self.inner.cache.invalidate_plugin(plugin);
        self.inner.coordinator.remove_state(plugin);
        self.inner
            .audit_event(
                SecurityEventType::PluginUnload,
                plugin,
                "sandbox removed".to_string(),
                Severity::Low,
            )
            .await;
        Ok(())
    }

    /// Runs one action in the plugin's sandbox, reporting the
    /// operation to the monitor.
    pub async fn execute(&self, plugin: &str, action: SandboxAction) -> SandboxResult {
        let sandbox = {
            let sandboxes = self.inner.sandboxes.read().await;
            sandboxes.get(plugin).cloned()
        };
        let Some(sandbox) = sandbox else {
            return SandboxResult::rejected(SecurityError::PluginNotFound(plugin.to_string()));
        };

        let op_id = Uuid::new_v4();
        self.inner.monitor().operation_started(plugin, op_id);
        let result = sandbox.execute(action).await;
        self.inner
            .monitor()
            .operation_ended(plugin, op_id, result.resource_usage);
        result
    }

    pub async fn suspend_plugin(&self, plugin: &str) -> Result<(), SecurityError> {
        self.wait_ready().await?;
        suspend_plugin(&self.inner, plugin).await
    }

    pub async fn resume_plugin(&self, plugin: &str) -> Result<(), SecurityError> {
        self.wait_ready().await?;
        let sandbox = {
            let sandboxes = self.inner.sandboxes.read().await;
            sandboxes
                .get(plugin)
                .cloned()
                .ok_or_else(|| SecurityError::PluginNotFound(plugin.to_string()))?
        };
        sandbox.resume().await?;
        self.inner
            .coordinator
            .update_state_if(
                plugin,
                |s| s.status == PluginStatus::Suspended,
                |s| s.set_status(PluginStatus::Running),
            )
            .await;
        self.inner
            .audit_event(
                SecurityEventType::SandboxOperation,
                plugin,
                "plugin resumed".to_string(),
                Severity::Low,
            )
            .await;
        Ok(())
    }

    pub async fn terminate_plugin(&self, plugin: &str) -> Result<(), SecurityError> {
        self.wait_ready().await?;
        terminate_plugin(&self.inner, plugin, PluginStatus::Stopped).await
    }

    // ================================================================
    // Permission checks
    // ================================================================

    /// Cache, then the live sandbox, then a raw policy comparison.
    /// Every computed result is cached and audited as a permission
    /// request; denials get an additional denial event. Cache hits are
    /// not re-audited.
    pub async fn check_permission(&self, plugin: &str, permission: PluginPermissions) -> bool {
        if let Some(cached) = self.inner.cache.cached_permission(plugin, permission) {
            return cached;
        }

        let allowed = {
            let sandboxes = self.inner.sandboxes.read().await;
            match sandboxes.get(plugin) {
                Some(sandbox) => sandbox.validate_permission(permission),
                None => {
                    drop(sandboxes);
                    let policy = self.resolve_policy(plugin).await;
                    policy.max_permissions.permits(permission)
                }
            }
        };

        self.inner.cache.cache_permission(plugin, permission, allowed);
        self.inner
            .audit_event(
                SecurityEventType::PermissionRequest,
                plugin,
                format!("permission check: {permission} -> {allowed}"),
                Severity::Low,
            )
            .await;
        if !allowed {
            self.inner
                .audit_event(
                    SecurityEventType::PermissionDenied,
                    plugin,
                    format!("permission denied: {permission}"),
                    Severity::Medium,
                )
                .await;
        }
        allowed
    }

    // ================================================================
    // Global configuration
    // ================================================================

    /// Re-reads configuration under exclusive access and drops every
    /// cached policy and permission result.
    pub async fn reload_config(&self, path: &std::path::Path) -> Result<(), SecurityError> {
        self.wait_ready().await?;
        let fresh = SecurityConfig::load(path);
        let inner = self.inner.clone();
        inner
            .coordinator
            .exclusive(|_global| {
                let inner = inner.clone();
                async move {
                    *inner.config.write().await = fresh;
                    inner.cache.invalidate_all();
                }
            })
            .await?;
        self.inner
            .audit_event(
                SecurityEventType::ConfigurationChange,
                "",
                format!("configuration reloaded from {}", path.display()),
                Severity::Medium,
            )
            .await;
        Ok(())
    }

    pub async fn set_security_enabled(
        &self,
        enabled: bool,
        mode: SecurityMode,
    ) -> Result<(), SecurityError> {
        self.wait_ready().await?;
        self.inner.coordinator.set_global_security(enabled, mode).await?;
        self.inner.cache.invalidate_all();
        self.inner
            .audit_event(
                SecurityEventType::ConfigurationChange,
                "",
                format!("security enabled={enabled} mode={mode:?}"),
                Severity::High,
            )
            .await;
        Ok(())
    }

    // ================================================================
    // Introspection
    // ================================================================

    pub async fn plugin_status(&self, plugin: &str) -> PluginStatus {
        self.inner.coordinator.state(plugin).await.status
    }

    pub async fn is_sandboxed(&self, plugin: &str) -> bool {
        self.inner.sandboxes.read().await.contains_key(plugin)
    }

    pub async fn sandbox_active(&self, plugin: &str) -> bool {
        let sandboxes = self.inner.sandboxes.read().await;
        sandboxes.get(plugin).is_some_and(|s| s.is_active())
    }

    /// The shared monitor, for hosts that push their own usage
    /// snapshots or subscribe to violation notices.
    pub fn monitor(&self) -> Arc<ResourceMonitor> {
        self.inner.monitor().clone()
    }

    pub fn audit(&self) -> Arc<AuditLog> {
        self.inner.audit.clone()
    }

    pub async fn statistics(&self) -> SecurityStatistics {
        SecurityStatistics {
            cache: self.inner.cache.statistics(),
            coordinator: self.inner.coordinator.statistics().await,
            monitor: self.inner.monitor().stats(),
            audit: self.inner.audit.statistics(),
            active_sandboxes: self.inner.sandboxes.read().await.len(),
        }
    }

    /// Tears down every sandbox and stops the monitor consumer.
    pub async fn shutdown(&self) {
        let sandboxes: Vec<(String, Arc<dyn PluginSandbox>)> = {
            let mut map = self.inner.sandboxes.write().await;
            map.drain().collect()
        };
        for (plugin, sandbox) in sandboxes {
            sandbox.teardown().await;
            self.inner.monitor().unregister(&plugin);
            self.inner.cache.invalidate_plugin(&plugin);
            self.inner.coordinator.remove_state(&plugin);
        }
        self.inner.monitor().shutdown().await;
        info!("security manager shut down");
    }
}
