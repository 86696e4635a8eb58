//! Software container strategy.
//!
//! Best-effort, cooperative isolation built from three interceptors
//! sharing one lifetime: a file-system gate, a network gate, and an
//! execution context that captures panics for audit. This is not a
//! kernel-level boundary; callers wanting true isolation need an OS
//! process bridge.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use hostguard_audit::AuditLog;
use hostguard_types::constants::CONTAINER_MIN_CHECK_INTERVAL_MS;
use hostguard_types::{
    PluginPermissions, ResourceUsage, SecurityError, SecurityEvent, SecurityEventType,
    SecurityPolicy, Severity,
};

use crate::core::SandboxCore;
use crate::sandbox::{PluginSandbox, SandboxAction, SandboxResult};

// ====================================================================
// File system gate
// ====================================================================

struct FileSystemGate {
    policy: hostguard_types::FileSystemPolicy,
    files_written: Mutex<HashSet<String>>,
}

impl FileSystemGate {
    fn new(policy: hostguard_types::FileSystemPolicy) -> Self {
        Self {
            policy,
            files_written: Mutex::new(HashSet::new()),
        }
    }

    fn check_read(&self, path: &str) -> Result<String, SecurityError> {
        self.check_path(path)
    }

    fn check_write(&self, path: &str, size: u64) -> Result<String, SecurityError> {
        let normalized = self.check_path(path)?;
        if size > self.policy.max_file_size {
            return Err(SecurityError::PathNotPermitted(format!(
                "{normalized}: size {size} over file ceiling {}",
                self.policy.max_file_size
            )));
        }
        let mut written = self.files_written.lock().expect("fs gate poisoned");
        if !written.contains(&normalized)
            && written.len() >= self.policy.max_total_files as usize
        {
            return Err(SecurityError::PathNotPermitted(format!(
                "{normalized}: file count ceiling {} reached",
                self.policy.max_total_files
            )));
        }
        written.insert(normalized.clone());
        Ok(normalized)
    }

    fn check_path(&self, path: &str) -> Result<String, SecurityError> {
        if !self.policy.allow_file_system_access {
            return Err(SecurityError::PathNotPermitted(
                "file system access disabled by policy".to_string(),
            ));
        }
        let normalized = normalize_path(path);
        if normalized.split('/').any(|seg| seg == "..") {
            return Err(SecurityError::PathNotPermitted(format!(
                "{path}: traversal segments rejected"
            )));
        }
        if self
            .policy
            .restricted_paths
            .iter()
            .any(|deny| path_is_under(&normalized, deny))
        {
            return Err(SecurityError::PathNotPermitted(normalized));
        }
        if !self.policy.allowed_paths.is_empty()
            && !self
                .policy
                .allowed_paths
                .iter()
                .any(|allow| path_is_under(&normalized, allow))
        {
            return Err(SecurityError::PathNotPermitted(normalized));
        }
        Ok(normalized)
    }
}

fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

fn path_is_under(path: &str, prefix: &str) -> bool {
    let prefix = normalize_path(prefix);
    let prefix = prefix.trim_end_matches('/');
    path == prefix || path.starts_with(&format!("{prefix}/"))
}

// ====================================================================
// Network gate
// ====================================================================

struct NetworkGate {
    policy: hostguard_types::NetworkPolicy,
    open_connections: Mutex<u32>,
}

impl NetworkGate {
    fn new(policy: hostguard_types::NetworkPolicy) -> Self {
        Self {
            policy,
            open_connections: Mutex::new(0),
        }
    }

    fn check_connect(&self, endpoint: &str, port: u16, tls: bool) -> Result<(), SecurityError> {
        if !self.policy.allow_network_access {
            return Err(SecurityError::EndpointNotPermitted(
                "network access disabled by policy".to_string(),
            ));
        }
        if self.policy.require_tls && !tls {
            return Err(SecurityError::EndpointNotPermitted(format!(
                "{endpoint}:{port}: plaintext connection with TLS required"
            )));
        }
        // Deny list wins over the allow list.
        if self
            .policy
            .blocked_endpoints
            .iter()
            .any(|blocked| endpoint_matches(endpoint, blocked))
        {
            return Err(SecurityError::EndpointNotPermitted(endpoint.to_string()));
        }
        if !self.policy.allowed_endpoints.is_empty()
            && !self
                .policy
                .allowed_endpoints
                .iter()
                .any(|allowed| endpoint_matches(endpoint, allowed))
        {
            return Err(SecurityError::EndpointNotPermitted(endpoint.to_string()));
        }
        if !self.policy.allowed_ports.contains(&port) {
            return Err(SecurityError::EndpointNotPermitted(format!(
                "{endpoint}:{port}: port not in allow list"
            )));
        }
        let mut open = self.open_connections.lock().expect("net gate poisoned");
        if *open >= self.policy.max_connections {
            return Err(SecurityError::EndpointNotPermitted(format!(
                "{endpoint}:{port}: connection ceiling {} reached",
                self.policy.max_connections
            )));
        }
        *open += 1;
        Ok(())
    }

    fn release_connection(&self) {
        let mut open = self.open_connections.lock().expect("net gate poisoned");
        *open = open.saturating_sub(1);
    }
}

fn endpoint_matches(endpoint: &str, pattern: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        endpoint.eq_ignore_ascii_case(suffix)
            || endpoint.to_ascii_lowercase().ends_with(&format!(".{}", suffix.to_ascii_lowercase()))
    } else {
        endpoint.eq_ignore_ascii_case(pattern)
    }
}

// ====================================================================
// Container sandbox
// ====================================================================

/// Composes the gates and the panic-capturing execution context. Each
/// instance owns its gates; nothing is installed process-wide.
pub struct ContainerSandbox {
    core: SandboxCore,
    fs_gate: Mutex<Option<FileSystemGate>>,
    net_gate: Mutex<Option<NetworkGate>>,
    audit: Option<Arc<AuditLog>>,
}

impl ContainerSandbox {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            core: SandboxCore::new(plugin),
            fs_gate: Mutex::new(None),
            net_gate: Mutex::new(None),
            audit: None,
        }
    }

    pub fn with_audit(plugin: impl Into<String>, audit: Arc<AuditLog>) -> Self {
        Self {
            audit: Some(audit),
            ..Self::new(plugin)
        }
    }

    async fn record_event(
        &self,
        event_type: SecurityEventType,
        message: String,
        severity: Severity,
    ) {
        if let Some(audit) = &self.audit {
            audit
                .record(SecurityEvent::new(
                    event_type,
                    self.core.plugin_name(),
                    message,
                    severity,
                ))
                .await;
        }
    }

    /// Gates a file read for the contained plugin.
    pub async fn check_file_read(&self, path: &str) -> Result<(), SecurityError> {
        let outcome = {
            let gate = self.fs_gate.lock().expect("fs gate poisoned");
            match gate.as_ref() {
                Some(gate) => gate.check_read(path),
                None => Err(SecurityError::SandboxNotActive(
                    self.core.plugin_name().to_string(),
                )),
            }
        };
        match &outcome {
            Ok(normalized) => {
                self.record_event(
                    SecurityEventType::FileAccess,
                    format!("read allowed: {normalized}"),
                    Severity::Low,
                )
                .await;
            }
            Err(err) => {
                self.record_event(
                    SecurityEventType::FileAccess,
                    format!("read denied: {err}"),
                    Severity::Medium,
                )
                .await;
            }
        }
        outcome.map(|_| ())
    }

    /// Gates a file write, enforcing size and file-count ceilings.
    pub async fn check_file_write(&self, path: &str, size: u64) -> Result<(), SecurityError> {
        let outcome = {
            let gate = self.fs_gate.lock().expect("fs gate poisoned");
            match gate.as_ref() {
                Some(gate) => gate.check_write(path, size),
                None => Err(SecurityError::SandboxNotActive(
                    self.core.plugin_name().to_string(),
                )),
            }
        };
        match &outcome {
            Ok(normalized) => {
                self.record_event(
                    SecurityEventType::FileAccess,
                    format!("write allowed: {normalized} ({size} bytes)"),
                    Severity::Low,
                )
                .await;
            }
            Err(err) => {
                self.record_event(
                    SecurityEventType::FileAccess,
                    format!("write denied: {err}"),
                    Severity::Medium,
                )
                .await;
            }
        }
        outcome.map(|_| ())
    }

    /// Gates an outbound connection. The returned guard-free protocol
    /// requires a matching `release_connection` when the plugin closes
    /// the socket.
    pub async fn check_connect(
        &self,
        endpoint: &str,
        port: u16,
        tls: bool,
    ) -> Result<(), SecurityError> {
        let outcome = {
            let gate = self.net_gate.lock().expect("net gate poisoned");
            match gate.as_ref() {
                Some(gate) => gate.check_connect(endpoint, port, tls),
                None => Err(SecurityError::SandboxNotActive(
                    self.core.plugin_name().to_string(),
                )),
            }
        };
        match &outcome {
            Ok(()) => {
                self.record_event(
                    SecurityEventType::NetworkAccess,
                    format!("connect allowed: {endpoint}:{port}"),
                    Severity::Low,
                )
                .await;
            }
            Err(err) => {
                self.record_event(
                    SecurityEventType::NetworkAccess,
                    format!("connect denied: {err}"),
                    Severity::Medium,
                )
                .await;
            }
        }
        outcome
    }

    pub fn release_connection(&self) {
        if let Some(gate) = self.net_gate.lock().expect("net gate poisoned").as_ref() {
            gate.release_connection();
        }
    }
}

/// Aborts the spawned action task when the surrounding execution
/// future is dropped, e.g. by the execution-ceiling timeout.
struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[async_trait]
impl PluginSandbox for ContainerSandbox {
    async fn initialize(&self, policy: &SecurityPolicy) -> Result<(), SecurityError> {
        // The gate bookkeeping makes sampling expensive here; floor the
        // monitoring interval so a policy cannot demand faster checks.
        let mut policy = policy.clone();
        policy.monitoring.check_interval_ms = policy
            .monitoring
            .check_interval_ms
            .max(CONTAINER_MIN_CHECK_INTERVAL_MS);
        self.core.initialize(&policy)?;
        *self.fs_gate.lock().expect("fs gate poisoned") =
            Some(FileSystemGate::new(policy.file_system.clone()));
        *self.net_gate.lock().expect("net gate poisoned") =
            Some(NetworkGate::new(policy.network.clone()));
        info!(plugin = %self.core.plugin_name(), "container sandbox initialized");
        Ok(())
    }

    async fn execute(&self, action: SandboxAction) -> SandboxResult {
        let plugin = self.core.plugin_name().to_string();
        let audit = self.audit.clone();
        let (name, work) = action.into_parts();

        // Spawned so a panic inside the action surfaces as a join
        // error instead of unwinding through the sandbox. The spawn
        // happens inside the wrapped future: a rejected execution never
        // polls it, so the task never starts, and dropping the future
        // on timeout aborts the task instead of detaching it.
        let contained = SandboxAction::new(name.clone(), async move {
            let handle = tokio::spawn(work);
            let _abort = AbortOnDrop(handle.abort_handle());
            match handle.await {
                Ok(result) => result,
                Err(join) if join.is_panic() => {
                    warn!(plugin = %plugin, action = %name, "action panicked");
                    if let Some(audit) = audit {
                        audit
                            .record(SecurityEvent::new(
                                SecurityEventType::SecurityViolation,
                                &plugin,
                                format!("action '{name}' panicked"),
                                Severity::High,
                            ))
                            .await;
                    }
                    Err(SecurityError::Config(format!("action '{name}' panicked")))
                }
                Err(join) => Err(SecurityError::Config(format!(
                    "action '{name}' aborted: {join}"
                ))),
            }
        });

        self.core.run_with_ceiling(contained).await
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
        *self.fs_gate.lock().expect("fs gate poisoned") = None;
        *self.net_gate.lock().expect("net gate poisoned") = None;
        Ok(())
    }

    async fn teardown(&self) {
        self.core.deactivate();
        *self.fs_gate.lock().expect("fs gate poisoned") = None;
        *self.net_gate.lock().expect("net gate poisoned") = None;
        debug!(plugin = %self.core.plugin_name(), "container sandbox torn down");
    }

    fn is_active(&self) -> bool {
        self.core.is_active()
    }

    fn plugin_name(&self) -> &str {
        self.core.plugin_name()
    }

    fn strategy_name(&self) -> &'static str {
        "container"
    }
}
