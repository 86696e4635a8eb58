//! Security policy model.
//!
//! A policy describes what one plugin may do and the limits it must
//! respect. Policies are built from the tiered constructors or loaded
//! from configuration, validated once, and treated as immutable
//! afterward. A policy change for a plugin invalidates that plugin's
//! cached permission and policy entries.

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::SecurityError;
use crate::permissions::PluginPermissions;

/// What happens when a plugin breaches a resource ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationAction {
    #[default]
    Log,
    Suspend,
    Terminate,
}

/// Closed set of sandbox strategies. Dispatch is a match over this
/// enum; there is no dynamic strategy discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxKind {
    PassThrough,
    IsolatedLoader,
    Container,
    Process,
    #[default]
    CrossPlatform,
}

/// File system access rules nested inside a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSystemPolicy {
    pub allow_file_system_access: bool,
    pub allowed_paths: Vec<String>,
    pub restricted_paths: Vec<String>,
    pub max_file_size: u64,
    pub max_total_files: u32,
}

impl Default for FileSystemPolicy {
    fn default() -> Self {
        Self {
            allow_file_system_access: false,
            allowed_paths: Vec::new(),
            restricted_paths: Vec::new(),
            max_file_size: constants::DEFAULT_MAX_FILE_SIZE,
            max_total_files: constants::DEFAULT_MAX_TOTAL_FILES,
        }
    }
}

/// Network access rules nested inside a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    pub allow_network_access: bool,
    pub allowed_endpoints: Vec<String>,
    pub blocked_endpoints: Vec<String>,
    pub allowed_ports: Vec<u16>,
    pub max_connections: u32,
    pub require_tls: bool,
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        Self {
            allow_network_access: false,
            allowed_endpoints: Vec::new(),
            blocked_endpoints: Vec::new(),
            allowed_ports: constants::DEFAULT_ALLOWED_PORTS.to_vec(),
            max_connections: constants::DEFAULT_MAX_CONNECTIONS,
            require_tls: true,
        }
    }
}

/// Resource monitoring configuration nested inside a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringPolicy {
    pub enable_monitoring: bool,
    pub check_interval_ms: u64,
    /// Fraction of the memory ceiling at which warnings start, in [0, 1].
    pub memory_warning_threshold: f64,
    /// Fraction of the CPU ceiling at which warnings start, in [0, 1].
    pub cpu_warning_threshold: f64,
}

impl Default for MonitoringPolicy {
    fn default() -> Self {
        Self {
            enable_monitoring: true,
            check_interval_ms: constants::DEFAULT_CHECK_INTERVAL_MS,
            memory_warning_threshold: constants::MEMORY_WARNING_THRESHOLD,
            cpu_warning_threshold: constants::CPU_WARNING_THRESHOLD,
        }
    }
}

/// Per-plugin (or default) security configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub default_permissions: PluginPermissions,
    pub max_permissions: PluginPermissions,
    pub max_memory_bytes: u64,
    pub max_cpu_percent: u32,
    pub max_threads: u32,
    pub max_execution_time_secs: u64,
    pub violation_action: ViolationAction,
    pub strict_mode: bool,
    pub require_signed_plugins: bool,
    pub enable_detailed_monitoring: bool,
    pub sandbox_type: SandboxKind,
    pub file_system: FileSystemPolicy,
    pub network: NetworkPolicy,
    pub monitoring: MonitoringPolicy,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            default_permissions: PluginPermissions::basic(),
            max_permissions: PluginPermissions::storage_plugin()
                | PluginPermissions::NETWORK_ACCESS
                | PluginPermissions::RPC_METHODS,
            max_memory_bytes: constants::DEFAULT_MAX_MEMORY_BYTES,
            max_cpu_percent: constants::DEFAULT_MAX_CPU_PERCENT,
            max_threads: constants::DEFAULT_MAX_THREADS,
            max_execution_time_secs: constants::DEFAULT_MAX_EXECUTION_SECS,
            violation_action: ViolationAction::Log,
            strict_mode: false,
            require_signed_plugins: false,
            enable_detailed_monitoring: false,
            sandbox_type: SandboxKind::CrossPlatform,
            file_system: FileSystemPolicy::default(),
            network: NetworkPolicy::default(),
            monitoring: MonitoringPolicy::default(),
        }
    }
}

impl SecurityPolicy {
    /// Tight limits for untrusted third-party plugins.
    pub fn restrictive() -> Self {
        Self {
            default_permissions: PluginPermissions::basic(),
            max_permissions: PluginPermissions::basic(),
            max_memory_bytes: constants::RESTRICTIVE_MAX_MEMORY_BYTES,
            max_cpu_percent: constants::RESTRICTIVE_MAX_CPU_PERCENT,
            max_threads: constants::RESTRICTIVE_MAX_THREADS,
            max_execution_time_secs: constants::RESTRICTIVE_MAX_EXECUTION_SECS,
            violation_action: ViolationAction::Terminate,
            strict_mode: true,
            require_signed_plugins: true,
            ..Self::default()
        }
    }

    /// Relaxed limits for first-party or vetted plugins.
    pub fn permissive() -> Self {
        Self {
            default_permissions: PluginPermissions::storage_plugin(),
            max_permissions: PluginPermissions::full_trust(),
            max_memory_bytes: constants::PERMISSIVE_MAX_MEMORY_BYTES,
            max_cpu_percent: constants::PERMISSIVE_MAX_CPU_PERCENT,
            max_threads: constants::PERMISSIVE_MAX_THREADS,
            max_execution_time_secs: constants::PERMISSIVE_MAX_EXECUTION_SECS,
            violation_action: ViolationAction::Log,
            ..Self::default()
        }
    }

    /// Checks every field and collects all problems before reporting.
    /// A failed validation never partially applies.
    pub fn validate(&self) -> Result<(), SecurityError> {
        let mut errors = Vec::new();

        if !self.max_permissions.permits(self.default_permissions) {
            errors.push(format!(
                "default permissions ({}) exceed maximum permissions ({})",
                self.default_permissions, self.max_permissions
            ));
        }
        if self.max_memory_bytes < constants::MIN_MEMORY_BYTES {
            errors.push(format!(
                "max_memory_bytes must be at least {} (got {})",
                constants::MIN_MEMORY_BYTES,
                self.max_memory_bytes
            ));
        }
        if self.max_cpu_percent == 0 || self.max_cpu_percent > 100 {
            errors.push(format!(
                "max_cpu_percent must be in 1..=100 (got {})",
                self.max_cpu_percent
            ));
        }
        if self.max_threads == 0 {
            errors.push("max_threads must be at least 1".to_string());
        }
        if self.max_execution_time_secs == 0 {
            errors.push("max_execution_time_secs must be at least 1".to_string());
        }
        if self.monitoring.check_interval_ms < constants::MIN_CHECK_INTERVAL_MS {
            errors.push(format!(
                "monitoring check_interval_ms must be at least {} (got {})",
                constants::MIN_CHECK_INTERVAL_MS,
                self.monitoring.check_interval_ms
            ));
        }
        if !(0.0..=1.0).contains(&self.monitoring.memory_warning_threshold) {
            errors.push(format!(
                "memory_warning_threshold must be in [0, 1] (got {})",
                self.monitoring.memory_warning_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.monitoring.cpu_warning_threshold) {
            errors.push(format!(
                "cpu_warning_threshold must be in [0, 1] (got {})",
                self.monitoring.cpu_warning_threshold
            ));
        }
        if self.file_system.max_file_size == 0 {
            errors.push("file_system max_file_size must be at least 1".to_string());
        }
        if self.file_system.max_total_files == 0 {
            errors.push("file_system max_total_files must be at least 1".to_string());
        }
        if self.network.max_connections == 0 {
            errors.push("network max_connections must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SecurityError::PolicyValidation(errors))
        }
    }

    /// The execution ceiling as milliseconds, for timeout arithmetic.
    pub fn max_execution_time_ms(&self) -> u64 {
        self.max_execution_time_secs * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_policy_is_valid() {
        assert!(SecurityPolicy::default().validate().is_ok());
    }

    #[test]
    fn tiered_policies_are_valid() {
        assert!(SecurityPolicy::restrictive().validate().is_ok());
        assert!(SecurityPolicy::permissive().validate().is_ok());
    }

    #[test]
    fn default_subset_of_max_enforced() {
        let policy = SecurityPolicy {
            default_permissions: PluginPermissions::full_trust(),
            max_permissions: PluginPermissions::basic(),
            ..SecurityPolicy::default()
        };
        let err = policy.validate().unwrap_err();
        match err {
            SecurityError::PolicyValidation(errors) => {
                assert!(errors.iter().any(|e| e.contains("exceed maximum")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn validation_collects_all_errors() {
        let policy = SecurityPolicy {
            max_cpu_percent: 0,
            max_threads: 0,
            max_execution_time_secs: 0,
            ..SecurityPolicy::default()
        };
        match policy.validate().unwrap_err() {
            SecurityError::PolicyValidation(errors) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn warning_thresholds_bounded() {
        let mut policy = SecurityPolicy::default();
        policy.monitoring.cpu_warning_threshold = 1.5;
        assert!(policy.validate().is_err());

        policy.monitoring.cpu_warning_threshold = 1.0;
        assert!(policy.validate().is_ok());

        policy.monitoring.memory_warning_threshold = -0.1;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn check_interval_floor() {
        let mut policy = SecurityPolicy::default();
        policy.monitoring.check_interval_ms = 50;
        assert!(policy.validate().is_err());

        policy.monitoring.check_interval_ms = constants::MIN_CHECK_INTERVAL_MS;
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn restrictive_tighter_than_permissive() {
        let r = SecurityPolicy::restrictive();
        let p = SecurityPolicy::permissive();
        assert!(r.max_memory_bytes < p.max_memory_bytes);
        assert!(r.max_cpu_percent < p.max_cpu_percent);
        assert!(r.max_threads < p.max_threads);
        assert_eq!(r.violation_action, ViolationAction::Terminate);
        assert_eq!(p.violation_action, ViolationAction::Log);
    }

    #[test]
    fn serde_round_trip() {
        let policy = SecurityPolicy::restrictive();
        let json = serde_json::to_string(&policy).unwrap();
        let back: SecurityPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, back);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Permission validation is exactly the subset relation:
            // default ⊆ max validates, anything else fails.
            #[test]
            fn permission_validity_is_subset_relation(
                default_bits in 0u32..512,
                max_bits in 0u32..512,
            ) {
                let policy = SecurityPolicy {
                    default_permissions: PluginPermissions::from_bits_truncate(default_bits),
                    max_permissions: PluginPermissions::from_bits_truncate(max_bits),
                    ..SecurityPolicy::default()
                };
                prop_assert_eq!(
                    policy.validate().is_ok(),
                    policy.max_permissions.permits(policy.default_permissions)
                );
            }

            // Strict mode never changes the answer of a permission check.
            #[test]
            fn permits_independent_of_strict_mode(
                held_bits in 0u32..512,
                asked_bits in 0u32..512,
            ) {
                let held = PluginPermissions::from_bits_truncate(held_bits);
                let asked = PluginPermissions::from_bits_truncate(asked_bits);
                let lax = SecurityPolicy {
                    max_permissions: held,
                    strict_mode: false,
                    ..SecurityPolicy::default()
                };
                let strict = SecurityPolicy {
                    strict_mode: true,
                    ..lax.clone()
                };
                prop_assert_eq!(
                    lax.max_permissions.permits(asked),
                    strict.max_permissions.permits(asked)
                );
            }
        }
    }
}
