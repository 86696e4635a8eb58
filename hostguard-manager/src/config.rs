//! Policy configuration loading.
//!
//! TOML file with a `[default_policy]` table and optional
//! `[plugins.<name>]` override tables. Missing or malformed
//! configuration falls back to the built-in default policy, which is
//! always valid.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use hostguard_types::{
    FileSystemPolicy, MonitoringPolicy, NetworkPolicy, PluginPermissions, SandboxKind,
    SecurityPolicy, ViolationAction,
};

/// Raw policy table as written in the file. Every field is optional;
/// unset fields inherit from the built-in default.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PolicyTable {
    default_permissions: Option<PluginPermissions>,
    max_permissions: Option<PluginPermissions>,
    max_memory_bytes: Option<u64>,
    max_cpu_percent: Option<u32>,
    max_threads: Option<u32>,
    max_execution_time_secs: Option<u64>,
    violation_action: Option<ViolationAction>,
    strict_mode: Option<bool>,
    require_signed_plugins: Option<bool>,
    enable_detailed_monitoring: Option<bool>,
    sandbox_type: Option<SandboxKind>,
    file_system: Option<FileSystemTable>,
    network: Option<NetworkTable>,
    monitoring: Option<MonitoringTable>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSystemTable {
    allow_file_system_access: Option<bool>,
    allowed_paths: Option<Vec<String>>,
    restricted_paths: Option<Vec<String>>,
    max_file_size: Option<u64>,
    max_total_files: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct NetworkTable {
    allow_network_access: Option<bool>,
    allowed_endpoints: Option<Vec<String>>,
    blocked_endpoints: Option<Vec<String>>,
    allowed_ports: Option<Vec<u16>>,
    max_connections: Option<u32>,
    require_tls: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MonitoringTable {
    enable_monitoring: Option<bool>,
    check_interval_ms: Option<u64>,
    memory_warning_threshold: Option<f64>,
    cpu_warning_threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    default_policy: PolicyTable,
    plugins: HashMap<String, PolicyTable>,
}

impl PolicyTable {
    fn apply_to(&self, base: &SecurityPolicy) -> SecurityPolicy {
        let mut policy = base.clone();
        if let Some(v) = self.default_permissions {
            policy.default_permissions = v;
        }
        if let Some(v) = self.max_permissions {
            policy.max_permissions = v;
        }
        if let Some(v) = self.max_memory_bytes {
            policy.max_memory_bytes = v;
        }
        if let Some(v) = self.max_cpu_percent {
            policy.max_cpu_percent = v;
        }
        if let Some(v) = self.max_threads {
            policy.max_threads = v;
        }
        if let Some(v) = self.max_execution_time_secs {
            policy.max_execution_time_secs = v;
        }
        if let Some(v) = self.violation_action {
            policy.violation_action = v;
        }
        if let Some(v) = self.strict_mode {
            policy.strict_mode = v;
        }
        if let Some(v) = self.require_signed_plugins {
            policy.require_signed_plugins = v;
        }
        if let Some(v) = self.enable_detailed_monitoring {
            policy.enable_detailed_monitoring = v;
        }
        if let Some(v) = self.sandbox_type {
            policy.sandbox_type = v;
        }
        if let Some(fs) = &self.file_system {
            let base_fs = FileSystemPolicy::default();
            policy.file_system = FileSystemPolicy {
                allow_file_system_access: fs
                    .allow_file_system_access
                    .unwrap_or(base_fs.allow_file_system_access),
                allowed_paths: fs.allowed_paths.clone().unwrap_or(base_fs.allowed_paths),
                restricted_paths: fs
                    .restricted_paths
                    .clone()
                    .unwrap_or(base_fs.restricted_paths),
                max_file_size: fs.max_file_size.unwrap_or(base_fs.max_file_size),
                max_total_files: fs.max_total_files.unwrap_or(base_fs.max_total_files),
            };
        }
        if let Some(net) = &self.network {
            let base_net = NetworkPolicy::default();
            policy.network = NetworkPolicy {
                allow_network_access: net
                    .allow_network_access
                    .unwrap_or(base_net.allow_network_access),
                allowed_endpoints: net
                    .allowed_endpoints
                    .clone()
                    .unwrap_or(base_net.allowed_endpoints),
                blocked_endpoints: net
                    .blocked_endpoints
                    .clone()
                    .unwrap_or(base_net.blocked_endpoints),
                allowed_ports: net.allowed_ports.clone().unwrap_or(base_net.allowed_ports),
                max_connections: net.max_connections.unwrap_or(base_net.max_connections),
                require_tls: net.require_tls.unwrap_or(base_net.require_tls),
            };
        }
        if let Some(mon) = &self.monitoring {
            let base_mon = MonitoringPolicy::default();
            policy.monitoring = MonitoringPolicy {
                enable_monitoring: mon.enable_monitoring.unwrap_or(base_mon.enable_monitoring),
                check_interval_ms: mon.check_interval_ms.unwrap_or(base_mon.check_interval_ms),
                memory_warning_threshold: mon
                    .memory_warning_threshold
                    .unwrap_or(base_mon.memory_warning_threshold),
                cpu_warning_threshold: mon
                    .cpu_warning_threshold
                    .unwrap_or(base_mon.cpu_warning_threshold),
            };
        }
        policy
    }
}

/// Resolved configuration: one default policy plus per-plugin
/// overrides, all validated at load time.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub default_policy: SecurityPolicy,
    pub plugin_policies: HashMap<String, SecurityPolicy>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            default_policy: SecurityPolicy::default(),
            plugin_policies: HashMap::new(),
        }
    }
}

impl SecurityConfig {
    /// Loads from a TOML file, falling back to the built-in default on
    /// any read or parse error.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_str_lossy(&contents),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "config not readable, using default policy");
                Self::default()
            }
        }
    }

    /// Parses TOML, dropping invalid per-plugin overrides with a
    /// warning rather than failing the whole load.
    pub fn from_str_lossy(contents: &str) -> Self {
        let file: ConfigFile = match toml::from_str(contents) {
            Ok(file) => file,
            Err(err) => {
                warn!(error = %err, "config parse failed, using default policy");
                return Self::default();
            }
        };

        let built_in = SecurityPolicy::default();
        let default_policy = {
            let candidate = file.default_policy.apply_to(&built_in);
            match candidate.validate() {
                Ok(()) => candidate,
                Err(err) => {
                    warn!(error = %err, "default policy invalid, using built-in default");
                    built_in.clone()
                }
            }
        };

        let mut plugin_policies = HashMap::new();
        for (plugin, table) in &file.plugins {
            let candidate = table.apply_to(&default_policy);
            match candidate.validate() {
                Ok(()) => {
                    plugin_policies.insert(plugin.clone(), candidate);
                }
                Err(err) => {
                    warn!(plugin, error = %err, "plugin policy invalid, ignoring override");
                }
            }
        }

        Self {
            default_policy,
            plugin_policies,
        }
    }

    /// The effective policy for a plugin: override or default.
    pub fn policy_for(&self, plugin: &str) -> SecurityPolicy {
        self.plugin_policies
            .get(plugin)
            .cloned()
            .unwrap_or_else(|| self.default_policy.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_config_is_default() {
        let config = SecurityConfig::from_str_lossy("");
        assert_eq!(config.default_policy, SecurityPolicy::default());
        assert!(config.plugin_policies.is_empty());
    }

    #[test]
    fn garbage_falls_back_to_default() {
        let config = SecurityConfig::from_str_lossy("not [valid toml ===");
        assert_eq!(config.default_policy, SecurityPolicy::default());
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let config = SecurityConfig::load(Path::new("/nonexistent/hostguard.toml"));
        assert_eq!(config.default_policy, SecurityPolicy::default());
    }

    #[test]
    fn default_policy_overrides_apply() {
        let config = SecurityConfig::from_str_lossy(
            r#"
            [default_policy]
            max_memory_bytes = 134217728
            max_cpu_percent = 40
            violation_action = "suspend"
            "#,
        );
        assert_eq!(config.default_policy.max_memory_bytes, 128 * 1024 * 1024);
        assert_eq!(config.default_policy.max_cpu_percent, 40);
        assert_eq!(
            config.default_policy.violation_action,
            ViolationAction::Suspend
        );
        // Untouched fields stay at built-in defaults.
        assert_eq!(
            config.default_policy.max_threads,
            SecurityPolicy::default().max_threads
        );
    }

    #[test]
    fn plugin_override_layers_on_default() {
        let config = SecurityConfig::from_str_lossy(
            r#"
            [default_policy]
            max_cpu_percent = 40

            [plugins.metrics]
            strict_mode = true
            sandbox_type = "container"

            [plugins.metrics.network]
            allow_network_access = true
            allowed_ports = [443]
            "#,
        );
        let metrics = config.policy_for("metrics");
        // Inherited from the file's default table.
        assert_eq!(metrics.max_cpu_percent, 40);
        assert!(metrics.strict_mode);
        assert_eq!(metrics.sandbox_type, SandboxKind::Container);
        assert!(metrics.network.allow_network_access);
        assert_eq!(metrics.network.allowed_ports, vec![443]);

        let other = config.policy_for("other");
        assert_eq!(other.max_cpu_percent, 40);
        assert!(!other.strict_mode);
    }

    #[test]
    fn invalid_plugin_override_is_dropped() {
        let config = SecurityConfig::from_str_lossy(
            r#"
            [plugins.broken]
            max_cpu_percent = 400
            "#,
        );
        assert!(config.plugin_policies.is_empty());
        // The broken plugin still gets the default policy.
        assert_eq!(config.policy_for("broken"), SecurityPolicy::default());
    }

    #[test]
    fn invalid_default_policy_reverts_to_built_in() {
        let config = SecurityConfig::from_str_lossy(
            r#"
            [default_policy]
            max_threads = 0
            "#,
        );
        assert_eq!(config.default_policy, SecurityPolicy::default());
    }

    #[test]
    fn load_from_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostguard.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
            [default_policy]
            max_execution_time_secs = 120
            "#
        )
        .unwrap();

        let config = SecurityConfig::load(&path);
        assert_eq!(config.default_policy.max_execution_time_secs, 120);
    }
}
