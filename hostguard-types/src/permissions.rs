//! Capability bitmask for plugin permissions.
//!
//! Permissions are independent flags combined into sets. A plugin's
//! default set must always be a subset of its maximum set; the policy
//! validator enforces this.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Individual capabilities a plugin may hold.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PluginPermissions: u32 {
        const READ_ONLY_ACCESS   = 1 << 0;
        const STORAGE_WRITE      = 1 << 1;
        const NETWORK_ACCESS     = 1 << 2;
        const FILE_SYSTEM_ACCESS = 1 << 3;
        const RPC_METHODS        = 1 << 4;
        const CRYPTOGRAPHY       = 1 << 5;
        const PROCESS_SPAWN      = 1 << 6;
        const ADMIN_ACCESS       = 1 << 7;
        const PLUGIN_LOADING     = 1 << 8;
    }
}

impl PluginPermissions {
    /// Baseline grant for any loaded plugin.
    pub fn basic() -> Self {
        Self::READ_ONLY_ACCESS
    }

    /// Read access plus outbound network.
    pub fn network_plugin() -> Self {
        Self::READ_ONLY_ACCESS | Self::NETWORK_ACCESS
    }

    /// Read access plus local persistence.
    pub fn storage_plugin() -> Self {
        Self::READ_ONLY_ACCESS | Self::STORAGE_WRITE | Self::FILE_SYSTEM_ACCESS
    }

    /// Everything. Reserved for first-party tooling.
    pub fn full_trust() -> Self {
        Self::all()
    }

    /// True when every flag in `required` is present in `self`.
    pub fn permits(&self, required: PluginPermissions) -> bool {
        (*self & required) == required
    }
}

impl Default for PluginPermissions {
    fn default() -> Self {
        Self::basic()
    }
}

impl std::fmt::Display for PluginPermissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        bitflags::parser::to_writer(self, f)
    }
}
