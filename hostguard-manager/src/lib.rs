//! Orchestration layer: permission/policy caches, the state
//! coordinator, configuration loading, and the [`SecurityManager`]
//! façade that surrounding components call into.

mod cache;
mod config;
mod coordinator;
mod manager;

pub use cache::{CacheStatistics, SecurityCache};
pub use config::SecurityConfig;
pub use coordinator::{CoordinatorStatistics, GlobalSecurity, StateCoordinator};
pub use manager::{SecurityManager, SecurityStatistics};
