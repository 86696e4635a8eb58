//! Plugin isolation strategies.
//!
//! Every strategy implements the same [`PluginSandbox`] contract:
//! initialize against a validated policy, run units of plugin work
//! under a hard execution-time ceiling, answer permission checks from
//! the policy's maximum set, and expose idempotent suspend / resume /
//! terminate transitions. Strategy selection is a match over the
//! closed [`SandboxKind`](hostguard_types::SandboxKind) enum.

mod container;
mod controller;
mod core;
mod cross_platform;
mod factory;
mod isolated;
mod measure;
mod optimized;
mod passthrough;
mod platform;
mod process;
mod sandbox;

pub use container::ContainerSandbox;
pub use controller::{NullResourceController, ProcessResourceController};
pub use cross_platform::CrossPlatformSandbox;
pub use factory::{build_sandbox, select_kind, SandboxFactory};
pub use isolated::IsolatedLoaderSandbox;
pub use optimized::{ExecutionStats, OptimizedSandbox, PerformanceProfile};
pub use passthrough::PassThroughSandbox;
pub use platform::PlatformInfo;
pub use process::ProcessSandbox;
pub use sandbox::{PluginSandbox, SandboxAction, SandboxResult};
