//! Boundary trait for OS-level process resource enforcement.
//!
//! Job objects, cgroups, and signal-based suspend live behind this
//! trait in host-supplied implementations. The core only consumes the
//! capability.

use async_trait::async_trait;

use hostguard_types::{ProcessUsage, SecurityError};

/// Platform-specific enforcement of memory/CPU ceilings and
/// suspend/resume for an external process.
#[async_trait]
pub trait ProcessResourceController: Send + Sync {
    async fn suspend(&self, pid: u32) -> Result<(), SecurityError>;

    async fn resume(&self, pid: u32) -> Result<(), SecurityError>;

    async fn apply_limits(
        &self,
        pid: u32,
        memory_ceiling_bytes: u64,
        cpu_ceiling_percent: u32,
    ) -> Result<(), SecurityError>;

    async fn usage(&self, pid: u32) -> Result<ProcessUsage, SecurityError>;
}

/// Default controller for hosts without a platform bridge. Every call
/// fails with a typed `Unsupported` error so callers must handle the
/// absence explicitly.
pub struct NullResourceController;

#[async_trait]
impl ProcessResourceController for NullResourceController {
    async fn suspend(&self, pid: u32) -> Result<(), SecurityError> {
        Err(SecurityError::Unsupported(format!(
            "no process controller available to suspend pid {pid}"
        )))
    }

    async fn resume(&self, pid: u32) -> Result<(), SecurityError> {
        Err(SecurityError::Unsupported(format!(
            "no process controller available to resume pid {pid}"
        )))
    }

    async fn apply_limits(
        &self,
        pid: u32,
        _memory_ceiling_bytes: u64,
        _cpu_ceiling_percent: u32,
    ) -> Result<(), SecurityError> {
        Err(SecurityError::Unsupported(format!(
            "no process controller available to limit pid {pid}"
        )))
    }

    async fn usage(&self, pid: u32) -> Result<ProcessUsage, SecurityError> {
        Err(SecurityError::Unsupported(format!(
            "no process controller available to sample pid {pid}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_controller_is_typed_unsupported() {
        let controller = NullResourceController;
        assert!(matches!(
            controller.suspend(42).await,
            Err(SecurityError::Unsupported(_))
        ));
        assert!(matches!(
            controller.usage(42).await,
            Err(SecurityError::Unsupported(_))
        ));
        assert!(matches!(
            controller.apply_limits(42, 1024, 50).await,
            Err(SecurityError::Unsupported(_))
        ));
    }
}
