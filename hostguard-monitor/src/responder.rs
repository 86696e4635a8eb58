//! Violation action dispatch.

use async_trait::async_trait;

use hostguard_types::ViolationAction;

/// Applies the policy's violation action to a plugin. The production
/// implementation lives with the security manager; tests that exercise
/// the pipeline in isolation plug in [`NoopResponder`] to avoid
/// re-entering the façade.
#[async_trait]
pub trait ViolationResponder: Send + Sync {
    async fn respond(&self, plugin: &str, action: ViolationAction, detail: &str);
}

/// Swallows every violation. For isolated pipeline tests.
pub struct NoopResponder;

#[async_trait]
impl ViolationResponder for NoopResponder {
    async fn respond(&self, _plugin: &str, _action: ViolationAction, _detail: &str) {}
}
