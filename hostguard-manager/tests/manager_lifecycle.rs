//! End-to-end lifecycle tests against the manager façade.

use std::sync::Arc;
use std::time::Duration;

use hostguard_audit::AuditLog;
use hostguard_manager::{SecurityCache, SecurityConfig, SecurityManager, StateCoordinator};
use hostguard_sandbox::{PlatformInfo, SandboxAction, SandboxFactory};
use hostguard_types::{
    PluginPermissions, PluginStatus, ResourceSnapshot, SandboxKind, SecurityError,
    SecurityEventType, SecurityMode, SecurityPolicy, ViolationAction,
};

fn pass_through_policy() -> SecurityPolicy {
    // Pin the strategy so tests behave the same on every host.
    SecurityPolicy {
        sandbox_type: SandboxKind::PassThrough,
        ..SecurityPolicy::default()
    }
}

fn config_with(default_policy: SecurityPolicy) -> SecurityConfig {
    SecurityConfig {
        default_policy,
        plugin_policies: Default::default(),
    }
}

async fn manager_with(config: SecurityConfig) -> (SecurityManager, Arc<AuditLog>) {
    let audit = Arc::new(AuditLog::default());
    let factory = SandboxFactory::new(PlatformInfo::fixed("linux", false, false, false))
        .with_audit(audit.clone());
    let manager = SecurityManager::with_services(
        config,
        Arc::new(SecurityCache::without_sweeper()),
        Arc::new(StateCoordinator::without_sweeper()),
        audit.clone(),
        factory,
    );
    manager.initialize().await;
    (manager, audit)
}

fn noop_action() -> SandboxAction {
    SandboxAction::new("noop", async { Ok(serde_json::json!("done")) })
}

#[tokio::test]
async fn create_execute_remove_lifecycle() {
    let (manager, audit) = manager_with(config_with(pass_through_policy())).await;

    manager.create_sandbox("worker", None).await.unwrap();
    assert!(manager.is_sandboxed("worker").await);
    assert!(manager.sandbox_active("worker").await);
    assert_eq!(manager.plugin_status("worker").await, PluginStatus::Running);

    let result = manager.execute("worker", noop_action()).await;
    assert!(result.success);
    assert_eq!(result.output, Some(serde_json::json!("done")));

    manager.remove_sandbox("worker").await.unwrap();
    assert!(!manager.is_sandboxed("worker").await);
    assert_eq!(audit.by_type(SecurityEventType::PluginLoad).len(), 1);
    assert_eq!(audit.by_type(SecurityEventType::PluginUnload).len(), 1);
}

#[tokio::test]
async fn duplicate_create_is_rejected() {
    let (manager, _audit) = manager_with(config_with(pass_through_policy())).await;

    manager.create_sandbox("dup", None).await.unwrap();
    let err = manager.create_sandbox("dup", None).await.unwrap_err();
    assert!(matches!(err, SecurityError::SandboxAlreadyExists(_)));
    // The existing sandbox survives the rejected attempt.
    assert_eq!(manager.plugin_status("dup").await, PluginStatus::Running);
}

#[tokio::test]
async fn concurrent_creates_yield_exactly_one_sandbox() {
    let (manager, _audit) = manager_with(config_with(pass_through_policy())).await;
    let manager = Arc::new(manager);

    let mut attempts = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        attempts.push(tokio::spawn(async move {
            manager.create_sandbox("racy", None).await
        }));
    }
    let mut created = 0;
    let mut duplicates = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(()) => created += 1,
            Err(SecurityError::SandboxAlreadyExists(_)) => duplicates += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(duplicates, 7);

    // The surviving sandbox is intact and fully registered.
    assert_eq!(manager.plugin_status("racy").await, PluginStatus::Running);
    assert!(manager.sandbox_active("racy").await);
    let stats = manager.statistics().await;
    assert_eq!(stats.active_sandboxes, 1);
    assert_eq!(stats.monitor.monitored_plugins, 1);
    assert!(manager.execute("racy", noop_action()).await.success);
}

#[tokio::test]
async fn execute_unknown_plugin_is_rejected() {
    let (manager, _audit) = manager_with(config_with(pass_through_policy())).await;
    let result = manager.execute("ghost", noop_action()).await;
    assert!(!result.success);
    assert!(matches!(result.error, Some(SecurityError::PluginNotFound(_))));
}

#[tokio::test]
async fn suspend_blocks_execution_until_resume() {
    let (manager, _audit) = manager_with(config_with(pass_through_policy())).await;
    manager.create_sandbox("pausable", None).await.unwrap();

    manager.suspend_plugin("pausable").await.unwrap();
    assert_eq!(
        manager.plugin_status("pausable").await,
        PluginStatus::Suspended
    );
    let blocked = manager.execute("pausable", noop_action()).await;
    assert!(!blocked.success);
    assert!(matches!(
        blocked.error,
        Some(SecurityError::SandboxSuspended(_))
    ));

    manager.resume_plugin("pausable").await.unwrap();
    assert_eq!(
        manager.plugin_status("pausable").await,
        PluginStatus::Running
    );
    assert!(manager.execute("pausable", noop_action()).await.success);
}

#[tokio::test]
async fn terminate_is_permanent() {
    let (manager, _audit) = manager_with(config_with(pass_through_policy())).await;
    manager.create_sandbox("doomed", None).await.unwrap();

    manager.terminate_plugin("doomed").await.unwrap();
    assert_eq!(manager.plugin_status("doomed").await, PluginStatus::Stopped);
    assert!(!manager.sandbox_active("doomed").await);

    let result = manager.execute("doomed", noop_action()).await;
    assert!(!result.success);
}

#[tokio::test]
async fn timeout_fails_operation_but_keeps_sandbox_usable() {
    let mut policy = pass_through_policy();
    policy.max_execution_time_secs = 1;
    let (manager, _audit) = manager_with(config_with(policy)).await;
    manager.create_sandbox("slow", None).await.unwrap();

    let slow = SandboxAction::new("sleepy", async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(serde_json::json!(1))
    });
    let result = manager.execute("slow", slow).await;
    assert!(!result.success);
    assert!(result.is_timeout());

    // One timed-out operation does not poison the sandbox.
    assert!(manager.sandbox_active("slow").await);
    assert!(manager.execute("slow", noop_action()).await.success);
}

#[tokio::test]
async fn permission_checks_cache_and_audit_denials() {
    let mut policy = pass_through_policy();
    policy.max_permissions = PluginPermissions::basic();
    let (manager, audit) = manager_with(config_with(policy)).await;
    manager.create_sandbox("limited", None).await.unwrap();

    assert!(
        manager
            .check_permission("limited", PluginPermissions::READ_ONLY_ACCESS)
            .await
    );
    assert!(
        !manager
            .check_permission("limited", PluginPermissions::NETWORK_ACCESS)
            .await
    );
    // Both computed checks were audited as requests; only the second
    // additionally as a denial.
    assert_eq!(audit.by_type(SecurityEventType::PermissionRequest).len(), 2);
    assert_eq!(audit.by_type(SecurityEventType::PermissionDenied).len(), 1);

    // Second denial is served from the cache and not re-audited.
    assert!(
        !manager
            .check_permission("limited", PluginPermissions::NETWORK_ACCESS)
            .await
    );
    assert_eq!(audit.by_type(SecurityEventType::PermissionRequest).len(), 2);
    assert_eq!(audit.by_type(SecurityEventType::PermissionDenied).len(), 1);
}

#[tokio::test]
async fn permission_check_without_sandbox_uses_policy() {
    let mut policy = pass_through_policy();
    policy.max_permissions = PluginPermissions::network_plugin();
    let (manager, _audit) = manager_with(config_with(policy)).await;

    assert!(
        manager
            .check_permission("unloaded", PluginPermissions::NETWORK_ACCESS)
            .await
    );
    assert!(
        !manager
            .check_permission("unloaded", PluginPermissions::PLUGIN_LOADING)
            .await
    );
}

#[tokio::test]
async fn policy_override_must_be_valid() {
    let (manager, _audit) = manager_with(config_with(pass_through_policy())).await;

    let broken = SecurityPolicy {
        max_threads: 0,
        ..pass_through_policy()
    };
    let err = manager
        .create_sandbox("broken", Some(broken))
        .await
        .unwrap_err();
    assert!(matches!(err, SecurityError::PolicyValidation(_)));
    assert_eq!(manager.plugin_status("broken").await, PluginStatus::Error);
    assert!(!manager.is_sandboxed("broken").await);
}

#[tokio::test]
async fn monitor_violation_terminates_plugin() {
    let mut policy = pass_through_policy();
    policy.violation_action = ViolationAction::Terminate;
    let (manager, _audit) = manager_with(config_with(policy.clone())).await;
    manager.create_sandbox("hog", None).await.unwrap();

    manager.monitor().report_usage(
        "hog",
        ResourceSnapshot::now(policy.max_memory_bytes + 1, 0, 1, 0),
    );

    // The monitor pipeline is asynchronous; poll for the response.
    for _ in 0..200 {
        if manager.plugin_status("hog").await == PluginStatus::Error {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(manager.plugin_status("hog").await, PluginStatus::Error);
    assert!(!manager.sandbox_active("hog").await);
}

#[tokio::test]
async fn monitor_violation_suspends_plugin() {
    let mut policy = pass_through_policy();
    policy.violation_action = ViolationAction::Suspend;
    let (manager, _audit) = manager_with(config_with(policy.clone())).await;
    manager.create_sandbox("warm", None).await.unwrap();

    manager.monitor().report_usage(
        "warm",
        ResourceSnapshot::now(policy.max_memory_bytes + 1, 0, 1, 0),
    );
    for _ in 0..200 {
        if manager.plugin_status("warm").await == PluginStatus::Suspended {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        manager.plugin_status("warm").await,
        PluginStatus::Suspended
    );
    // Suspension is recoverable.
    manager.resume_plugin("warm").await.unwrap();
    assert!(manager.execute("warm", noop_action()).await.success);
}

#[tokio::test]
async fn disabling_security_blocks_new_sandboxes() {
    let (manager, _audit) = manager_with(config_with(pass_through_policy())).await;
    manager
        .set_security_enabled(false, SecurityMode::Disabled)
        .await
        .unwrap();

    let err = manager.create_sandbox("late", None).await.unwrap_err();
    assert!(matches!(err, SecurityError::Config(_)));

    manager
        .set_security_enabled(true, SecurityMode::Default)
        .await
        .unwrap();
    manager.create_sandbox("late", None).await.unwrap();
}

#[tokio::test]
async fn reload_config_applies_new_policies() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hostguard.toml");
    std::fs::write(
        &path,
        r#"
        [default_policy]
        sandbox_type = "pass_through"
        max_execution_time_secs = 42
        "#,
    )
    .unwrap();

    let (manager, _audit) = manager_with(config_with(pass_through_policy())).await;
    // Warm the policy cache, then reload.
    let before = manager.resolve_policy("fresh").await;
    assert_ne!(before.max_execution_time_secs, 42);

    manager.reload_config(&path).await.unwrap();
    let after = manager.resolve_policy("fresh").await;
    assert_eq!(after.max_execution_time_secs, 42);
}

#[tokio::test]
async fn statistics_aggregate_all_services() {
    let (manager, _audit) = manager_with(config_with(pass_through_policy())).await;
    manager.create_sandbox("a", None).await.unwrap();
    manager.create_sandbox("b", None).await.unwrap();
    manager.execute("a", noop_action()).await;

    let stats = manager.statistics().await;
    assert_eq!(stats.active_sandboxes, 2);
    assert_eq!(stats.coordinator.plugin_states, 2);
    assert!(stats.audit.total_recorded >= 2);
    assert_eq!(stats.monitor.monitored_plugins, 2);
}

#[tokio::test]
async fn initialize_unblocks_waiting_operations() {
    let audit = Arc::new(AuditLog::default());
    let factory = SandboxFactory::new(PlatformInfo::fixed("linux", false, false, false));
    let manager = Arc::new(SecurityManager::with_services(
        config_with(pass_through_policy()),
        Arc::new(SecurityCache::without_sweeper()),
        Arc::new(StateCoordinator::without_sweeper()),
        audit,
        factory,
    ));

    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.create_sandbox("early", None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    manager.initialize().await;
    waiter.await.unwrap().unwrap();
    assert_eq!(manager.plugin_status("early").await, PluginStatus::Running);
}

#[tokio::test]
async fn shutdown_tears_everything_down() {
    let (manager, _audit) = manager_with(config_with(pass_through_policy())).await;
    manager.create_sandbox("a", None).await.unwrap();
    manager.create_sandbox("b", None).await.unwrap();

    manager.shutdown().await;
    assert!(!manager.is_sandboxed("a").await);
    assert!(!manager.is_sandboxed("b").await);
    assert_eq!(manager.statistics().await.active_sandboxes, 0);
}
