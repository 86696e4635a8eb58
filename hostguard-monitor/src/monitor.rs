//! The monitoring pipeline itself.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hostguard_audit::AuditLog;
use hostguard_types::constants::SNAPSHOT_WINDOW;
use hostguard_types::{
    ResourceSnapshot, ResourceUsage, SecurityEvent, SecurityEventType, SecurityPolicy, Severity,
};

use crate::responder::ViolationResponder;

enum MonitorEvent {
    UsageReport {
        plugin: String,
        snapshot: ResourceSnapshot,
    },
    OperationStart {
        plugin: String,
        op_id: Uuid,
        at: DateTime<Utc>,
    },
    OperationEnd {
        plugin: String,
        op_id: Uuid,
        usage: ResourceUsage,
        at: DateTime<Utc>,
    },
    Shutdown,
}

/// Host-facing notification fanned out on the broadcast channel.
#[derive(Debug, Clone)]
pub enum MonitorNotice {
    Violation {
        plugin: String,
        detail: String,
        policy: SecurityPolicy,
    },
    Warning {
        plugin: String,
        detail: String,
        policy: SecurityPolicy,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    pub events_processed: u64,
    pub violations_raised: u64,
    pub warnings_raised: u64,
    pub monitored_plugins: usize,
    pub open_operations: usize,
    /// Snapshots currently held in each plugin's rolling window.
    pub window_depths: HashMap<String, usize>,
}

struct OpenOperation {
    started_at: DateTime<Utc>,
}

struct Monitored {
    policy: SecurityPolicy,
    window: VecDeque<ResourceSnapshot>,
    open_ops: HashMap<Uuid, OpenOperation>,
}

struct Shared {
    plugins: Mutex<HashMap<String, Monitored>>,
    events_processed: AtomicU64,
    violations: AtomicU64,
    warnings: AtomicU64,
    responder: Arc<dyn ViolationResponder>,
    audit: Option<Arc<AuditLog>>,
    notices: broadcast::Sender<MonitorNotice>,
}

/// Multi-producer, single-consumer monitoring pipeline. Construct one
/// per host and share it by `Arc`.
pub struct ResourceMonitor {
    tx: mpsc::UnboundedSender<MonitorEvent>,
    shared: Arc<Shared>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl ResourceMonitor {
    pub fn new(responder: Arc<dyn ViolationResponder>) -> Self {
        Self::build(responder, None)
    }

    pub fn with_audit(responder: Arc<dyn ViolationResponder>, audit: Arc<AuditLog>) -> Self {
        Self::build(responder, Some(audit))
    }

    fn build(responder: Arc<dyn ViolationResponder>, audit: Option<Arc<AuditLog>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(256);
        let shared = Arc::new(Shared {
            plugins: Mutex::new(HashMap::new()),
            events_processed: AtomicU64::new(0),
            violations: AtomicU64::new(0),
            warnings: AtomicU64::new(0),
            responder,
            audit,
            notices,
        });
        let consumer = tokio::spawn(consume(rx, shared.clone()));
        Self {
            tx,
            shared,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    /// Starts monitoring a plugin. A policy with monitoring disabled
    /// is not registered; its events are dropped.
    pub fn register(&self, plugin: &str, policy: &SecurityPolicy) {
        if !policy.monitoring.enable_monitoring {
            debug!(plugin, "monitoring disabled by policy, not registering");
            return;
        }
        let mut plugins = self.shared.plugins.lock().expect("monitor map poisoned");
        plugins.insert(
            plugin.to_string(),
            Monitored {
                policy: policy.clone(),
                window: VecDeque::with_capacity(SNAPSHOT_WINDOW),
                open_ops: HashMap::new(),
            },
        );
        info!(plugin, "plugin registered for monitoring");
    }

    pub fn unregister(&self, plugin: &str) {
        let mut plugins = self.shared.plugins.lock().expect("monitor map poisoned");
        if plugins.remove(plugin).is_some() {
            info!(plugin, "plugin unregistered from monitoring");
        }
    }

    pub fn is_registered(&self, plugin: &str) -> bool {
        self.shared
            .plugins
            .lock()
            .expect("monitor map poisoned")
            .contains_key(plugin)
    }

    pub fn report_usage(&self, plugin: &str, snapshot: ResourceSnapshot) {
        let _ = self.tx.send(MonitorEvent::UsageReport {
            plugin: plugin.to_string(),
            snapshot,
        });
    }

    pub fn operation_started(&self, plugin: &str, op_id: Uuid) {
        let _ = self.tx.send(MonitorEvent::OperationStart {
            plugin: plugin.to_string(),
            op_id,
            at: Utc::now(),
        });
    }

    pub fn operation_ended(&self, plugin: &str, op_id: Uuid, usage: ResourceUsage) {
        let _ = self.tx.send(MonitorEvent::OperationEnd {
            plugin: plugin.to_string(),
            op_id,
            usage,
            at: Utc::now(),
        });
    }

    /// Subscribes to violation and warning notices.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorNotice> {
        self.shared.notices.subscribe()
    }

    pub fn stats(&self) -> MonitorStats {
        let plugins = self.shared.plugins.lock().expect("monitor map poisoned");
        MonitorStats {
            events_processed: self.shared.events_processed.load(Ordering::Relaxed),
            violations_raised: self.shared.violations.load(Ordering::Relaxed),
            warnings_raised: self.shared.warnings.load(Ordering::Relaxed),
            monitored_plugins: plugins.len(),
            open_operations: plugins.values().map(|m| m.open_ops.len()).sum(),
            window_depths: plugins
                .iter()
                .map(|(name, m)| (name.clone(), m.window.len()))
                .collect(),
        }
    }

    /// Drains the queue and stops the consumer task.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(MonitorEvent::Shutdown);
        let handle = self
            .consumer
            .lock()
            .expect("consumer handle poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn consume(mut rx: mpsc::UnboundedReceiver<MonitorEvent>, shared: Arc<Shared>) {
    while let Some(event) = rx.recv().await {
        shared.events_processed.fetch_add(1, Ordering::Relaxed);
        match event {
            MonitorEvent::UsageReport { plugin, snapshot } => {
                handle_usage(&shared, &plugin, snapshot).await;
            }
            MonitorEvent::OperationStart { plugin, op_id, at } => {
                let mut plugins = shared.plugins.lock().expect("monitor map poisoned");
                if let Some(monitored) = plugins.get_mut(&plugin) {
                    monitored
                        .open_ops
                        .insert(op_id, OpenOperation { started_at: at });
                }
            }
            MonitorEvent::OperationEnd {
                plugin,
                op_id,
                usage,
                at,
            } => {
                handle_operation_end(&shared, &plugin, op_id, usage, at).await;
            }
            MonitorEvent::Shutdown => break,
        }
    }
    debug!("resource monitor consumer stopped");
}

async fn handle_usage(shared: &Arc<Shared>, plugin: &str, snapshot: ResourceSnapshot) {
    // Collect findings under the lock, dispatch after releasing it.
    let mut violations = Vec::new();
    let mut warnings = Vec::new();
    let policy = {
        let mut plugins = shared.plugins.lock().expect("monitor map poisoned");
        let Some(monitored) = plugins.get_mut(plugin) else {
            return;
        };

        if monitored.window.len() >= SNAPSHOT_WINDOW {
            monitored.window.pop_front();
        }
        monitored.window.push_back(snapshot);

        let policy = &monitored.policy;
        let cpu_avg = trailing_cpu_average(&monitored.window);

        if snapshot.memory_bytes > policy.max_memory_bytes {
            violations.push(format!(
                "memory {} over ceiling {}",
                snapshot.memory_bytes, policy.max_memory_bytes
            ));
        } else if snapshot.memory_bytes as f64
            >= policy.max_memory_bytes as f64 * policy.monitoring.memory_warning_threshold
        {
            warnings.push(format!(
                "memory {} at {:.0}% of ceiling {}",
                snapshot.memory_bytes,
                100.0 * snapshot.memory_bytes as f64 / policy.max_memory_bytes as f64,
                policy.max_memory_bytes
            ));
        }

        if snapshot.thread_count > policy.max_threads {
            violations.push(format!(
                "threads {} over ceiling {}",
                snapshot.thread_count, policy.max_threads
            ));
        }

        if cpu_avg > policy.max_cpu_percent as f64 {
            violations.push(format!(
                "trailing cpu average {:.1}% over ceiling {}%",
                cpu_avg, policy.max_cpu_percent
            ));
        } else if cpu_avg
            >= policy.max_cpu_percent as f64 * policy.monitoring.cpu_warning_threshold
        {
            warnings.push(format!(
                "trailing cpu average {:.1}% nearing ceiling {}%",
                cpu_avg, policy.max_cpu_percent
            ));
        }

        policy.clone()
    };

    for detail in violations {
        raise_violation(shared, plugin, &policy, detail).await;
    }
    for detail in warnings {
        raise_warning(shared, plugin, &policy, detail).await;
    }
}

async fn handle_operation_end(
    shared: &Arc<Shared>,
    plugin: &str,
    op_id: Uuid,
    usage: ResourceUsage,
    at: DateTime<Utc>,
) {
    let breach = {
        let mut plugins = shared.plugins.lock().expect("monitor map poisoned");
        let Some(monitored) = plugins.get_mut(plugin) else {
            return;
        };
        let Some(open) = monitored.open_ops.remove(&op_id) else {
            return;
        };
        let elapsed_ms = (at - open.started_at).num_milliseconds().max(0) as u64;
        let ceiling_ms = monitored.policy.max_execution_time_ms();
        if elapsed_ms > ceiling_ms {
            Some((
                format!(
                    "operation {op_id} ran {elapsed_ms}ms over execution ceiling {ceiling_ms}ms (usage: {usage:?})"
                ),
                monitored.policy.clone(),
            ))
        } else {
            None
        }
    };

    if let Some((detail, policy)) = breach {
        raise_violation(shared, plugin, &policy, detail).await;
    }
}

fn trailing_cpu_average(window: &VecDeque<ResourceSnapshot>) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    window.iter().map(|s| f64::from(s.cpu_percent)).sum::<f64>() / window.len() as f64
}

async fn raise_violation(shared: &Arc<Shared>, plugin: &str, policy: &SecurityPolicy, detail: String) {
    shared.violations.fetch_add(1, Ordering::Relaxed);
    warn!(plugin, "resource violation: {detail}");

    if let Some(audit) = &shared.audit {
        audit
            .record(
                SecurityEvent::new(
                    SecurityEventType::ResourceViolation,
                    plugin,
                    detail.clone(),
                    Severity::High,
                )
                .with_details(serde_json::json!({ "action": policy.violation_action })),
            )
            .await;
    }

    let _ = shared.notices.send(MonitorNotice::Violation {
        plugin: plugin.to_string(),
        detail: detail.clone(),
        policy: policy.clone(),
    });

    // Awaited inline so per-plugin dispatch order matches event order.
    shared
        .responder
        .respond(plugin, policy.violation_action, &detail)
        .await;
}

async fn raise_warning(shared: &Arc<Shared>, plugin: &str, policy: &SecurityPolicy, detail: String) {
    shared.warnings.fetch_add(1, Ordering::Relaxed);
    debug!(plugin, "resource warning: {detail}");

    if let Some(audit) = &shared.audit {
        audit
            .record(SecurityEvent::new(
                SecurityEventType::ResourceWarning,
                plugin,
                detail.clone(),
                Severity::Medium,
            ))
            .await;
    }

    let _ = shared.notices.send(MonitorNotice::Warning {
        plugin: plugin.to_string(),
        detail,
        policy: policy.clone(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responder::{NoopResponder, ViolationResponder};
    use async_trait::async_trait;
    use hostguard_types::ViolationAction;
    use std::time::Duration;

    fn policy() -> SecurityPolicy {
        SecurityPolicy::default()
    }

    fn snapshot(memory: u64, cpu: u32, threads: u32) -> ResourceSnapshot {
        ResourceSnapshot::now(memory, cpu, threads, 0)
    }

    async fn drain(monitor: &ResourceMonitor, expected_events: u64) {
        // The queue is unbounded and async; poll until the consumer
        // has caught up.
        for _ in 0..200 {
            if monitor.stats().events_processed >= expected_events {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("consumer did not process {expected_events} events in time");
    }

    #[tokio::test]
    async fn unregistered_plugin_events_are_dropped() {
        let monitor = ResourceMonitor::new(Arc::new(NoopResponder));
        monitor.report_usage("ghost", snapshot(u64::MAX, 100, 100));
        drain(&monitor, 1).await;
        assert_eq!(monitor.stats().violations_raised, 0);
    }

    #[tokio::test]
    async fn monitoring_disabled_policy_not_registered() {
        let monitor = ResourceMonitor::new(Arc::new(NoopResponder));
        let mut p = policy();
        p.monitoring.enable_monitoring = false;
        monitor.register("quiet", &p);
        assert!(!monitor.is_registered("quiet"));
    }

    #[tokio::test]
    async fn memory_breach_raises_violation() {
        let monitor = ResourceMonitor::new(Arc::new(NoopResponder));
        let p = policy();
        monitor.register("greedy", &p);

        monitor.report_usage("greedy", snapshot(p.max_memory_bytes + 1, 0, 1));
        drain(&monitor, 1).await;
        assert_eq!(monitor.stats().violations_raised, 1);
    }

    #[tokio::test]
    async fn memory_warning_below_ceiling() {
        let monitor = ResourceMonitor::new(Arc::new(NoopResponder));
        let p = policy();
        monitor.register("warm", &p);

        let near = (p.max_memory_bytes as f64 * 0.9) as u64;
        monitor.report_usage("warm", snapshot(near, 0, 1));
        drain(&monitor, 1).await;
        let stats = monitor.stats();
        assert_eq!(stats.violations_raised, 0);
        assert_eq!(stats.warnings_raised, 1);
    }

    #[tokio::test]
    async fn trailing_cpu_average_smooths_spikes() {
        let monitor = ResourceMonitor::new(Arc::new(NoopResponder));
        let p = policy();
        monitor.register("spiky", &p);

        // One 100% spike among zeros keeps the average under the 25%
        // ceiling and under the 17.5% warning line.
        for _ in 0..9 {
            monitor.report_usage("spiky", snapshot(0, 0, 1));
        }
        monitor.report_usage("spiky", snapshot(0, 100, 1));
        drain(&monitor, 10).await;
        assert_eq!(monitor.stats().violations_raised, 0);

        // Sustained 100% blows through the ceiling.
        for _ in 0..60 {
            monitor.report_usage("spiky", snapshot(0, 100, 1));
        }
        drain(&monitor, 70).await;
        assert!(monitor.stats().violations_raised > 0);
    }

    #[tokio::test]
    async fn slow_operation_raises_violation() {
        let monitor = ResourceMonitor::new(Arc::new(NoopResponder));
        let mut p = policy();
        p.max_execution_time_secs = 1;
        monitor.register("slow", &p);

        let op = Uuid::new_v4();
        // Start the operation in the past by sending a crafted start.
        let _ = monitor.tx.send(MonitorEvent::OperationStart {
            plugin: "slow".into(),
            op_id: op,
            at: Utc::now() - chrono::Duration::seconds(5),
        });
        monitor.operation_ended("slow", op, ResourceUsage::default());
        drain(&monitor, 2).await;
        assert_eq!(monitor.stats().violations_raised, 1);
    }

    #[tokio::test]
    async fn fast_operation_is_clean() {
        let monitor = ResourceMonitor::new(Arc::new(NoopResponder));
        let p = policy();
        monitor.register("fast", &p);

        let op = Uuid::new_v4();
        monitor.operation_started("fast", op);
        monitor.operation_ended("fast", op, ResourceUsage::default());
        drain(&monitor, 2).await;
        let stats = monitor.stats();
        assert_eq!(stats.violations_raised, 0);
        assert_eq!(stats.open_operations, 0);
    }

    struct RecordingResponder {
        seen: Mutex<Vec<(String, ViolationAction)>>,
    }

    #[async_trait]
    impl ViolationResponder for RecordingResponder {
        async fn respond(&self, plugin: &str, action: ViolationAction, _detail: &str) {
            self.seen
                .lock()
                .unwrap()
                .push((plugin.to_string(), action));
        }
    }

    #[tokio::test]
    async fn responder_receives_policy_action() {
        let responder = Arc::new(RecordingResponder {
            seen: Mutex::new(Vec::new()),
        });
        let monitor = ResourceMonitor::new(responder.clone());
        let mut p = policy();
        p.violation_action = ViolationAction::Suspend;
        monitor.register("victim", &p);

        monitor.report_usage("victim", snapshot(p.max_memory_bytes + 1, 0, 1));
        drain(&monitor, 1).await;

        let seen = responder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], ("victim".to_string(), ViolationAction::Suspend));
    }

    #[tokio::test]
    async fn broadcast_notice_carries_policy() {
        let monitor = ResourceMonitor::new(Arc::new(NoopResponder));
        let p = policy();
        monitor.register("noisy", &p);
        let mut rx = monitor.subscribe();

        monitor.report_usage("noisy", snapshot(p.max_memory_bytes + 1, 0, 1));
        let notice = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match notice {
            MonitorNotice::Violation { plugin, policy, .. } => {
                assert_eq!(plugin, "noisy");
                assert_eq!(policy.max_memory_bytes, p.max_memory_bytes);
            }
            other => panic!("unexpected notice: {other:?}"),
        }
    }

    #[tokio::test]
    async fn audit_records_violations() {
        let audit = Arc::new(AuditLog::default());
        let monitor = ResourceMonitor::with_audit(Arc::new(NoopResponder), audit.clone());
        let p = policy();
        monitor.register("audited", &p);

        monitor.report_usage("audited", snapshot(p.max_memory_bytes + 1, 0, 1));
        drain(&monitor, 1).await;
        assert_eq!(
            audit.by_type(SecurityEventType::ResourceViolation).len(),
            1
        );
    }

    #[tokio::test]
    async fn shutdown_stops_consumer() {
        let monitor = ResourceMonitor::new(Arc::new(NoopResponder));
        monitor.shutdown().await;
        // Further sends are ignored without panicking.
        monitor.report_usage("anyone", snapshot(0, 0, 0));
    }

    #[tokio::test]
    async fn window_is_bounded() {
        let monitor = ResourceMonitor::new(Arc::new(NoopResponder));
        let p = policy();
        monitor.register("chatty", &p);
        for _ in 0..(SNAPSHOT_WINDOW + 20) {
            monitor.report_usage("chatty", snapshot(0, 0, 1));
        }
        drain(&monitor, (SNAPSHOT_WINDOW + 20) as u64).await;
        assert_eq!(monitor.stats().window_depths["chatty"], SNAPSHOT_WINDOW);
    }

    #[tokio::test]
    async fn stats_report_per_plugin_window_depth() {
        let monitor = ResourceMonitor::new(Arc::new(NoopResponder));
        let p = policy();
        monitor.register("busy", &p);
        monitor.register("idle", &p);
        for _ in 0..3 {
            monitor.report_usage("busy", snapshot(0, 0, 1));
        }
        drain(&monitor, 3).await;

        let depths = monitor.stats().window_depths;
        assert_eq!(depths["busy"], 3);
        assert_eq!(depths["idle"], 0);
    }
}
