//! Per-plugin state machine plus global coordinated/exclusive access.
//!
//! Coordinated operations run concurrently, each holding one permit
//! and a read lock on the global configuration. Exclusive operations
//! take every permit and the write lock, so no coordinated operation
//! is in flight while global configuration changes. Per-plugin entries
//! carry their own lock; unrelated plugins never contend.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{debug, info};

use hostguard_types::constants::{
    max_concurrent_operations, COORDINATION_TIMEOUT, EXCLUSIVE_TIMEOUT, STALE_STOPPED_AGE,
    STATE_SWEEP_INTERVAL,
};
use hostguard_types::{PluginState, PluginStatus, SecurityError, SecurityMode};

/// Global security configuration guarded by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GlobalSecurity {
    pub enabled: bool,
    pub mode: SecurityMode,
}

impl Default for GlobalSecurity {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: SecurityMode::Default,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatistics {
    pub plugin_states: usize,
    pub security_enabled: bool,
    pub security_mode: SecurityMode,
    pub max_concurrent_operations: usize,
    pub available_permits: usize,
}

struct Inner {
    states: StdMutex<HashMap<String, Arc<Mutex<PluginState>>>>,
    global: RwLock<GlobalSecurity>,
    permits: Semaphore,
    permit_count: usize,
    coordination_timeout: Duration,
    exclusive_timeout: Duration,
}

impl Inner {
    fn sweep_stale(&self) {
        let mut states = self.states.lock().expect("state map poisoned");
        let before = states.len();
        states.retain(|_, entry| match entry.try_lock() {
            Ok(state) => {
                !(state.status == PluginStatus::Stopped
                    && state.age_secs() >= STALE_STOPPED_AGE.as_secs() as i64)
            }
            // In use right now, so certainly not stale.
            Err(_) => true,
        });
        let removed = before - states.len();
        if removed > 0 {
            debug!(removed, "swept stale stopped plugin states");
        }
    }
}

pub struct StateCoordinator {
    inner: Arc<Inner>,
    sweeper: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Default for StateCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCoordinator {
    pub fn new() -> Self {
        let coordinator = Self::without_sweeper();
        coordinator.start_sweeper();
        coordinator
    }

    pub fn without_sweeper() -> Self {
        Self::with_timeouts(COORDINATION_TIMEOUT, EXCLUSIVE_TIMEOUT)
    }

    /// Custom lock-wait ceilings, no sweep. Used by timeout tests.
    pub fn with_timeouts(coordination: Duration, exclusive: Duration) -> Self {
        let permit_count = max_concurrent_operations();
        Self {
            inner: Arc::new(Inner {
                states: StdMutex::new(HashMap::new()),
                global: RwLock::new(GlobalSecurity::default()),
                permits: Semaphore::new(permit_count),
                permit_count,
                coordination_timeout: coordination,
                exclusive_timeout: exclusive,
            }),
            sweeper: StdMutex::new(None),
        }
    }

    fn start_sweeper(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(STATE_SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(inner) => inner.sweep_stale(),
                    None => break,
                }
            }
        });
        *self.sweeper.lock().expect("sweeper handle poisoned") = Some(handle);
    }

    // ================================================================
    // Coordinated / exclusive access
    // ================================================================

    /// Runs `f` with shared access to the global configuration. Many
    /// coordinated operations proceed concurrently, bounded by the
    /// permit count.
    pub async fn coordinated<T, F, Fut>(&self, f: F) -> Result<T, SecurityError>
    where
        F: FnOnce(GlobalSecurity) -> Fut,
        Fut: Future<Output = T>,
    {
        let timeout = self.inner.coordination_timeout;
        let acquired = tokio::time::timeout(timeout, async {
            let permit = self.inner.permits.acquire().await;
            let guard = self.inner.global.read().await;
            (permit, guard)
        })
        .await
        .map_err(|_| SecurityError::CoordinationTimeout(timeout.as_millis() as u64))?;

        let (permit, guard) = acquired;
        let permit = permit.map_err(|_| {
            SecurityError::CoordinationTimeout(timeout.as_millis() as u64)
        })?;
        let snapshot = *guard;
        let result = f(snapshot).await;
        drop(guard);
        drop(permit);
        Ok(result)
    }

    /// Runs `f` with exclusive access: all permits plus the write
    /// lock, so no coordinated operation is in flight.
    pub async fn exclusive<T, F, Fut>(&self, f: F) -> Result<T, SecurityError>
    where
        F: FnOnce(&mut GlobalSecurity) -> Fut,
        Fut: Future<Output = T>,
    {
        let timeout = self.inner.exclusive_timeout;
        let acquired = tokio::time::timeout(timeout, async {
            let permits = self
                .inner
                .permits
                .acquire_many(self.inner.permit_count as u32)
                .await;
            let guard = self.inner.global.write().await;
            (permits, guard)
        })
        .await
        .map_err(|_| SecurityError::CoordinationTimeout(timeout.as_millis() as u64))?;

        let (permits, mut guard) = acquired;
        let permits = permits.map_err(|_| {
            SecurityError::CoordinationTimeout(timeout.as_millis() as u64)
        })?;
        let result = f(&mut guard).await;
        drop(guard);
        drop(permits);
        Ok(result)
    }

    pub async fn global_security(&self) -> GlobalSecurity {
        *self.inner.global.read().await
    }

    /// Changes global enablement/mode under exclusive access and
    /// invalidates every plugin state.
    pub async fn set_global_security(
        &self,
        enabled: bool,
        mode: SecurityMode,
    ) -> Result<(), SecurityError> {
        self.exclusive(|global| {
            global.enabled = enabled;
            global.mode = mode;
            async {}
        })
        .await?;
        self.invalidate_all_states();
        info!(enabled, ?mode, "global security configuration changed");
        Ok(())
    }

    // ================================================================
    // Per-plugin state
    // ================================================================

    fn entry(&self, plugin: &str) -> Arc<Mutex<PluginState>> {
        let mut states = self.inner.states.lock().expect("state map poisoned");
        states
            .entry(plugin.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PluginState::new(plugin))))
            .clone()
    }

    pub async fn state(&self, plugin: &str) -> PluginState {
        self.entry(plugin).lock().await.clone()
    }

    /// Serialized by the entry's own lock; the global lock is not
    /// involved.
    pub async fn update_state<F>(&self, plugin: &str, f: F)
    where
        F: FnOnce(&mut PluginState),
    {
        let entry = self.entry(plugin);
        let mut state = entry.lock().await;
        f(&mut state);
    }

    /// Applies `f` only when `predicate` holds; returns whether it ran.
    pub async fn update_state_if<P, F>(&self, plugin: &str, predicate: P, f: F) -> bool
    where
        P: FnOnce(&PluginState) -> bool,
        F: FnOnce(&mut PluginState),
    {
        let entry = self.entry(plugin);
        let mut state = entry.lock().await;
        if predicate(&state) {
            f(&mut state);
            true
        } else {
            false
        }
    }

    pub fn remove_state(&self, plugin: &str) {
        self.inner
            .states
            .lock()
            .expect("state map poisoned")
            .remove(plugin);
    }

    pub async fn all_states(&self) -> HashMap<String, PluginState> {
        let entries: Vec<(String, Arc<Mutex<PluginState>>)> = {
            let states = self.inner.states.lock().expect("state map poisoned");
            states
                .iter()
                .map(|(name, entry)| (name.clone(), entry.clone()))
                .collect()
        };
        let mut snapshot = HashMap::with_capacity(entries.len());
        for (name, entry) in entries {
            snapshot.insert(name, entry.lock().await.clone());
        }
        snapshot
    }

    pub fn invalidate_all_states(&self) {
        self.inner
            .states
            .lock()
            .expect("state map poisoned")
            .clear();
    }

    pub async fn statistics(&self) -> CoordinatorStatistics {
        let global = self.global_security().await;
        CoordinatorStatistics {
            plugin_states: self.inner.states.lock().expect("state map poisoned").len(),
            security_enabled: global.enabled,
            security_mode: global.mode,
            max_concurrent_operations: self.inner.permit_count,
            available_permits: self.inner.permits.available_permits(),
        }
    }

    #[cfg(test)]
    fn sweep_now(&self) {
        self.inner.sweep_stale();
    }
}

impl Drop for StateCoordinator {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.lock().expect("sweeper handle poisoned").take() {
            handle.abort();
        }
    }
}
