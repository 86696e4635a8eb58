//! Permission-result and policy caches.
//!
//! Two independent keyed caches with TTL expiry and a hard entry cap
//! on the permission side, enforced by evicting the least-recently
//! accessed entry. Invalidation for a plugin is linearizable with
//! subsequent reads: once `invalidate_plugin` returns, no read
//! observes the stale value.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use hostguard_types::constants::{
    CACHE_SWEEP_INTERVAL, MAX_CACHE_ENTRIES, PERMISSION_CACHE_TTL, POLICY_CACHE_TTL,
};
use hostguard_types::{PluginPermissions, SecurityPolicy};

struct Entry<T> {
    value: T,
    cached_at: Instant,
    last_accessed: Instant,
}

impl<T> Entry<T> {
    fn new(value: T) -> Self {
        let now = Instant::now();
        Self {
            value,
            cached_at: now,
            last_accessed: now,
        }
    }

    fn expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatistics {
    pub permission_entries: usize,
    pub policy_entries: usize,
    pub max_entries: usize,
    pub permission_ttl_secs: u64,
    pub policy_ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
}

struct Inner {
    permissions: Mutex<HashMap<(String, u32), Entry<bool>>>,
    policies: Mutex<HashMap<String, Entry<SecurityPolicy>>>,
    permission_ttl: Duration,
    policy_ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Inner {
    fn sweep(&self) {
        let mut permissions = self.permissions.lock().expect("permission cache poisoned");
        let before = permissions.len();
        permissions.retain(|_, entry| !entry.expired(self.permission_ttl));
        let removed = before - permissions.len();
        drop(permissions);

        let mut policies = self.policies.lock().expect("policy cache poisoned");
        let policy_before = policies.len();
        policies.retain(|_, entry| !entry.expired(self.policy_ttl));
        let policy_removed = policy_before - policies.len();
        drop(policies);

        if removed + policy_removed > 0 {
            debug!(
                permission_entries = removed,
                policy_entries = policy_removed,
                "cache sweep removed expired entries"
            );
        }
    }
}

/// Shared permission and policy cache. Constructed explicitly; the
/// background sweep is opt-out for deterministic tests.
pub struct SecurityCache {
    inner: Arc<Inner>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Default for SecurityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityCache {
    /// Cache with default TTLs and the background sweep running.
    pub fn new() -> Self {
        let cache = Self::with_ttls(PERMISSION_CACHE_TTL, POLICY_CACHE_TTL);
        cache.start_sweeper();
        cache
    }

    /// Cache without the background sweep.
    pub fn without_sweeper() -> Self {
        Self::with_ttls(PERMISSION_CACHE_TTL, POLICY_CACHE_TTL)
    }

    /// Custom TTLs, no sweep. Used by tests that need fast expiry.
    pub fn with_ttls(permission_ttl: Duration, policy_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                permissions: Mutex::new(HashMap::new()),
                policies: Mutex::new(HashMap::new()),
                permission_ttl,
                policy_ttl,
                max_entries: MAX_CACHE_ENTRIES,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
            sweeper: Mutex::new(None),
        }
    }

    fn start_sweeper(&self) {
        // Without a runtime the cache still works; entries expire
        // lazily on read instead.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(CACHE_SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(inner) => inner.sweep(),
                    None => break,
                }
            }
        });
        *self.sweeper.lock().expect("sweeper handle poisoned") = Some(handle);
    }

    // ================================================================
    // Permission results
    // ================================================================

    pub fn cached_permission(&self, plugin: &str, permission: PluginPermissions) -> Option<bool> {
        let key = (plugin.to_string(), permission.bits());
        let mut permissions = self
            .inner
            .permissions
            .lock()
            .expect("permission cache poisoned");
        match permissions.get_mut(&key) {
            Some(entry) if !entry.expired(self.inner.permission_ttl) => {
                entry.last_accessed = Instant::now();
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value)
            }
            Some(_) => {
                permissions.remove(&key);
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn cache_permission(&self, plugin: &str, permission: PluginPermissions, result: bool) {
        let mut permissions = self
            .inner
            .permissions
            .lock()
            .expect("permission cache poisoned");
        if permissions.len() >= self.inner.max_entries {
            // Evict the least-recently accessed entry to stay bounded.
            if let Some(victim) = permissions
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(key, _)| key.clone())
            {
                permissions.remove(&victim);
            }
        }
        permissions.insert((plugin.to_string(), permission.bits()), Entry::new(result));
    }

    // ================================================================
    // Policies
    // ================================================================

    pub fn cached_policy(&self, plugin: &str) -> Option<SecurityPolicy> {
        let mut policies = self.inner.policies.lock().expect("policy cache poisoned");
        match policies.get_mut(plugin) {
            Some(entry) if !entry.expired(self.inner.policy_ttl) => {
                entry.last_accessed = Instant::now();
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                policies.remove(plugin);
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn cache_policy(&self, plugin: &str, policy: &SecurityPolicy) {
        let mut policies = self.inner.policies.lock().expect("policy cache poisoned");
        policies.insert(plugin.to_string(), Entry::new(policy.clone()));
    }

    // ================================================================
    // Invalidation
    // ================================================================

    /// Clears everything cached for one plugin. Used on unload and on
    /// policy change.
    pub fn invalidate_plugin(&self, plugin: &str) {
        self.inner
            .permissions
            .lock()
            .expect("permission cache poisoned")
            .retain(|(name, _), _| name != plugin);
        self.inner
            .policies
            .lock()
            .expect("policy cache poisoned")
            .remove(plugin);
    }

    /// Clears every permission entry whose key touches the given
    /// permission flags. Used on global rule changes.
    pub fn invalidate_permission(&self, permission: PluginPermissions) {
        self.inner
            .permissions
            .lock()
            .expect("permission cache poisoned")
            .retain(|(_, bits), _| {
                (PluginPermissions::from_bits_retain(*bits) & permission).is_empty()
            });
    }

    /// Clears both caches. Used on configuration reload.
    pub fn invalidate_all(&self) {
        self.inner
            .permissions
            .lock()
            .expect("permission cache poisoned")
            .clear();
        self.inner
            .policies
            .lock()
            .expect("policy cache poisoned")
            .clear();
    }

    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            permission_entries: self
                .inner
                .permissions
                .lock()
                .expect("permission cache poisoned")
                .len(),
            policy_entries: self.inner.policies.lock().expect("policy cache poisoned").len(),
            max_entries: self.inner.max_entries,
            permission_ttl_secs: self.inner.permission_ttl.as_secs(),
            policy_ttl_secs: self.inner.policy_ttl.as_secs(),
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    fn sweep_now(&self) {
        self.inner.sweep();
    }
}

impl Drop for SecurityCache {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.lock().expect("sweeper handle poisoned").take() {
            handle.abort();
        }
    }
}
