//! Bounded, capacity-limited key/value cache with per-entry expiry.
//!
//! Backed by an LRU so that the oldest entries make room under capacity
//! pressure. Expired entries are purged lazily on every insert; callers
//! that want active expiry can start a background sweep.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Convenience: an expiry `ttl` seconds from now.
pub fn expire_in(ttl_secs: u64) -> Instant {
    Instant::now() + Duration::from_secs(ttl_secs)
}

struct CacheValue<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> CacheValue<V> {
    fn expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

pub struct TtlCache<K: Hash + Eq + Clone, V: Clone> {
    inner: Mutex<LruCache<K, CacheValue<V>>>,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Insert without expiry. Duplicate inserts are idempotent.
    pub fn add(&self, key: K, value: V) {
        self.add_entry(key, value, None);
    }

    /// Insert with an explicit expiry instant.
    pub fn add_with_expiry(&self, key: K, value: V, expires_at: Instant) {
        self.add_entry(key, value, Some(expires_at));
    }

    fn add_entry(&self, key: K, value: V, expires_at: Option<Instant>) {
        let mut inner = self.inner.lock();
        Self::purge_expired(&mut inner);
        inner.put(key, CacheValue { value, expires_at });
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        if inner.get(key).is_some_and(|v| v.expired(Instant::now())) {
            inner.pop(key);
            return None;
        }
        inner.get(key).map(|v| v.value.clone())
    }

    pub fn has(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().pop(key).map(|v| v.value)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(inner: &mut LruCache<K, CacheValue<V>>) {
        let now = Instant::now();
        let expired: Vec<K> = inner
            .iter()
            .filter(|(_, v)| v.expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in expired {
            inner.pop(&k);
        }
    }

    /// Start an active sweep that purges expired entries every `interval`
    /// until the shutdown signal flips.
    pub fn start_sweep(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()>
    where
        K: Send + 'static,
        V: Send + 'static,
    {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut inner = cache.inner.lock();
                        Self::purge_expired(&mut inner);
                    }
                    _ = shutdown.changed() => return,
                }
            }
        })
    }
}
