//! Short-lived in-memory cache used to absorb bursts of identical fetches.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    seq: u64,
}

#[derive(Debug)]
struct CacheInner<K, V> {
    map: HashMap<K, CacheEntry<V>>,
    ttl: Duration,
    max_entries: usize,
    next_seq: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> CacheInner<K, V> {
    fn get(&self, key: &K) -> Option<V> {
        self.map
            .get(key)
            .filter(|entry| Instant::now() <= entry.expires_at)
            .map(|entry| entry.value.clone())
    }

    fn put(&mut self, key: K, value: V) {
        let now = Instant::now();
        if self.map.len() >= self.max_entries {
            self.map.retain(|_, entry| entry.expires_at > now);
        }
        if self.map.len() >= self.max_entries && !self.map.contains_key(&key) {
            let oldest = self
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.seq)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                self.map.remove(&oldest);
            }
        }
        self.next_seq += 1;
        self.map.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + self.ttl,
                seq: self.next_seq,
            },
        );
    }
}

/// Thread-safe TTL cache. A zero TTL disables it entirely.
#[derive(Debug, Clone)]
pub struct TtlCache<K, V> {
    inner: Arc<tokio::sync::RwLock<CacheInner<K, V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(CacheInner {
                map: HashMap::new(),
                ttl,
                max_entries: max_entries.max(1),
                next_seq: 0,
            })),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, 1)
    }

    /// Live value for `key`, if any.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.inner.read().await.get(key)
    }

    /// Store `value`; a no-op when the cache is disabled.
    pub async fn put(&self, key: K, value: V) {
        let mut inner = self.inner.write().await;
        if inner.ttl.is_zero() {
            return;
        }
        inner.put(key, value);
    }

    pub async fn clear(&self) {
        self.inner.write().await.map.clear();
    }

    /// Entries held, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.inner.read().await.map.len()
    }

    pub async fn is_disabled(&self) -> bool {
        self.inner.read().await.ttl.is_zero()
    }
}
