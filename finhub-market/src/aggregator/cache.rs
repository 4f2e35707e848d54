//! Fingerprint-keyed response cache.
//!
//! Bounded in entry count. Expired entries are treated as misses and
//! removed lazily on lookup; under pressure the least-recently-used
//! entry is evicted. Coalescing of concurrent misses lives in the
//! aggregator; this type is only the storage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use chrono::{DateTime, Utc};

/// A cached normalized payload and its provenance.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub data: Value,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

struct Entry {
    response: CachedResponse,
    expires_at: Instant,
    last_used: Instant,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct ResponseCache {
    max_entries: usize,
    entries: Mutex<HashMap<u64, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Entry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Fresh entry for the fingerprint, or `None`. Expired entries are
    /// removed on the way out.
    pub fn get(&self, fingerprint: u64) -> Option<CachedResponse> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get_mut(&fingerprint) {
            Some(entry) if entry.expires_at > now => {
                entry.last_used = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.response.clone())
            }
            Some(_) => {
                entries.remove(&fingerprint);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert with the operation's TTL, evicting expired entries first
    /// and then the least-recently-used when still over the bound.
    pub fn insert(&self, fingerprint: u64, response: CachedResponse, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.lock();

        if entries.len() >= self.max_entries && !entries.contains_key(&fingerprint) {
            entries.retain(|_, entry| entry.expires_at > now);
        }
        while entries.len() >= self.max_entries && !entries.contains_key(&fingerprint) {
            let lru = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| *key);
            match lru {
                Some(key) => {
                    entries.remove(&key);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }

        entries.insert(
            fingerprint,
            Entry {
                response,
                expires_at: now + ttl,
                last_used: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(tag: &str) -> CachedResponse {
        CachedResponse {
            data: json!({"tag": tag}),
            source: "polygon".to_string(),
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn hit_within_ttl_miss_after() {
        tokio::time::pause();
        let cache = ResponseCache::new(16);
        cache.insert(1, response("a"), Duration::from_secs(10));

        assert_eq!(cache.get(1).unwrap().data["tag"], "a");

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.get(1).is_none());
        // Lazy removal actually dropped the entry.
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn bound_is_enforced_by_lru_eviction() {
        tokio::time::pause();
        let cache = ResponseCache::new(3);
        cache.insert(1, response("a"), Duration::from_secs(60));
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.insert(2, response("b"), Duration::from_secs(60));
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.insert(3, response("c"), Duration::from_secs(60));
        tokio::time::advance(Duration::from_millis(10)).await;

        // Touch 1 so 2 becomes the least recently used.
        cache.get(1);
        tokio::time::advance(Duration::from_millis(10)).await;

        cache.insert(4, response("d"), Duration::from_secs(60));
        assert_eq!(cache.len(), 3);
        assert!(cache.get(2).is_none(), "LRU entry must be evicted");
        assert!(cache.get(1).is_some());
        assert!(cache.get(4).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn expired_entries_are_preferred_eviction_targets() {
        tokio::time::pause();
        let cache = ResponseCache::new(2);
        cache.insert(1, response("short"), Duration::from_millis(100));
        cache.insert(2, response("long"), Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(3, response("new"), Duration::from_secs(60));

        assert!(cache.get(2).is_some(), "live entry must survive");
        assert!(cache.get(3).is_some());
    }

    #[tokio::test]
    async fn stats_track_hits_and_misses() {
        let cache = ResponseCache::new(4);
        cache.insert(7, response("x"), Duration::from_secs(60));
        cache.get(7);
        cache.get(8);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
