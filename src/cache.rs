//! In-memory mask cache with LRU eviction and TTL expiry
//!
//! Keys are image content hashes. The cache is process-lifetime only and is not
//! internally synchronized; the generator wraps it in a mutex and only touches it
//! between awaits.

use crate::config::CacheConfig;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Cached value plus bookkeeping
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    last_accessed: Instant,
    /// Monotonic access order, breaks ties between equal instants
    access_seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.created_at) >= ttl
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    /// Number of `get` calls that returned a value
    pub hits: u64,
    /// Number of `get` calls on missing or expired keys
    pub misses: u64,
    /// Current number of entries
    pub size: usize,
    /// Configured capacity
    pub max_size: usize,
    /// Configured time-to-live in milliseconds
    pub ttl_ms: u64,
}

impl CacheStats {
    /// Fraction of lookups that were hits, `0.0` before any lookup
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded key/value store with least-recently-used eviction and TTL expiry
#[derive(Debug)]
pub struct MaskCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    max_entries: usize,
    ttl: Duration,
    hits: u64,
    misses: u64,
    access_counter: u64,
}

impl<V: Clone> MaskCache<V> {
    /// Create a cache from its two tunables
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: HashMap::with_capacity(config.max_entries.min(256)),
            max_entries: config.max_entries.max(1),
            ttl: config.ttl,
            hits: 0,
            misses: 0,
            access_counter: 0,
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }

    /// Look up a live entry, refreshing its recency
    ///
    /// Expired entries are removed on the spot and count as misses.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = Instant::now();
        let ttl = self.ttl;

        let expired = match self.entries.get(key) {
            None => {
                self.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now, ttl),
        };

        if expired {
            self.entries.remove(key);
            self.misses += 1;
            tracing::debug!(key, "Evicted expired cache entry on lookup");
            return None;
        }

        let seq = self.next_seq();
        let entry = self.entries.get_mut(key)?;
        entry.last_accessed = now;
        entry.access_seq = seq;
        self.hits += 1;
        Some(entry.value.clone())
    }

    /// Insert or replace a value
    ///
    /// Replacing an existing key never evicts. Inserting a new key into a full
    /// cache first evicts the least recently accessed entry.
    pub fn set(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        let now = Instant::now();
        let seq = self.next_seq();

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            entry.created_at = now;
            entry.last_accessed = now;
            entry.access_seq = seq;
            return;
        }

        if self.entries.len() >= self.max_entries {
            self.evict_lru();
        }

        self.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                last_accessed: now,
                access_seq: seq,
            },
        );
    }

    /// Whether a live entry exists, without touching recency or statistics
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now, self.ttl))
    }

    /// Remove one entry, returning whether it existed
    pub fn remove(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry and reset statistics
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    /// Remove all expired entries regardless of recency
    ///
    /// Returns the number of entries removed.
    pub fn prune(&mut self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now, ttl));
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "Pruned mask cache");
        }
        removed
    }

    /// Number of stored entries, including expired ones not yet pruned
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys of all stored entries, least recently used first
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut entries: Vec<(&String, &CacheEntry<V>)> = self.entries.iter().collect();
        entries.sort_by_key(|(_, entry)| (entry.last_accessed, entry.access_seq));
        entries.into_iter().map(|(key, _)| key.clone()).collect()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            size: self.entries.len(),
            max_size: self.max_entries,
            ttl_ms: self.ttl.as_millis() as u64,
        }
    }

    fn evict_lru(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| (entry.last_accessed, entry.access_seq))
            .map(|(key, _)| key.clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
            tracing::debug!(key = %key, "Evicted least recently used cache entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_entries: usize, ttl_secs: u64) -> MaskCache<String> {
        MaskCache::new(CacheConfig {
            max_entries,
            ttl: Duration::from_secs(ttl_secs),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_then_get() {
        let mut cache = cache(3, 60);
        cache.set("a", "mask-a".to_string());
        assert_eq!(cache.get("a").as_deref(), Some("mask-a"));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_increments_counter() {
        let mut cache = cache(3, 60);
        assert!(cache.get("missing").is_none());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
        assert!((stats.hit_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_removes_entry() {
        let mut cache = cache(3, 10);
        cache.set("a", "mask-a".to_string());
        assert_eq!(cache.size(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(!cache.has("a"));
        assert!(cache.get("a").is_none());
        assert_eq!(cache.size(), 0);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction_respects_access() {
        let mut cache = cache(3, 60);
        cache.set("a", "1".to_string());
        tokio::time::advance(Duration::from_millis(5)).await;
        cache.set("b", "2".to_string());
        tokio::time::advance(Duration::from_millis(5)).await;
        cache.set("c", "3".to_string());
        tokio::time::advance(Duration::from_millis(5)).await;

        // Touch "a" so "b" becomes the oldest
        assert!(cache.get("a").is_some());
        cache.set("d", "4".to_string());

        assert_eq!(cache.size(), 3);
        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.has("c"));
        assert!(cache.has("d"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction_without_clock_advance() {
        let mut cache = cache(2, 60);
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.get("a");
        cache.set("c", "3".to_string());

        assert_eq!(cache.keys(), vec!["a".to_string(), "c".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_in_place_does_not_evict() {
        let mut cache = cache(2, 60);
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.set("a", "updated".to_string());

        assert_eq!(cache.size(), 2);
        assert_eq!(cache.get("a").as_deref(), Some("updated"));
        assert!(cache.has("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_removes_only_expired() {
        let mut cache = cache(5, 10);
        cache.set("old", "1".to_string());
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.set("fresh", "2".to_string());
        assert_eq!(cache.get("old").as_deref(), Some("1"));
        tokio::time::advance(Duration::from_secs(5)).await;

        // Recent access does not protect an expired entry from pruning
        assert_eq!(cache.prune(), 1);
        assert_eq!(cache.size(), 1);
        assert!(cache.has("fresh"));
        assert!(!cache.has("old"));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_and_stats() {
        let mut cache = cache(4, 60);
        cache.set("a", "1".to_string());
        cache.get("a");
        cache.get("zzz");

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.max_size, 4);
        assert_eq!(stats.ttl_ms, 60_000);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CacheStats {
            hits: 0,
            misses: 0,
            size: 0,
            max_size: 4,
            ttl_ms: 60_000,
        });
    }
}
