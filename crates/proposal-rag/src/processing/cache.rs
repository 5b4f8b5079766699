//! Bounded LRU memoization cache
//!
//! One generic cache backs every memoized step of the pipeline (extraction
//! results, language patterns, section classifications). Entries are bounded
//! by count and optionally by an estimated memory budget.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Estimates the memory held by a cached value
pub type Sizer<V> = Arc<dyn Fn(&V) -> usize + Send + Sync>;

/// Stable cache key for arbitrary bytes
pub fn content_key(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// hits / (hits + misses), 0 before any access
    pub hit_rate: f64,
    pub items: usize,
    pub memory_bytes: usize,
    pub max_items: usize,
    pub max_memory_bytes: Option<usize>,
}

struct CacheEntry<V> {
    value: V,
    size: usize,
    last_access: u64,
}

struct CacheInner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    /// Logical clock; bumped on every access
    tick: u64,
    memory_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K: Eq + Hash + Clone, V> CacheInner<K, V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, key: &K) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.memory_bytes = self.memory_bytes.saturating_sub(entry.size);
        Some(entry)
    }

    fn evict_lru(&mut self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone());

        match oldest {
            Some(key) => {
                self.remove(&key);
                self.evictions += 1;
                true
            }
            None => false,
        }
    }
}

/// Bounded key-value cache with least-recently-used eviction
pub struct CacheManager<K, V> {
    name: String,
    max_items: usize,
    max_memory_bytes: Option<usize>,
    sizer: Sizer<V>,
    inner: Mutex<CacheInner<K, V>>,
}

impl<K, V> CacheManager<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache using a shallow size estimate for values
    pub fn new(name: impl Into<String>, max_items: usize, max_memory_bytes: Option<usize>) -> Self {
        Self::with_sizer(
            name,
            max_items,
            max_memory_bytes,
            Arc::new(|_: &V| std::mem::size_of::<V>()),
        )
    }

    /// Create a cache with a custom value size estimate
    pub fn with_sizer(
        name: impl Into<String>,
        max_items: usize,
        max_memory_bytes: Option<usize>,
        sizer: Sizer<V>,
    ) -> Self {
        Self {
            name: name.into(),
            max_items,
            max_memory_bytes,
            sizer,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                tick: 0,
                memory_bytes: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a value and mark it most recently used
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let tick = inner.next_tick();

        let value = inner.entries.get_mut(key).map(|entry| {
            entry.last_access = tick;
            entry.value.clone()
        });

        match value {
            Some(value) => {
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert a value, evicting least-recently-used entries until it fits.
    ///
    /// Returns `false` when the value cannot fit even in an empty cache; it is
    /// then not stored.
    pub fn set(&self, key: K, value: V) -> bool {
        let size = std::mem::size_of::<K>() + (self.sizer)(&value);
        if self.max_items == 0 || self.max_memory_bytes.is_some_and(|max| size > max) {
            tracing::debug!("[{}] Value of {} bytes exceeds cache bounds; not cached", self.name, size);
            return false;
        }

        let mut inner = self.inner.lock();
        inner.remove(&key);

        while inner.entries.len() >= self.max_items
            || self
                .max_memory_bytes
                .is_some_and(|max| inner.memory_bytes + size > max)
        {
            if !inner.evict_lru() {
                break;
            }
            tracing::debug!("[{}] Evicted least recently used entry", self.name);
        }

        let tick = inner.next_tick();
        inner.memory_bytes += size;
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                size,
                last_access: tick,
            },
        );
        true
    }

    /// Return the cached value or compute, store and return it
    pub fn get_or_insert_with(&self, key: K, compute: impl FnOnce() -> V) -> V {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = compute();
        self.set(key, value.clone());
        value
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().remove(key).map(|entry| entry.value)
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.memory_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let accesses = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            hit_rate: if accesses == 0 {
                0.0
            } else {
                inner.hits as f64 / accesses as f64
            },
            items: inner.entries.len(),
            memory_bytes: inner.memory_bytes,
            max_items: self.max_items,
            max_memory_bytes: self.max_memory_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let cache: CacheManager<&str, u32> = CacheManager::new("test", 2, None);
        cache.set("a", 1);
        cache.set("b", 2);

        // Touch "a" so "b" becomes the eviction candidate
        assert_eq!(cache.get(&"a"), Some(1));
        cache.set("c", 3);

        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"c"), Some(3));

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.items, 2);
    }

    #[test]
    fn test_hit_rate_is_zero_without_accesses() {
        let cache: CacheManager<String, String> = CacheManager::new("test", 10, None);
        assert_eq!(cache.stats().hit_rate, 0.0);

        cache.set("k".to_string(), "v".to_string());
        cache.get(&"k".to_string());
        cache.get(&"missing".to_string());
        assert_eq!(cache.stats().hit_rate, 0.5);
    }

    #[test]
    fn test_memory_cap_evicts_until_fit() {
        let sizer: Sizer<String> = Arc::new(|s: &String| s.len());
        let key_size = std::mem::size_of::<u32>();
        let cache = CacheManager::with_sizer("bytes", 100, Some(3 * (key_size + 10)), sizer);

        cache.set(1u32, "x".repeat(10));
        cache.set(2u32, "x".repeat(10));
        cache.set(3u32, "x".repeat(10));
        assert_eq!(cache.len(), 3);

        // Needs two slots' worth of budget
        cache.set(4u32, "x".repeat(20 + key_size));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), None);
        assert!(cache.get(&3).is_some());
        assert!(cache.stats().memory_bytes <= 3 * (key_size + 10));
    }

    #[test]
    fn test_oversized_value_is_not_cached() {
        let sizer: Sizer<Vec<u8>> = Arc::new(|v: &Vec<u8>| v.len());
        let cache = CacheManager::with_sizer("bytes", 10, Some(64), sizer);
        cache.set("small", vec![0; 8]);

        assert!(!cache.set("huge", vec![0; 1024]));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&"small").is_some());
    }

    #[test]
    fn test_replacing_key_updates_memory() {
        let sizer: Sizer<String> = Arc::new(|s: &String| s.len());
        let cache = CacheManager::with_sizer("bytes", 10, None, sizer);
        cache.set("k", "a".repeat(50));
        cache.set("k", "a".repeat(5));

        let stats = cache.stats();
        assert_eq!(stats.items, 1);
        assert_eq!(stats.memory_bytes, std::mem::size_of::<&str>() + 5);
        assert_eq!(stats.evictions, 0);
    }

    #[test]
    fn test_get_or_insert_with_computes_once() {
        let cache: CacheManager<String, usize> = CacheManager::new("test", 10, None);
        let mut calls = 0;
        for _ in 0..3 {
            cache.get_or_insert_with(content_key(b"payload"), || {
                calls += 1;
                42
            });
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_content_key_is_stable_sha256() {
        assert_eq!(
            content_key(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
