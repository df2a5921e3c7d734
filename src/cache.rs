//! Entity cache: materialized per-entity views and search results
//!
//! Every write is a full replace. Payload derivation is deterministic, so
//! concurrent writers computing the same key may race freely.

use crate::error::{GeoQueryError, Result};
use crate::types::{CacheItem, EntityKind, SetOptions};
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

/// Key/value store of serialized views.
pub trait EntityCache: Send + Sync {
    /// Payload stored under `key`, unless absent or expired.
    fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store `payload` under `key`, replacing any previous entry.
    fn set(&self, key: &str, payload: Bytes, opts: Option<SetOptions>) -> Result<()>;

    /// Remove `key`, returning whether it was present.
    fn delete(&self, key: &str) -> Result<bool>;
}

/// Read and decode a JSON payload. A payload that no longer decodes is
/// reported as a miss so the caller recomputes and overwrites it.
pub fn get_json<T: DeserializeOwned>(cache: &dyn EntityCache, key: &str) -> Result<Option<T>> {
    match cache.get(key)? {
        Some(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable cache entry");
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

pub fn set_json<T: Serialize>(
    cache: &dyn EntityCache,
    key: &str,
    value: &T,
    opts: Option<SetOptions>,
) -> Result<Bytes> {
    let payload = Bytes::from(serde_json::to_vec(value)?);
    cache.set(key, payload.clone(), opts)?;
    Ok(payload)
}

/// Derives cache keys. Every key carries the configured version stamp so a
/// version bump orphans all permanent entries at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheKeys {
    version: u32,
}

impl CacheKeys {
    pub fn new(version: u32) -> Self {
        Self { version }
    }

    /// Position view of a city (nearby search).
    pub fn city_position(&self, id: &str) -> String {
        format!("v{}:city:data:{}", self.version, id)
    }

    /// Area view of a city (polygon search).
    pub fn city_area(&self, id: &str) -> String {
        format!("v{}:city:area:{}", self.version, id)
    }

    /// Boundary geometry view of any entity.
    pub fn boundary(&self, kind: EntityKind, id: &str) -> String {
        format!("v{}:boundary:{}:{}", self.version, kind, id)
    }

    /// Search results for an already normalized query.
    pub fn search(&self, kind: EntityKind, normalized_query: &str) -> String {
        format!("v{}:search:{}:{}", self.version, kind, normalized_query)
    }

    /// Every per-entity key that may exist for `id`.
    pub fn entity_keys(&self, kind: EntityKind, id: &str) -> Vec<String> {
        let mut keys = vec![self.boundary(kind, id)];
        if kind == EntityKind::City {
            keys.push(self.city_position(id));
            keys.push(self.city_area(id));
        }
        keys
    }
}

/// Case-folded, trimmed form of a free-text query.
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub key_count: u64,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub expired_count: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    expired: AtomicU64,
}

/// In-process cache with optional per-key expiry.
///
/// Reads share the lock; an expired entry is evicted under the write lock on
/// the read that finds it.
#[derive(Default)]
pub struct MemoryCache {
    items: RwLock<BTreeMap<String, CacheItem>>,
    counters: Counters,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let key_count = self.read()?.len() as u64;
        Ok(CacheStats {
            key_count,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            expired_count: self.counters.expired.load(Ordering::Relaxed),
        })
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let mut items = self.write()?;
        let before = items.len();
        items.retain(|_, item| !item.is_expired());
        let purged = before - items.len();
        self.counters
            .expired
            .fetch_add(purged as u64, Ordering::Relaxed);
        Ok(purged)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, CacheItem>>> {
        self.items
            .read()
            .map_err(|_| GeoQueryError::unavailable("entity cache", "read lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, CacheItem>>> {
        self.items
            .write()
            .map_err(|_| GeoQueryError::unavailable("entity cache", "write lock poisoned"))
    }
}

impl EntityCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let expired = match self.read()?.get(key) {
            Some(item) if !item.is_expired() => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(item.value.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            let mut items = self.write()?;
            // A writer may have replaced the entry since the read lock dropped.
            if items.get(key).is_some_and(CacheItem::is_expired) {
                items.remove(key);
                self.counters.expired.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    fn set(&self, key: &str, payload: Bytes, opts: Option<SetOptions>) -> Result<()> {
        let item = CacheItem::new(payload, &opts.unwrap_or_default());
        self.write()?.insert(key.to_string(), item);
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.write()?.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_set_then_get_round_trip() {
        let cache = MemoryCache::new();
        cache
            .set("k", Bytes::from_static(b"{\"a\":1}"), None)
            .unwrap();
        assert_eq!(
            cache.get("k").unwrap().unwrap(),
            Bytes::from_static(b"{\"a\":1}")
        );
        assert!(cache.get("missing").unwrap().is_none());

        let stats = cache.stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.key_count, 1);
    }

    #[test]
    fn test_set_replaces() {
        let cache = MemoryCache::new();
        cache.set("k", Bytes::from_static(b"1"), None).unwrap();
        cache.set("k", Bytes::from_static(b"2"), None).unwrap();
        assert_eq!(cache.get("k").unwrap().unwrap(), Bytes::from_static(b"2"));
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn test_expiry() {
        let cache = MemoryCache::new();
        let opts = SetOptions::with_ttl(Duration::from_millis(50));
        cache.set("short", Bytes::from_static(b"x"), Some(opts)).unwrap();
        cache.set("forever", Bytes::from_static(b"y"), None).unwrap();

        assert!(cache.get("short").unwrap().is_some());
        std::thread::sleep(Duration::from_millis(80));
        assert!(cache.get("short").unwrap().is_none());
        assert!(cache.get("forever").unwrap().is_some());
    }

    #[test]
    fn test_expired_read_evicts() {
        let cache = MemoryCache::new();
        let opts = SetOptions::with_ttl(Duration::from_millis(10));
        cache.set("k", Bytes::from_static(b"x"), Some(opts)).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        assert!(cache.get("k").unwrap().is_none());
        let stats = cache.stats().unwrap();
        assert_eq!(stats.key_count, 0);
        assert_eq!(stats.expired_count, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_concurrent_reads_share_the_lock() {
        let cache = std::sync::Arc::new(MemoryCache::new());
        cache.set("k", Bytes::from_static(b"v"), None).unwrap();

        // Holding a read guard must not block another reader.
        let guard = cache.read().unwrap();
        let reader = {
            let cache = cache.clone();
            std::thread::spawn(move || cache.get("k").unwrap())
        };
        assert_eq!(reader.join().unwrap(), Some(Bytes::from_static(b"v")));
        drop(guard);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        assert!(cache.get("k").unwrap().is_some());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.stats().unwrap().hits, 801);
    }

    #[test]
    fn test_purge_expired() {
        let cache = MemoryCache::new();
        let opts = SetOptions::with_ttl(Duration::from_millis(10));
        cache.set("a", Bytes::from_static(b"x"), Some(opts.clone())).unwrap();
        cache.set("b", Bytes::from_static(b"x"), Some(opts)).unwrap();
        cache.set("c", Bytes::from_static(b"x"), None).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.purge_expired().unwrap(), 2);
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn test_undecodable_payload_is_a_miss() {
        let cache = MemoryCache::new();
        cache.set("k", Bytes::from_static(b"not json"), None).unwrap();
        let value: Option<Vec<String>> = get_json(&cache, "k").unwrap();
        assert!(value.is_none());

        set_json(&cache, "k", &vec!["a".to_string()], None).unwrap();
        let value: Option<Vec<String>> = get_json(&cache, "k").unwrap();
        assert_eq!(value.unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn test_key_derivation() {
        let keys = CacheKeys::new(3);
        assert_eq!(keys.city_position("1600000US0644000"), "v3:city:data:1600000US0644000");
        assert_eq!(keys.boundary(EntityKind::State, "06"), "v3:boundary:state:06");
        assert_eq!(
            keys.search(EntityKind::County, &normalize_query("  Los ANGELES ")),
            "v3:search:county:los angeles"
        );
        assert_eq!(keys.entity_keys(EntityKind::City, "x").len(), 3);
        assert_eq!(keys.entity_keys(EntityKind::State, "x").len(), 1);
        assert_ne!(CacheKeys::new(1).city_area("x"), CacheKeys::new(2).city_area("x"));
    }
}
