//! Cache backend trait and statistics.
//!
//! A backend is a plain key-value store. It knows nothing about change
//! tokens or groups; the guard composes keys and decides what to store.

use stamp_core::StampResult;

/// Cache backend trait for pluggable cache implementations.
///
/// Implementations must be thread-safe: one backend is shared by every
/// in-flight request. Entries may disappear at any time (eviction, restart);
/// callers treat that as a miss.
pub trait CacheBackend: Send + Sync {
    /// Get the bytes stored under `key`, or `None` if absent.
    fn get(&self, key: &str) -> StampResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any existing entry.
    fn set(&self, key: &str, value: &[u8]) -> StampResult<()>;

    /// Store `value` only if `key` is absent. Returns whether it was stored.
    ///
    /// The default implementation is not atomic; backends that can check
    /// and insert under one lock or transaction should override it.
    fn add(&self, key: &str, value: &[u8]) -> StampResult<bool> {
        if self.get(key)?.is_some() {
            return Ok(false);
        }
        self.set(key, value)?;
        Ok(true)
    }

    /// Remove `key`. Returns whether an entry was removed.
    fn delete(&self, key: &str) -> StampResult<bool>;

    /// Remove every entry. Returns how many were removed.
    fn flush(&self) -> StampResult<u64>;

    /// Get cache statistics.
    fn stats(&self) -> StampResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of `get` calls that found an entry.
    pub hits: u64,
    /// Number of `get` calls that found nothing.
    pub misses: u64,
    /// Number of successful `set`/`add` stores.
    pub writes: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[derive(Default)]
    struct PlainMap(Mutex<HashMap<String, Vec<u8>>>);

    impl CacheBackend for PlainMap {
        fn get(&self, key: &str) -> StampResult<Option<Vec<u8>>> {
            Ok(self.0.lock().unwrap().get(key).cloned())
        }

        fn set(&self, key: &str, value: &[u8]) -> StampResult<()> {
            self.0.lock().unwrap().insert(key.to_string(), value.to_vec());
            Ok(())
        }

        fn delete(&self, key: &str) -> StampResult<bool> {
            Ok(self.0.lock().unwrap().remove(key).is_some())
        }

        fn flush(&self) -> StampResult<u64> {
            let mut map = self.0.lock().unwrap();
            let n = map.len() as u64;
            map.clear();
            Ok(n)
        }

        fn stats(&self) -> StampResult<CacheStats> {
            Ok(CacheStats::default())
        }
    }

    #[test]
    fn test_default_add_only_stores_when_absent() {
        let backend = PlainMap::default();
        assert!(backend.add("k", b"first").unwrap());
        assert!(!backend.add("k", b"second").unwrap());
        assert_eq!(backend.get("k").unwrap(), Some(b"first".to_vec()));
    }
}
