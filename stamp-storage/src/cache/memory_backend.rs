//! Process-local cache backend.
//!
//! A hash map behind an `RwLock`, optionally bounded. When a bound is set,
//! the oldest inserted key is evicted first.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use stamp_core::{CacheError, StampResult};

use super::traits::{CacheBackend, CacheStats};

#[derive(Debug, Default)]
struct MemoryInner {
    entries: HashMap<String, Vec<u8>>,
    /// Insertion order, oldest first. Holds exactly the keys in `entries`.
    order: VecDeque<String>,
}

/// In-memory cache backend.
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    inner: RwLock<MemoryInner>,
    max_entries: Option<usize>,
    stats: RwLock<CacheStats>,
}

impl MemoryCacheBackend {
    /// Create an unbounded backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend holding at most `max_entries` entries.
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries.max(1)),
            ..Self::default()
        }
    }

    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> CacheError {
        CacheError::Unavailable {
            reason: "memory cache lock poisoned".to_string(),
        }
    }

    fn record(&self, f: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }

    /// Insert a new key, evicting the oldest entries if over capacity.
    /// Returns how many entries were evicted.
    fn insert_new(&self, inner: &mut MemoryInner, key: &str, value: &[u8]) -> u64 {
        let mut evicted = 0;
        if let Some(max) = self.max_entries {
            while inner.entries.len() >= max {
                match inner.order.pop_front() {
                    Some(oldest) => {
                        inner.entries.remove(&oldest);
                        evicted += 1;
                    }
                    None => break,
                }
            }
        }
        inner.entries.insert(key.to_string(), value.to_vec());
        inner.order.push_back(key.to_string());
        evicted
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn get(&self, key: &str) -> StampResult<Option<Vec<u8>>> {
        let inner = self.inner.read().map_err(|_| Self::poisoned())?;
        let value = inner.entries.get(key).cloned();
        drop(inner);

        if value.is_some() {
            self.record(|s| s.hits += 1);
        } else {
            self.record(|s| s.misses += 1);
        }
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> StampResult<()> {
        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;
        let evicted = if inner.entries.contains_key(key) {
            inner.entries.insert(key.to_string(), value.to_vec());
            0
        } else {
            self.insert_new(&mut inner, key, value)
        };
        drop(inner);

        self.record(|s| {
            s.writes += 1;
            s.evictions += evicted;
        });
        Ok(())
    }

    fn add(&self, key: &str, value: &[u8]) -> StampResult<bool> {
        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;
        if inner.entries.contains_key(key) {
            return Ok(false);
        }
        let evicted = self.insert_new(&mut inner, key, value);
        drop(inner);

        self.record(|s| {
            s.writes += 1;
            s.evictions += evicted;
        });
        Ok(true)
    }

    fn delete(&self, key: &str) -> StampResult<bool> {
        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;
        let removed = inner.entries.remove(key).is_some();
        if removed {
            inner.order.retain(|k| k != key);
        }
        Ok(removed)
    }

    fn flush(&self) -> StampResult<u64> {
        let mut inner = self.inner.write().map_err(|_| Self::poisoned())?;
        let count = inner.entries.len() as u64;
        inner.entries.clear();
        inner.order.clear();
        Ok(count)
    }

    fn stats(&self) -> StampResult<CacheStats> {
        let mut stats = self.stats.read().map_err(|_| Self::poisoned())?.clone();
        stats.entry_count = self.len() as u64;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let backend = MemoryCacheBackend::new();
        backend.set("a", b"1").unwrap();
        assert_eq!(backend.get("a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(backend.get("b").unwrap(), None);
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let backend = MemoryCacheBackend::new();
        backend.set("a", b"1").unwrap();
        backend.set("a", b"2").unwrap();
        assert_eq!(backend.get("a").unwrap(), Some(b"2".to_vec()));
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn test_add_is_set_if_absent() {
        let backend = MemoryCacheBackend::new();
        assert!(backend.add("a", b"1").unwrap());
        assert!(!backend.add("a", b"2").unwrap());
        assert_eq!(backend.get("a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_delete_and_flush() {
        let backend = MemoryCacheBackend::new();
        backend.set("a", b"1").unwrap();
        backend.set("b", b"2").unwrap();
        assert!(backend.delete("a").unwrap());
        assert!(!backend.delete("a").unwrap());
        assert_eq!(backend.flush().unwrap(), 1);
        assert!(backend.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let backend = MemoryCacheBackend::with_capacity(2);
        backend.set("a", b"1").unwrap();
        backend.set("b", b"2").unwrap();
        backend.set("c", b"3").unwrap();

        assert_eq!(backend.get("a").unwrap(), None);
        assert_eq!(backend.get("b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(backend.get("c").unwrap(), Some(b"3".to_vec()));
        assert_eq!(backend.stats().unwrap().evictions, 1);
    }

    #[test]
    fn test_deleted_keys_do_not_count_toward_eviction() {
        let backend = MemoryCacheBackend::with_capacity(2);
        backend.set("a", b"1").unwrap();
        backend.set("b", b"2").unwrap();
        backend.delete("a").unwrap();
        backend.set("c", b"3").unwrap();

        assert_eq!(backend.get("b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(backend.stats().unwrap().evictions, 0);
    }

    #[test]
    fn test_stats() {
        let backend = MemoryCacheBackend::new();
        backend.set("a", b"1").unwrap();
        backend.get("a").unwrap();
        backend.get("a").unwrap();
        backend.get("missing").unwrap();

        let stats = backend.stats().unwrap();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.entry_count, 1);
    }
}
