//! Read-through caching guarded by change tokens.
//!
//! [`ChangeTokenGuard`] composes result keys from the group's current token
//! and a hash of the query params. A hit returns the stored payload without
//! running the computation; a miss runs it and stores the result once.
//! Writers call [`ChangeTokenGuard::bump_token`], which makes every key
//! composed before the bump unreachable.
//!
//! Backend failures are absorbed here. A failed read is a miss, a failed
//! write is dropped, and the caller always receives a correctly computed
//! payload.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use stamp_core::{GroupId, StampResult};
use tracing::{debug, warn};

use super::cache_key::{hash_params, CacheKey};
use super::cache_read::CacheRead;
use super::change_token::{ChangeToken, ChangeTokenStore, ClockTokenSource, TokenSource};
use super::traits::CacheBackend;

/// Read-through cache over any [`CacheBackend`], invalidated by change tokens.
///
/// # Example
///
/// ```ignore
/// let guard = ChangeTokenGuard::new(Arc::new(MemoryCacheBackend::new()));
/// let pages = GroupId::new("pages")?;
///
/// let read = guard.cached_query(&pages, &json!({"number": 10}), || load_pages(10))?;
/// assert!(read.was_cache_miss());
///
/// guard.bump_token(&pages); // after any write touching pages
/// ```
pub struct ChangeTokenGuard<B: CacheBackend + ?Sized> {
    backend: Arc<B>,
    tokens: ChangeTokenStore<B>,
    /// Item keys whose delete failed; they read as absent until removed.
    stale_items: Arc<RwLock<HashSet<String>>>,
}

impl<B: CacheBackend + ?Sized> Clone for ChangeTokenGuard<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            tokens: self.tokens.clone(),
            stale_items: Arc::clone(&self.stale_items),
        }
    }
}

impl<B: CacheBackend + ?Sized> ChangeTokenGuard<B> {
    /// Create a guard that stamps tokens from the wall clock.
    pub fn new(backend: Arc<B>) -> Self {
        Self::with_token_source(backend, Arc::new(ClockTokenSource::new()))
    }

    /// Create a guard with a custom token source.
    pub fn with_token_source(backend: Arc<B>, source: Arc<dyn TokenSource>) -> Self {
        let tokens = ChangeTokenStore::new(Arc::clone(&backend), source);
        Self {
            backend,
            tokens,
            stale_items: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Get a reference to the cache backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Current token for `group`, created on first use.
    ///
    /// Two calls with no bump in between return the same token as long as
    /// the backend is reachable.
    pub fn current_token(&self, group: &GroupId) -> ChangeToken {
        self.tokens.current(group)
    }

    /// Replace the token for `group`, invalidating every result cached under
    /// the previous one. Call this before a write reports success.
    pub fn bump_token(&self, group: &GroupId) -> ChangeToken {
        self.tokens.bump(group)
    }

    /// Groups whose latest bump is only held in this process.
    pub fn unpersisted_groups(&self) -> Vec<GroupId> {
        self.tokens.unpersisted_groups()
    }

    /// Bump several groups touched by the same write.
    pub fn bump_tokens(&self, groups: &[GroupId]) -> Vec<ChangeToken> {
        groups.iter().map(|g| self.tokens.bump(g)).collect()
    }

    /// Compose `<group>:<token>:<hash(params)>`.
    ///
    /// Fails only when `params` cannot be serialized, which is a caller bug.
    pub fn compute_cache_key<P>(&self, group: &GroupId, params: &P) -> StampResult<CacheKey>
    where
        P: Serialize + ?Sized,
    {
        self.token_and_key(group, params).map(|(_, key)| key)
    }

    fn token_and_key<P>(&self, group: &GroupId, params: &P) -> StampResult<(ChangeToken, CacheKey)>
    where
        P: Serialize + ?Sized,
    {
        // Hash first so malformed params fail before any backend traffic.
        let hash = hash_params(params)?;
        let token = self.current_token(group);
        let key = CacheKey::compose(&token, &hash);
        Ok((token, key))
    }

    /// Return the cached payload for `(group, params)` or compute and store it.
    ///
    /// Exactly one backend write happens per miss and none per hit. Errors
    /// from `compute` propagate and nothing is cached for them; the only other
    /// error is unserializable `params`.
    pub fn cached_query<T, P, F>(
        &self,
        group: &GroupId,
        params: &P,
        compute: F,
    ) -> StampResult<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned,
        P: Serialize + ?Sized,
        F: FnOnce() -> StampResult<T>,
    {
        let (token, key) = self.token_and_key(group, params)?;

        match self.backend.get(key.as_str()) {
            Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => {
                    debug!(target: "stamp::cache", key = %key, "Cache hit");
                    return Ok(CacheRead::from_cache(value, token, key));
                }
                Err(e) => {
                    warn!(target: "stamp::cache", key = %key, error = %e, "Cached payload did not decode, recomputing");
                }
            },
            Ok(None) => {
                debug!(target: "stamp::cache", key = %key, "Cache miss");
            }
            Err(e) => {
                warn!(target: "stamp::cache", key = %key, error = %e, "Cache read failed, recomputing");
            }
        }

        let value = compute()?;
        self.store(key.as_str(), &value);
        Ok(CacheRead::from_compute(value, token, key))
    }

    /// Read a plain (untokenized) item entry. Any failure reads as absent.
    ///
    /// An entry whose delete failed earlier is never returned; the delete is
    /// retried instead.
    pub fn get_item<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if self.is_stale(key) {
            let mut stale = self.stale_items.write().unwrap_or_else(PoisonError::into_inner);
            if stale.contains(key) {
                if self.backend.delete(key).is_ok() {
                    stale.remove(key);
                    debug!(target: "stamp::cache", key = %key, "Dropped stale cache item");
                }
                return None;
            }
        }

        match self.backend.get(key) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(target: "stamp::cache", key = %key, error = %e, "Cached item did not decode");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(target: "stamp::cache", key = %key, error = %e, "Cache item read failed");
                None
            }
        }
    }

    /// Store a plain item entry. Returns whether it was stored.
    ///
    /// A stored value replaces any stale entry under the same key.
    pub fn set_item<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let stored = self.store(key, value);
        if stored && self.is_stale(key) {
            self.stale_items
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(key);
        }
        stored
    }

    /// Drop a plain item entry. Returns whether an entry was removed.
    ///
    /// When the backend rejects the delete, the key is marked stale so
    /// [`get_item`](Self::get_item) keeps missing until it is cleared.
    pub fn delete_item(&self, key: &str) -> bool {
        let mut stale = self.stale_items.write().unwrap_or_else(PoisonError::into_inner);
        match self.backend.delete(key) {
            Ok(removed) => {
                stale.remove(key);
                removed
            }
            Err(e) => {
                warn!(target: "stamp::cache", key = %key, error = %e, "Cache item delete failed, marking it stale");
                stale.insert(key.to_string());
                false
            }
        }
    }

    fn is_stale(&self, key: &str) -> bool {
        self.stale_items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    fn store<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(target: "stamp::cache", key = %key, error = %e, "Payload not serializable, skipping cache write");
                return false;
            }
        };
        match self.backend.set(key, &bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "stamp::cache", key = %key, error = %e, "Cache write failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheBackend;
    use serde_json::json;
    use stamp_core::{StampError, StorageError};
    use std::cell::Cell;

    fn guard() -> ChangeTokenGuard<MemoryCacheBackend> {
        ChangeTokenGuard::new(Arc::new(MemoryCacheBackend::new()))
    }

    #[test]
    fn test_miss_then_hit() {
        let guard = guard();
        let group = GroupId::new("pages").unwrap();
        let calls = Cell::new(0);

        let first = guard
            .cached_query(&group, &json!({"number": 5}), || {
                calls.set(calls.get() + 1);
                Ok(vec!["a".to_string()])
            })
            .unwrap();
        let second = guard
            .cached_query(&group, &json!({"number": 5}), || {
                calls.set(calls.get() + 1);
                Ok(vec!["b".to_string()])
            })
            .unwrap();

        assert!(first.was_cache_miss());
        assert!(second.was_cache_hit());
        assert_eq!(second.value(), &vec!["a".to_string()]);
        assert_eq!(first.key(), second.key());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_one_write_per_miss_none_per_hit() {
        let guard = guard();
        let group = GroupId::new("pages").unwrap();
        guard.current_token(&group);
        let writes_before = guard.backend().stats().unwrap().writes;

        guard.cached_query(&group, &json!({}), || Ok(1u32)).unwrap();
        let after_miss = guard.backend().stats().unwrap().writes;
        guard.cached_query(&group, &json!({}), || Ok(2u32)).unwrap();
        let after_hit = guard.backend().stats().unwrap().writes;

        assert_eq!(after_miss - writes_before, 1);
        assert_eq!(after_hit, after_miss);
    }

    #[test]
    fn test_bump_forces_recompute() {
        let guard = guard();
        let group = GroupId::new("pages").unwrap();

        guard.cached_query(&group, &json!({"a": 1}), || Ok(1u32)).unwrap();
        guard.bump_token(&group);
        let read = guard.cached_query(&group, &json!({"a": 1}), || Ok(2u32)).unwrap();

        assert!(read.was_cache_miss());
        assert_eq!(read.into_value(), 2);
    }

    #[test]
    fn test_bump_tokens_bumps_each_group() {
        let guard = guard();
        let records = GroupId::records();
        let terms = GroupId::terms();
        let r0 = guard.current_token(&records);
        let t0 = guard.current_token(&terms);

        let bumped = guard.bump_tokens(&[records.clone(), terms.clone()]);
        assert_eq!(bumped.len(), 2);
        assert_ne!(guard.current_token(&records), r0);
        assert_ne!(guard.current_token(&terms), t0);
    }

    #[test]
    fn test_compute_error_is_not_cached() {
        let guard = guard();
        let group = GroupId::records();

        let err = guard
            .cached_query::<u32, _, _>(&group, &json!({}), || {
                Err(StorageError::LockPoisoned.into())
            })
            .unwrap_err();
        assert_eq!(err, StampError::Storage(StorageError::LockPoisoned));

        let read = guard.cached_query(&group, &json!({}), || Ok(7u32)).unwrap();
        assert!(read.was_cache_miss());
    }

    #[test]
    fn test_undecodable_payload_is_a_miss() {
        let guard = guard();
        let group = GroupId::records();
        let key = guard.compute_cache_key(&group, &json!({})).unwrap();
        guard.backend().set(key.as_str(), b"not json").unwrap();

        let read = guard.cached_query(&group, &json!({}), || Ok(3u32)).unwrap();
        assert!(read.was_cache_miss());
        assert_eq!(read.into_value(), 3);

        let again = guard.cached_query(&group, &json!({}), || Ok(4u32)).unwrap();
        assert!(again.was_cache_hit());
        assert_eq!(again.into_value(), 3);
    }

    #[test]
    fn test_malformed_params_fail_before_compute() {
        use std::collections::HashMap;

        let guard = guard();
        let mut params: HashMap<Vec<u8>, u8> = HashMap::new();
        params.insert(vec![1], 1);

        let called = Cell::new(false);
        let result = guard.cached_query(&GroupId::records(), &params, || {
            called.set(true);
            Ok(0u8)
        });
        assert!(result.is_err());
        assert!(!called.get());
    }

    #[test]
    fn test_item_helpers() {
        let guard = guard();
        assert!(guard.set_item("record:1", &json!({"title": "x"})));
        assert_eq!(
            guard.get_item::<serde_json::Value>("record:1"),
            Some(json!({"title": "x"}))
        );
        assert!(guard.delete_item("record:1"));
        assert_eq!(guard.get_item::<serde_json::Value>("record:1"), None);
    }
}
