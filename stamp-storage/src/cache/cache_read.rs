//! Result wrapper for read-through cache lookups.

use super::cache_key::CacheKey;
use super::change_token::ChangeToken;

/// Result of a read-through lookup.
///
/// Carries the value together with the token it was computed against and
/// the key it lives under, so callers can tell a hit from a recompute.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    /// The cached or freshly computed value.
    value: T,
    /// The group token the value belongs to.
    token: ChangeToken,
    /// The key the value was read from or written to.
    key: CacheKey,
    /// Whether this was a cache hit or miss.
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    /// Create a new cache read from a cache hit.
    pub fn from_cache(value: T, token: ChangeToken, key: CacheKey) -> Self {
        Self {
            value,
            token,
            key,
            was_cache_hit: true,
        }
    }

    /// Create a new cache read from a recompute (cache miss).
    pub fn from_compute(value: T, token: ChangeToken, key: CacheKey) -> Self {
        Self {
            value,
            token,
            key,
            was_cache_hit: false,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn token(&self) -> &ChangeToken {
        &self.token
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Check if this was a cache hit.
    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    /// Check if this was a cache miss (value was recomputed).
    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            token: self.token,
            key: self.key,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
