//! Per-group change tokens.
//!
//! A change token is an opaque string stored under `last_changed:<group>`.
//! Reads create it lazily; every write that can affect derived results for
//! the group replaces it with a new, distinct value. Callers compare tokens
//! for equality only.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use chrono::Utc;
use stamp_core::GroupId;
use tracing::{debug, warn};

use super::cache_key::token_storage_key;
use super::traits::CacheBackend;

/// The current version stamp of one cache group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeToken {
    group: GroupId,
    value: String,
}

impl ChangeToken {
    pub fn new(group: GroupId, value: impl Into<String>) -> Self {
        Self {
            group,
            value: value.into(),
        }
    }

    pub fn group(&self) -> &GroupId {
        &self.group
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn into_value(self) -> String {
        self.value
    }
}

impl fmt::Display for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.group, self.value)
    }
}

/// Generator of fresh token values.
///
/// Implementations must never return `previous` itself. Values from
/// concurrent callers need not be ordered, only distinct from what they
/// replace.
pub trait TokenSource: Send + Sync {
    fn next_token(&self, previous: Option<&str>) -> String;
}

/// Wall-clock token source producing `"<unix_secs>.<micros:06>"`.
///
/// A process-wide high-water mark keeps successive values strictly
/// increasing even when the clock stalls or steps backwards. The mark is
/// raised past any `previous` value in the same format, so a token stored by
/// an earlier process is never handed out again after a restart.
#[derive(Debug, Default)]
pub struct ClockTokenSource {
    high_water_micros: AtomicI64,
}

impl ClockTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_micros(&self) -> i64 {
        let now = Utc::now().timestamp_micros();
        let mut current = self.high_water_micros.load(Ordering::Acquire);
        loop {
            let next = now.max(current + 1);
            match self.high_water_micros.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    fn parse(value: &str) -> Option<i64> {
        let (secs, micros) = value.split_once('.')?;
        if micros.len() != 6 {
            return None;
        }
        let secs: i64 = secs.parse().ok()?;
        let micros: i64 = micros.parse().ok()?;
        secs.checked_mul(1_000_000)?.checked_add(micros)
    }

    fn format(micros: i64) -> String {
        format!(
            "{}.{:06}",
            micros.div_euclid(1_000_000),
            micros.rem_euclid(1_000_000)
        )
    }
}

impl TokenSource for ClockTokenSource {
    fn next_token(&self, previous: Option<&str>) -> String {
        if let Some(floor) = previous.and_then(Self::parse) {
            self.high_water_micros.fetch_max(floor, Ordering::AcqRel);
        }
        loop {
            let value = Self::format(self.next_micros());
            // Another process sharing a persistent backend may have stored
            // this exact value already.
            if previous != Some(value.as_str()) {
                return value;
            }
        }
    }
}

/// Reads and bumps change tokens held in a cache backend.
///
/// Backend failures never surface from here: an unreadable token is
/// replaced by a fresh unstored value, which makes every derived lookup
/// miss until the backend recovers.
///
/// A bump whose value could not be written is held in `unpersisted` and
/// served in place of the stored token until a later write of it succeeds.
/// Clones share that map.
pub struct ChangeTokenStore<B: CacheBackend + ?Sized> {
    backend: Arc<B>,
    source: Arc<dyn TokenSource>,
    unpersisted: Arc<RwLock<HashMap<GroupId, String>>>,
}

impl<B: CacheBackend + ?Sized> Clone for ChangeTokenStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            source: Arc::clone(&self.source),
            unpersisted: Arc::clone(&self.unpersisted),
        }
    }
}

impl<B: CacheBackend + ?Sized> ChangeTokenStore<B> {
    pub fn new(backend: Arc<B>, source: Arc<dyn TokenSource>) -> Self {
        Self {
            backend,
            source,
            unpersisted: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Groups whose latest bump has not reached the backend yet.
    pub fn unpersisted_groups(&self) -> Vec<GroupId> {
        self.unpersisted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn unpersisted_mut(&self) -> RwLockWriteGuard<'_, HashMap<GroupId, String>> {
        self.unpersisted.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the stored token for `group`, creating it if absent.
    ///
    /// A bump that failed to persist wins over whatever the backend holds.
    pub fn current(&self, group: &GroupId) -> ChangeToken {
        let key = token_storage_key(group);

        let has_unpersisted = self
            .unpersisted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(group);
        if has_unpersisted {
            let mut unpersisted = self.unpersisted_mut();
            if let Some(value) = unpersisted.get(group).cloned() {
                match self.backend.set(&key, value.as_bytes()) {
                    Ok(()) => {
                        unpersisted.remove(group);
                        debug!(target: "stamp::cache", group = %group, token = %value, "Persisted deferred change token");
                    }
                    Err(e) => {
                        debug!(target: "stamp::cache", group = %group, error = %e, "Change token still unpersisted");
                    }
                }
                return ChangeToken::new(group.clone(), value);
            }
        }

        match self.backend.get(&key) {
            Ok(Some(bytes)) => match decode_token(bytes) {
                Some(value) => return ChangeToken::new(group.clone(), value),
                None => {
                    warn!(target: "stamp::cache", group = %group, "Stored change token is not valid UTF-8, replacing it");
                    return self.bump(group);
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(target: "stamp::cache", group = %group, error = %e, "Change token read failed, using an unstored token");
                return ChangeToken::new(group.clone(), self.source.next_token(None));
            }
        }

        let fresh = self.source.next_token(None);
        match self.backend.add(&key, fresh.as_bytes()) {
            Ok(true) => {
                debug!(target: "stamp::cache", group = %group, token = %fresh, "Initialized change token");
                ChangeToken::new(group.clone(), fresh)
            }
            Ok(false) => {
                // Lost the race to another reader; use whatever it stored.
                match self.backend.get(&key) {
                    Ok(Some(bytes)) => match decode_token(bytes) {
                        Some(value) => ChangeToken::new(group.clone(), value),
                        None => ChangeToken::new(group.clone(), fresh),
                    },
                    _ => ChangeToken::new(group.clone(), fresh),
                }
            }
            Err(e) => {
                warn!(target: "stamp::cache", group = %group, error = %e, "Change token store failed, using an unstored token");
                ChangeToken::new(group.clone(), fresh)
            }
        }
    }

    /// Replace the token for `group` with a new distinct value.
    ///
    /// If the new value cannot be stored, it is kept as this store's
    /// unpersisted token for the group and the stored one is deleted when
    /// possible, so neither this process nor others reuse the old token.
    pub fn bump(&self, group: &GroupId) -> ChangeToken {
        let key = token_storage_key(group);
        let mut unpersisted = self.unpersisted_mut();

        let previous = match unpersisted.get(group) {
            Some(value) => Some(value.clone()),
            None => match self.backend.get(&key) {
                Ok(Some(bytes)) => decode_token(bytes),
                _ => None,
            },
        };
        let value = self.source.next_token(previous.as_deref());

        match self.backend.set(&key, value.as_bytes()) {
            Ok(()) => {
                unpersisted.remove(group);
                debug!(target: "stamp::cache", group = %group, token = %value, "Bumped change token");
            }
            Err(e) => {
                warn!(target: "stamp::cache", group = %group, error = %e, "Change token bump failed, holding it unpersisted");
                unpersisted.insert(group.clone(), value.clone());
                if let Err(e) = self.backend.delete(&key) {
                    warn!(target: "stamp::cache", group = %group, error = %e, "Change token delete failed");
                }
            }
        }

        ChangeToken::new(group.clone(), value)
    }
}

fn decode_token(bytes: Vec<u8>) -> Option<String> {
    String::from_utf8(bytes).ok().filter(|v| !v.is_empty())
}
