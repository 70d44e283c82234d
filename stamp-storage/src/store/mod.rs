//! In-memory record store driven through the change-token cache.
//!
//! Every read that derives a list or aggregate goes through
//! [`ChangeTokenGuard::cached_query`]. Every write mutates the tables, bumps
//! the affected groups (`records`, and `terms` when term counts move), drops
//! the per-record cache entries it touched, and then fires a
//! [`RecordEvent`]. Invalidation happens under the table write lock, so a
//! reader can never cache a record it read before the write landed.
//!
//! Listings use a split query: the id list is cached per query, and the
//! records themselves are loaded from per-record entries, with all misses
//! fetched in one storage query.

mod revisions;
mod tables;
mod terms;
mod writes;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use stamp_core::{
    GroupId, Hooks, PageQuery, Record, RecordEvent, RecordId, RecordQuery, RecordStatus, Registry,
    StampConfig, StampResult, StorageError,
};
use tracing::debug;

use crate::cache::{item_key, CacheBackend, CacheRead, ChangeTokenGuard};
use tables::Tables;

pub use writes::{TRASH_STATUS_META, TRASH_TIME_META};

/// Key prefix of per-record cache entries.
pub const RECORD_KEY_PREFIX: &str = "record";

/// Backend key of the cached copy of one record.
pub fn record_cache_key(id: RecordId) -> String {
    item_key(RECORD_KEY_PREFIX, id)
}

#[derive(Serialize)]
struct CountParams<'a> {
    count_records: &'a str,
}

/// Record store with change-token cached reads.
pub struct RecordStore<B: CacheBackend + ?Sized> {
    registry: Arc<Registry>,
    hooks: Hooks,
    guard: ChangeTokenGuard<B>,
    config: StampConfig,
    tables: RwLock<Tables>,
    /// Number of reads that hit the tables.
    queries: AtomicU64,
}

impl<B: CacheBackend + ?Sized> RecordStore<B> {
    pub fn new(
        registry: Arc<Registry>,
        hooks: Hooks,
        guard: ChangeTokenGuard<B>,
        config: StampConfig,
    ) -> Self {
        Self {
            registry,
            hooks,
            guard,
            config,
            tables: RwLock::new(Tables::default()),
            queries: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &StampConfig {
        &self.config
    }

    pub fn guard(&self) -> &ChangeTokenGuard<B> {
        &self.guard
    }

    /// How many storage queries have run so far.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Take a read lock on the tables, counting it as one storage query.
    fn read_tables(&self) -> StampResult<RwLockReadGuard<'_, Tables>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.tables.read().map_err(|_| StorageError::LockPoisoned.into())
    }

    fn write_tables(&self) -> StampResult<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| StorageError::LockPoisoned.into())
    }

    /// Bump `groups` and drop cached copies of `touched`.
    ///
    /// Called with the table write lock held.
    fn invalidate(&self, groups: &[GroupId], touched: &[RecordId]) {
        self.guard.bump_tokens(groups);
        for id in touched {
            self.guard.delete_item(&record_cache_key(*id));
        }
    }

    fn dispatch(&self, event: RecordEvent) {
        self.hooks.record_changed.dispatch(&event);
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Fetch one record, from its cache entry when present.
    pub fn get_record(&self, id: RecordId) -> StampResult<Option<Record>> {
        let key = record_cache_key(id);
        if let Some(record) = self.guard.get_item::<Record>(&key) {
            return Ok(Some(record));
        }

        let tables = self.read_tables()?;
        let record = tables.records.get(&id).cloned();
        if let Some(record) = &record {
            self.guard.set_item(&key, record);
        }
        Ok(record)
    }

    /// Ids matching `query`, cached under the `records` group.
    ///
    /// The `query_params` filter runs first and the page size is resolved
    /// against the configuration, so the cache key reflects the query that
    /// actually ran.
    pub fn query_record_ids(&self, query: &RecordQuery) -> StampResult<CacheRead<Vec<RecordId>>> {
        let mut query = self.hooks.query_params.apply(query.clone());
        query.number = Some(self.config.effective_page_size(query.number));
        // Statuses are a set; order must not split the cache key.
        query.status.sort();
        query.status.dedup();

        self.guard
            .cached_query(&GroupId::records(), &query, || {
                let tables = self.read_tables()?;
                Ok(tables.select_ids(&query))
            })
    }

    /// Make sure every id in `ids` has a per-record cache entry.
    ///
    /// Ids already cached cost nothing; the rest are fetched in a single
    /// storage query. Returns how many records were fetched.
    pub fn prime_record_caches(&self, ids: &[RecordId]) -> StampResult<usize> {
        self.load_records(ids).map(|(_, fetched)| fetched)
    }

    /// Records for `ids`, in order. Ids that no longer exist are skipped.
    fn load_records(&self, ids: &[RecordId]) -> StampResult<(Vec<Record>, usize)> {
        let mut found: HashMap<RecordId, Record> = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            match self.guard.get_item::<Record>(&record_cache_key(*id)) {
                Some(record) => {
                    found.insert(*id, record);
                }
                None => missing.push(*id),
            }
        }

        let mut fetched = 0;
        if !missing.is_empty() {
            let tables = self.read_tables()?;
            for id in &missing {
                if let Some(record) = tables.records.get(id) {
                    self.guard.set_item(&record_cache_key(*id), record);
                    found.insert(*id, record.clone());
                    fetched += 1;
                }
            }
            debug!(requested = ids.len(), fetched, "Primed record caches");
        }

        let records = ids.iter().filter_map(|id| found.remove(id)).collect();
        Ok((records, fetched))
    }

    /// Run `query` and materialise its records.
    ///
    /// The `query_results` filter runs on every call, after the cached id
    /// list has been resolved.
    pub fn query_records(&self, query: &RecordQuery) -> StampResult<Vec<Record>> {
        let ids = self.query_record_ids(query)?.into_value();
        let (records, _) = self.load_records(&ids)?;
        Ok(self.hooks.query_results.apply(records))
    }

    /// Published pages ordered by menu order, then title.
    pub fn get_pages(&self, query: PageQuery) -> StampResult<Vec<Record>> {
        self.query_records(&query.into_record_query())
    }

    /// Number of records of `record_type` per status.
    pub fn count_records(&self, record_type: &str) -> StampResult<BTreeMap<RecordStatus, usize>> {
        self.registry.require_record_type(record_type)?;
        let params = CountParams {
            count_records: record_type,
        };
        let read = self.guard.cached_query(&GroupId::records(), &params, || {
            let tables = self.read_tables()?;
            let mut counts: BTreeMap<RecordStatus, usize> = BTreeMap::new();
            for record in tables.records.values() {
                if record.record_type() == record_type {
                    *counts.entry(record.status()).or_default() += 1;
                }
            }
            // Status enums are not JSON map keys; cache as pairs.
            Ok(counts.into_iter().collect::<Vec<(RecordStatus, usize)>>())
        })?;
        Ok(read.into_value().into_iter().collect())
    }
}
