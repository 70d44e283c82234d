//! LMDB-backed cache implementation.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a persistent,
//! memory-mapped key-value store. Change tokens stored here survive process
//! restarts, so cached results stay reachable across them until the next bump.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get` and `stats`
//! - Write transactions for `set`, `add`, `delete`, and `flush`
//! - `add` checks and inserts inside one write transaction

use std::path::Path;
use std::sync::RwLock;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use stamp_core::{CacheError, ConfigError, StampError, StampResult};

use super::traits::{CacheBackend, CacheStats};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Requested size does not fit in a byte count.
    #[error("Map size of {0} MB overflows usize")]
    MapSize(usize),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for StampError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::EnvOpen(_) | LmdbCacheError::DbOpen(_) | LmdbCacheError::Io(_) => {
                StampError::Cache(CacheError::Unavailable {
                    reason: e.to_string(),
                })
            }
            LmdbCacheError::Transaction(_) => StampError::Cache(CacheError::TransactionFailed {
                reason: e.to_string(),
            }),
            LmdbCacheError::MapSize(max_size_mb) => StampError::Config(ConfigError::InvalidValue {
                field: "backend.max_size_mb".to_string(),
                value: max_size_mb.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// LMDB-backed cache backend.
///
/// # Example
///
/// ```ignore
/// use stamp_storage::cache::{CacheBackend, LmdbCacheBackend};
///
/// let backend = LmdbCacheBackend::new("/tmp/stamp-cache", 64)?;
/// backend.set("records:1760000000.000001:ab12", b"[]")?;
/// let cached = backend.get("records:1760000000.000001:ab12")?;
/// ```
pub struct LmdbCacheBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    /// Hit/miss/write counters. Entry count is read from LMDB on demand.
    stats: RwLock<CacheStats>,
}

impl LmdbCacheBackend {
    /// Create a new LMDB cache backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    /// - `max_size_mb` overflows when converted to bytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        let map_size = max_size_mb
            .checked_mul(1024 * 1024)
            .ok_or(LmdbCacheError::MapSize(max_size_mb))?;
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // never resized while transactions are live.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            db,
            stats: RwLock::new(CacheStats::default()),
        })
    }

    fn record(&self, f: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }

    fn entry_count(&self) -> Result<u64, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.db.len(&rtxn).map_err(txn_err)
    }
}

impl CacheBackend for LmdbCacheBackend {
    fn get(&self, key: &str) -> StampResult<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;

        match self.db.get(&rtxn, key.as_bytes()) {
            Ok(Some(bytes)) => {
                self.record(|s| s.hits += 1);
                Ok(Some(bytes.to_vec()))
            }
            Ok(None) => {
                self.record(|s| s.misses += 1);
                Ok(None)
            }
            Err(e) => {
                self.record(|s| s.misses += 1);
                Err(txn_err(e).into())
            }
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> StampResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), value)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        self.record(|s| s.writes += 1);
        Ok(())
    }

    fn add(&self, key: &str, value: &[u8]) -> StampResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        if self
            .db
            .get(&wtxn, key.as_bytes())
            .map_err(txn_err)?
            .is_some()
        {
            // Dropping the write transaction aborts it.
            return Ok(false);
        }
        self.db
            .put(&mut wtxn, key.as_bytes(), value)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        self.record(|s| s.writes += 1);
        Ok(true)
    }

    fn delete(&self, key: &str) -> StampResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let deleted = self
            .db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    fn flush(&self) -> StampResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let count = self.db.len(&wtxn).map_err(txn_err)?;
        self.db.clear(&mut wtxn).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(count)
    }

    fn stats(&self) -> StampResult<CacheStats> {
        let mut stats = self
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.entry_count = self.entry_count()?;
        Ok(stats)
    }
}
