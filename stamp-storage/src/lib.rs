//! stamp Storage - Change-Token Cache and Record Store
//!
//! The [`cache`] module implements read-through caching for derived queries,
//! invalidated by per-group change tokens. The [`store`] module is an
//! in-memory record store whose reads go through that cache and whose writes
//! bump the tokens.

pub mod cache;
pub mod store;

pub use cache::{
    open_backend, CacheBackend, CacheKey, CacheRead, CacheStats, ChangeToken, ChangeTokenGuard,
    ClockTokenSource, LmdbCacheBackend, LmdbCacheError, MemoryCacheBackend, TokenSource,
};
pub use store::{record_cache_key, RecordStore, TRASH_STATUS_META, TRASH_TIME_META};
