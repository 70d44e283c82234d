//! Change-token cache layer.
//!
//! Derived query results are cached under keys that embed a per-group
//! change token. Writers bump the token instead of enumerating and deleting
//! entries, so one bump invalidates every result cached for the group.
//!
//! # Layout
//!
//! - [`CacheBackend`]: plain key-value storage ([`MemoryCacheBackend`],
//!   [`LmdbCacheBackend`])
//! - [`ChangeToken`] / [`TokenSource`]: the per-group version stamps
//! - [`CacheKey`]: `<group>:<token>:<hash(params)>` composition
//! - [`ChangeTokenGuard`]: read-through lookups returning [`CacheRead<T>`]
//!
//! # Example
//!
//! ```ignore
//! let backend = open_backend(&config.backend)?;
//! let guard = ChangeTokenGuard::new(backend);
//!
//! let read = guard.cached_query(&GroupId::records(), &query, || run_query(&query))?;
//! if read.was_cache_hit() {
//!     tracing::debug!("served from cache");
//! }
//! ```

pub mod cache_key;
pub mod cache_read;
pub mod change_token;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod read_through;
pub mod traits;

use std::sync::Arc;

use stamp_core::{BackendConfig, StampResult};
use tracing::info;

pub use cache_key::{canonicalize, hash_params, item_key, stable_hash, token_storage_key, CacheKey};
pub use cache_read::CacheRead;
pub use change_token::{ChangeToken, ChangeTokenStore, ClockTokenSource, TokenSource};
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory_backend::MemoryCacheBackend;
pub use read_through::ChangeTokenGuard;
pub use traits::{CacheBackend, CacheStats};

/// Build the backend described by `config`.
pub fn open_backend(config: &BackendConfig) -> StampResult<Arc<dyn CacheBackend>> {
    match config {
        BackendConfig::Memory { max_entries } => {
            info!(max_entries = ?max_entries, "Opening in-memory cache backend");
            let backend = match max_entries {
                Some(max) => MemoryCacheBackend::with_capacity(*max),
                None => MemoryCacheBackend::new(),
            };
            Ok(Arc::new(backend))
        }
        BackendConfig::Lmdb { path, max_size_mb } => {
            info!(path = %path.display(), max_size_mb, "Opening LMDB cache backend");
            let backend = LmdbCacheBackend::new(path, *max_size_mb)?;
            Ok(Arc::new(backend))
        }
    }
}
