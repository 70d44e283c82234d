//! stamp Test Utilities
//!
//! Shared test infrastructure for the stamp workspace:
//! - Fault-injecting cache backends and deterministic token sources
//! - Proptest generators for params, groups, and records
//! - Fixtures for guards and record stores
//! - Custom assertions for stamp errors and cache reads

// Re-export core types for convenience
pub use stamp_core::{
    BackendConfig, CacheError, ConfigError, GroupId, Hooks, NewRecord, PageQuery, Record,
    RecordEvent, RecordId, RecordQuery, RecordStatus, RecordUpdate, Registry, StampConfig,
    StampError, StampResult, StorageError, TermId, ValidationError,
};
pub use stamp_storage::{
    CacheBackend, CacheRead, CacheStats, ChangeTokenGuard, MemoryCacheBackend, RecordStore,
    TokenSource,
};

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Once};

// ============================================================================
// MOCK BACKENDS AND TOKEN SOURCES
// ============================================================================

/// Memory backend whose reads and writes can be made to fail on demand.
///
/// Failing writes cover `set`, `add`, and `delete`. `stats` always works so
/// tests can inspect what reached the inner backend.
#[derive(Debug, Default)]
pub struct FaultyBackend {
    inner: MemoryCacheBackend,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FaultyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that fails every read and write.
    pub fn unavailable() -> Self {
        let backend = Self::new();
        backend.set_fail_reads(true);
        backend.set_fail_writes(true);
        backend
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryCacheBackend {
        &self.inner
    }

    fn check(&self, flag: &AtomicBool, op: &str) -> StampResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable {
                reason: format!("injected {} failure", op),
            }
            .into());
        }
        Ok(())
    }
}

impl CacheBackend for FaultyBackend {
    fn get(&self, key: &str) -> StampResult<Option<Vec<u8>>> {
        self.check(&self.fail_reads, "read")?;
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> StampResult<()> {
        self.check(&self.fail_writes, "write")?;
        self.inner.set(key, value)
    }

    fn add(&self, key: &str, value: &[u8]) -> StampResult<bool> {
        self.check(&self.fail_writes, "write")?;
        self.inner.add(key, value)
    }

    fn delete(&self, key: &str) -> StampResult<bool> {
        self.check(&self.fail_writes, "write")?;
        self.inner.delete(key)
    }

    fn flush(&self) -> StampResult<u64> {
        self.check(&self.fail_writes, "write")?;
        self.inner.flush()
    }

    fn stats(&self) -> StampResult<CacheStats> {
        self.inner.stats()
    }
}

/// Deterministic token source yielding `t1`, `t2`, ...
#[derive(Debug, Default)]
pub struct SequenceTokenSource {
    next: AtomicU64,
}

impl SequenceTokenSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenSource for SequenceTokenSource {
    fn next_token(&self, previous: Option<&str>) -> String {
        loop {
            let value = format!("t{}", self.next.fetch_add(1, Ordering::SeqCst) + 1);
            if previous != Some(value.as_str()) {
                return value;
            }
        }
    }
}

/// Compute-function stand-in that counts its invocations.
#[derive(Debug, Default)]
pub struct CountingCompute {
    calls: AtomicUsize,
}

impl CountingCompute {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one invocation and return `value`.
    pub fn call<T>(&self, value: T) -> StampResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a test-writer subscriber honoring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("stamp=warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache params, groups, and records.

    use super::*;
    use proptest::prelude::*;
    use serde::ser::{Serialize, SerializeMap, Serializer};
    use serde_json::Value;

    /// A valid cache group name.
    pub fn arb_group_id() -> impl Strategy<Value = GroupId> {
        "[a-z][a-z0-9_-]{0,15}"
            .prop_filter("reserved name", |s| s != GroupId::RESERVED_TOKEN_PREFIX)
            .prop_map(|s| GroupId::new(s).expect("pattern yields valid group ids"))
    }

    /// Two distinct group names.
    pub fn arb_group_pair() -> impl Strategy<Value = (GroupId, GroupId)> {
        (arb_group_id(), arb_group_id()).prop_filter("groups must differ", |(a, b)| a != b)
    }

    /// A scalar JSON value.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-z0-9 ]{0,12}".prop_map(Value::from),
        ]
    }

    /// Arbitrary nested JSON, up to a few levels deep.
    pub fn arb_json() -> impl Strategy<Value = Value> {
        arb_scalar().prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    /// Query params: a JSON object with unique keys, as entries.
    pub fn arb_param_entries() -> impl Strategy<Value = Vec<(String, Value)>> {
        prop::collection::btree_map("[a-z_]{1,8}", arb_json(), 0..6)
            .prop_map(|m| m.into_iter().collect())
    }

    /// The same param entries in two independent orders.
    pub fn arb_param_permutations() -> impl Strategy<Value = (Vec<(String, Value)>, Vec<(String, Value)>)>
    {
        arb_param_entries().prop_flat_map(|entries| {
            let a = Just(entries.clone()).prop_shuffle();
            let b = Just(entries).prop_shuffle();
            (a, b)
        })
    }

    /// Params serialized as a map in exactly the order of their entries.
    #[derive(Debug, Clone, PartialEq)]
    pub struct OrderedParams(pub Vec<(String, Value)>);

    impl Serialize for OrderedParams {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let mut map = serializer.serialize_map(Some(self.0.len()))?;
            for (k, v) in &self.0 {
                map.serialize_entry(k, v)?;
            }
            map.end()
        }
    }

    pub fn arb_record_status() -> impl Strategy<Value = RecordStatus> {
        prop_oneof![
            Just(RecordStatus::Publish),
            Just(RecordStatus::Draft),
            Just(RecordStatus::Pending),
            Just(RecordStatus::Private),
        ]
    }

    /// A new record of `record_type` with a random title, status, and order.
    pub fn arb_new_record(record_type: &'static str) -> impl Strategy<Value = NewRecord> {
        ("[A-Za-z ]{1,20}", arb_record_status(), -5i32..5).prop_map(
            move |(title, status, menu_order)| {
                NewRecord::new(record_type, title)
                    .with_status(status)
                    .with_menu_order(menu_order)
            },
        )
    }

    /// A listing query over posts.
    pub fn arb_record_query() -> impl Strategy<Value = RecordQuery> {
        (
            proptest::option::of(arb_record_status()),
            proptest::option::of(1usize..20),
            0usize..5,
        )
            .prop_map(|(status, number, offset)| {
                let mut query = RecordQuery::new().record_type("post").offset(offset);
                if let Some(status) = status {
                    query = query.status(status);
                }
                if let Some(number) = number {
                    query = query.number(number);
                }
                query
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built guards and stores for common testing scenarios.

    use super::*;

    /// Guard over a fresh unbounded memory backend.
    pub fn memory_guard() -> ChangeTokenGuard<MemoryCacheBackend> {
        ChangeTokenGuard::new(Arc::new(MemoryCacheBackend::new()))
    }

    /// Guard over `backend` with deterministic `t1, t2, ...` tokens.
    pub fn sequenced_guard<B: CacheBackend>(backend: Arc<B>) -> ChangeTokenGuard<B> {
        ChangeTokenGuard::with_token_source(backend, Arc::new(SequenceTokenSource::new()))
    }

    /// Record store with the default registry and configuration.
    pub fn memory_store() -> RecordStore<MemoryCacheBackend> {
        store_with(Arc::new(MemoryCacheBackend::new()), Hooks::new(), StampConfig::default())
    }

    /// Record store over `backend` with the given hooks and configuration.
    pub fn store_with<B: CacheBackend>(
        backend: Arc<B>,
        hooks: Hooks,
        config: StampConfig,
    ) -> RecordStore<B> {
        RecordStore::new(
            Arc::new(Registry::with_defaults()),
            hooks,
            ChangeTokenGuard::new(backend),
            config,
        )
    }

    /// Insert `count` published pages titled `Page 1`, `Page 2`, ...
    pub fn insert_pages<B: CacheBackend>(store: &RecordStore<B>, count: usize) -> Vec<RecordId> {
        (1..=count)
            .map(|i| {
                store
                    .insert_record(
                        NewRecord::new("page", format!("Page {}", i)).with_menu_order(i as i32),
                    )
                    .expect("fixture page insert")
            })
            .collect()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for stamp-specific results.

    use super::*;

    /// Assert that a StampResult is a RecordNotFound storage error for `id`.
    #[track_caller]
    pub fn assert_record_not_found<T: std::fmt::Debug>(result: &StampResult<T>, id: RecordId) {
        match result {
            Err(StampError::Storage(StorageError::RecordNotFound { id: got })) => {
                assert_eq!(*got, id.as_uuid(), "Wrong id in RecordNotFound error");
            }
            other => panic!("Expected RecordNotFound for {}, got: {:?}", id, other),
        }
    }

    /// Assert that a StampResult is a Validation error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &StampResult<T>) {
        match result {
            Err(StampError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a StampResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &StampResult<T>) {
        match result {
            Err(StampError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_cache_hit<T>(read: &CacheRead<T>) {
        assert!(read.was_cache_hit(), "Expected cache hit for {}", read.key());
    }

    #[track_caller]
    pub fn assert_cache_miss<T>(read: &CacheRead<T>) {
        assert!(read.was_cache_miss(), "Expected cache miss for {}", read.key());
    }

    /// Assert that `records` carry exactly `titles`, in order.
    #[track_caller]
    pub fn assert_titles(records: &[Record], titles: &[&str]) {
        let got: Vec<&str> = records.iter().map(|r| r.fields.title.as_str()).collect();
        assert_eq!(got, titles);
    }
}

// ============================================================================
// TESTS
// ============================================================================
