//! stamp Core - Record, Registry, and Hook Types
//!
//! Pure data structures shared by the cache layer and the record store.
//! This crate performs no I/O.

pub mod config;
pub mod error;
pub mod hooks;
pub mod identity;
pub mod query;
pub mod record;
pub mod registry;

pub use config::{BackendConfig, StampConfig};
pub use error::{
    CacheError, ConfigError, StampError, StampResult, StorageError, ValidationError,
};
pub use hooks::{ActionList, FilterChain, Hooks, RecordEvent};
pub use identity::{GroupId, RecordId, RevisionId, TermId, Timestamp, KEY_SEPARATOR};
pub use query::{Order, OrderBy, PageQuery, RecordQuery};
pub use record::{
    FieldValue, NewRecord, Record, RecordFields, RecordStatus, RecordStatusParseError,
    RecordUpdate, Revision, Term,
};
pub use registry::{RecordTypeDef, Registry, RegistryBuilder, TaxonomyDef};

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any group name containing the key separator is rejected.
        #[test]
        fn prop_group_id_rejects_separator(prefix in "[a-z]{0,8}", suffix in "[a-z]{0,8}") {
            let name = format!("{}{}{}", prefix, KEY_SEPARATOR, suffix);
            prop_assert!(GroupId::new(name).is_err());
        }

        /// Any non-empty name of word characters is accepted verbatim.
        #[test]
        fn prop_group_id_accepts_word_names(name in "[a-zA-Z0-9_-]{1,32}") {
            let group = GroupId::new(name.clone());
            prop_assert!(group.is_ok());
            let group = group.unwrap();
            prop_assert_eq!(group.as_str(), name.as_str());
        }

        /// Page sizes always land in 1..=max_page_size.
        #[test]
        fn prop_effective_page_size_is_clamped(requested in proptest::option::of(0usize..100_000)) {
            let config = StampConfig::default();
            let size = config.effective_page_size(requested);
            prop_assert!(size >= 1);
            prop_assert!(size <= config.max_page_size);
        }

        /// A default-size page bigger than the ceiling never validates.
        #[test]
        fn prop_config_rejects_default_above_max(max in 1usize..500, extra in 1usize..500) {
            let config = StampConfig {
                default_page_size: max + extra,
                max_page_size: max,
                ..Default::default()
            };
            let result = config.validate();
            if let Err(StampError::Config(ConfigError::InvalidValue { field, .. })) = result {
                prop_assert_eq!(field, "default_page_size");
            } else {
                prop_assert!(false, "Expected ConfigError::InvalidValue");
            }
        }

        /// Filter chains apply every callback exactly once, in order.
        #[test]
        fn prop_filter_chain_is_ordered_composition(adds in proptest::collection::vec(-100i64..100, 0..10)) {
            let mut chain = FilterChain::new();
            for (i, n) in adds.iter().copied().enumerate() {
                chain.add(move |acc: Vec<(usize, i64)>| {
                    let mut acc = acc;
                    acc.push((i, n));
                    acc
                });
            }
            let out = chain.apply(Vec::new());
            let expected: Vec<(usize, i64)> = adds.iter().copied().enumerate().collect();
            prop_assert_eq!(out, expected);
        }
    }
}
