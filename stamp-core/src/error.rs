//! Error types for stamp operations

use thiserror::Error;
use uuid::Uuid;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Record not found: {id}")]
    RecordNotFound { id: Uuid },

    #[error("Term not found: {id}")]
    TermNotFound { id: Uuid },

    #[error("Revision not found: {id}")]
    RevisionNotFound { id: Uuid },

    #[error("Insert failed for {record_type}: {reason}")]
    InsertFailed { record_type: String, reason: String },

    #[error("Update failed for record {id}: {reason}")]
    UpdateFailed { id: Uuid, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Cache backend errors.
///
/// These never reach callers of a read-through query; the cache guard
/// absorbs them and falls back to recomputation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Failed to encode cache payload: {reason}")]
    Encode { reason: String },

    #[error("Failed to decode cache payload for key {key}: {reason}")]
    Decode { key: String, reason: String },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown record type: {name}")]
    UnknownRecordType { name: String },

    #[error("Unknown taxonomy: {name}")]
    UnknownTaxonomy { name: String },

    #[error("Duplicate registration: {kind} '{name}'")]
    DuplicateRegistration { kind: String, name: String },

    #[error("Term {term_id} does not belong to taxonomy {taxonomy}")]
    TermTaxonomyMismatch { term_id: Uuid, taxonomy: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all stamp errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StampError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for stamp operations.
pub type StampResult<T> = Result<T, StampError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::RecordNotFound { id: Uuid::nil() };
        let msg = format!("{}", err);
        assert!(msg.contains("Record not found"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_cache_error_display_decode() {
        let err = CacheError::Decode {
            key: "records:abc:def".to_string(),
            reason: "EOF while parsing".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("records:abc:def"));
        assert!(msg.contains("EOF"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "max_page_size".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("max_page_size"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_validation_error_display_duplicate() {
        let err = ValidationError::DuplicateRegistration {
            kind: "record type".to_string(),
            name: "page".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Duplicate registration: record type 'page'"
        );
    }

    #[test]
    fn test_stamp_error_from_variants() {
        let storage = StampError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, StampError::Storage(_)));

        let cache = StampError::from(CacheError::Unavailable {
            reason: "offline".to_string(),
        });
        assert!(matches!(cache, StampError::Cache(_)));

        let validation = StampError::from(ValidationError::RequiredFieldMissing {
            field: "title".to_string(),
        });
        assert!(matches!(validation, StampError::Validation(_)));

        let config = StampError::from(ConfigError::MissingRequired {
            field: "backend".to_string(),
        });
        assert!(matches!(config, StampError::Config(_)));
    }
}
