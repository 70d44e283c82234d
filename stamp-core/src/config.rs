//! Configuration types

use crate::{ConfigError, StampError, StampResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which cache backend to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Process-local hash map, optionally bounded (FIFO eviction).
    Memory { max_entries: Option<usize> },
    /// Memory-mapped LMDB environment at `path`.
    Lmdb { path: PathBuf, max_size_mb: usize },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Memory { max_entries: None }
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StampConfig {
    pub backend: BackendConfig,
    /// `number` used by record queries that do not set one.
    pub default_page_size: usize,
    /// Largest `number` a record query may request; larger values are clamped.
    pub max_page_size: usize,
    /// Revisions kept per record. `None` keeps all of them.
    pub revisions_to_keep: Option<usize>,
}

impl Default for StampConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            default_page_size: 10,
            max_page_size: 1000,
            revisions_to_keep: None,
        }
    }
}

impl StampConfig {
    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(input: &str) -> StampResult<Self> {
        let config: Self = toml::from_str(input).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `STAMP_BACKEND`: `memory` or `lmdb` (default: memory)
    /// - `STAMP_MEMORY_MAX_ENTRIES`: bound for the memory backend (default: unbounded)
    /// - `STAMP_LMDB_PATH`: LMDB directory (required when backend is lmdb)
    /// - `STAMP_LMDB_MAX_SIZE_MB`: LMDB map size (default: 256)
    /// - `STAMP_DEFAULT_PAGE_SIZE`: default query page size (default: 10)
    /// - `STAMP_MAX_PAGE_SIZE`: page size ceiling (default: 1000)
    /// - `STAMP_REVISIONS_TO_KEEP`: revision cap per record (default: unlimited)
    pub fn from_env() -> StampResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`StampConfig::from_env`] but reading from an arbitrary source.
    pub fn from_lookup<F>(lookup: F) -> StampResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let backend = match lookup("STAMP_BACKEND")
            .unwrap_or_else(|| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => BackendConfig::Memory {
                max_entries: lookup("STAMP_MEMORY_MAX_ENTRIES").and_then(|s| s.parse().ok()),
            },
            "lmdb" => BackendConfig::Lmdb {
                path: lookup("STAMP_LMDB_PATH")
                    .map(PathBuf::from)
                    .ok_or_else(|| ConfigError::MissingRequired {
                        field: "STAMP_LMDB_PATH".to_string(),
                    })?,
                max_size_mb: lookup("STAMP_LMDB_MAX_SIZE_MB")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(256),
            },
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "STAMP_BACKEND".to_string(),
                    value: other.to_string(),
                    reason: "expected 'memory' or 'lmdb'".to_string(),
                }
                .into())
            }
        };

        let config = Self {
            backend,
            default_page_size: lookup("STAMP_DEFAULT_PAGE_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_page_size),
            max_page_size: lookup("STAMP_MAX_PAGE_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_page_size),
            revisions_to_keep: lookup("STAMP_REVISIONS_TO_KEEP")
                .and_then(|s| s.parse().ok())
                .or(defaults.revisions_to_keep),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(StampError::Config) if invalid.
    pub fn validate(&self) -> StampResult<()> {
        if self.default_page_size == 0 {
            return Err(invalid(
                "default_page_size",
                self.default_page_size,
                "default_page_size must be greater than 0",
            ));
        }

        if self.max_page_size == 0 {
            return Err(invalid(
                "max_page_size",
                self.max_page_size,
                "max_page_size must be greater than 0",
            ));
        }

        if self.default_page_size > self.max_page_size {
            return Err(invalid(
                "default_page_size",
                self.default_page_size,
                "default_page_size must not exceed max_page_size",
            ));
        }

        match &self.backend {
            BackendConfig::Memory {
                max_entries: Some(0),
            } => {
                return Err(invalid(
                    "backend.max_entries",
                    0,
                    "max_entries must be greater than 0 when set",
                ));
            }
            BackendConfig::Lmdb { path, max_size_mb } => {
                if path.as_os_str().is_empty() {
                    return Err(invalid("backend.path", "\"\"", "path must not be empty"));
                }
                if *max_size_mb == 0 {
                    return Err(invalid(
                        "backend.max_size_mb",
                        max_size_mb,
                        "max_size_mb must be greater than 0",
                    ));
                }
                if max_size_mb.checked_mul(1024 * 1024).is_none() {
                    return Err(invalid(
                        "backend.max_size_mb",
                        max_size_mb,
                        "max_size_mb overflows the map size in bytes",
                    ));
                }
            }
            BackendConfig::Memory { .. } => {}
        }

        Ok(())
    }

    /// Clamp a requested page size into `1..=max_page_size`, defaulting when unset.
    ///
    /// An unvalidated `max_page_size` of 0 is treated as 1.
    pub fn effective_page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> StampError {
    StampError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

// =============================================================================
// TESTS
// =============================================================================
