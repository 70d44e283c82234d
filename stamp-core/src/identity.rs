//! Identity types for stamp records and cache groups

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{StampResult, ValidationError};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Wrap an existing UUID.
            pub const fn new(id: Uuid) -> Self {
                Self(id)
            }

            /// Generate a new timestamp-sortable (UUIDv7) identifier.
            pub fn now_v7() -> Self {
                Self(Uuid::now_v7())
            }

            /// Access the underlying UUID.
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

define_id!(
    /// Identifier of a stored record. UUIDv7 keeps ids sortable by creation time.
    RecordId
);

define_id!(
    /// Identifier of a taxonomy term.
    TermId
);

define_id!(
    /// Identifier of a stored revision snapshot.
    RevisionId
);

/// Separator between the components of a composed cache key.
pub const KEY_SEPARATOR: char = ':';

/// Name of a cache group: the scope a single change token invalidates.
///
/// Group names are used verbatim as the first component of composed cache
/// keys, so they may not be empty and may not contain the key separator or
/// whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupId(String);

impl GroupId {
    /// Group covering every stored record.
    pub const RECORDS: &'static str = "records";
    /// Group covering taxonomy terms and their counts.
    pub const TERMS: &'static str = "terms";
    /// Prefix of the keys change tokens are stored under; not a usable group.
    pub const RESERVED_TOKEN_PREFIX: &'static str = "last_changed";

    /// Validate and wrap a group name.
    pub fn new(name: impl Into<String>) -> StampResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "group_id".to_string(),
            }
            .into());
        }
        if name.contains(KEY_SEPARATOR) || name.chars().any(char::is_whitespace) {
            return Err(ValidationError::InvalidValue {
                field: "group_id".to_string(),
                reason: format!(
                    "'{}' must not contain '{}' or whitespace",
                    name, KEY_SEPARATOR
                ),
            }
            .into());
        }
        if name == Self::RESERVED_TOKEN_PREFIX {
            return Err(ValidationError::InvalidValue {
                field: "group_id".to_string(),
                reason: format!("'{}' is reserved", name),
            }
            .into());
        }
        Ok(Self(name))
    }

    /// The `records` group.
    pub fn records() -> Self {
        Self(Self::RECORDS.to_string())
    }

    /// The `terms` group.
    pub fn terms() -> Self {
        Self(Self::TERMS.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for GroupId {
    type Error = crate::StampError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<GroupId> for String {
    fn from(group: GroupId) -> Self {
        group.0
    }
}

impl AsRef<str> for GroupId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StampError;

    #[test]
    fn test_record_ids_are_time_sortable() {
        let a = RecordId::now_v7();
        let b = RecordId::now_v7();
        assert!(a < b);
    }

    #[test]
    fn test_group_id_accepts_plain_names() {
        let group = GroupId::new("pages").unwrap();
        assert_eq!(group.as_str(), "pages");
        assert_eq!(group.to_string(), "pages");
    }

    #[test]
    fn test_group_id_rejects_empty() {
        assert!(matches!(
            GroupId::new(""),
            Err(StampError::Validation(ValidationError::RequiredFieldMissing { .. }))
        ));
    }

    #[test]
    fn test_group_id_rejects_separator_and_whitespace() {
        assert!(GroupId::new("posts:1").is_err());
        assert!(GroupId::new("my posts").is_err());
    }

    #[test]
    fn test_group_id_rejects_reserved_prefix() {
        assert!(GroupId::new("last_changed").is_err());
    }

    #[test]
    fn test_group_id_serde_validates() {
        let ok: GroupId = serde_json::from_str("\"terms\"").unwrap();
        assert_eq!(ok, GroupId::terms());
        assert!(serde_json::from_str::<GroupId>("\"a:b\"").is_err());
    }
}
