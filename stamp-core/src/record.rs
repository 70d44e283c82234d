//! Record, term, and revision types
//!
//! A record has a fixed set of typed fields plus free-form string meta.
//! [`Record::get`] resolves a name against the fields first and falls back
//! to meta, so callers never need to know which side a key lives on.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{RecordId, RevisionId, TermId, Timestamp};

// ============================================================================
// STATUS
// ============================================================================

/// Publication status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Publish,
    Draft,
    Pending,
    Private,
    Trash,
}

impl RecordStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            RecordStatus::Publish => "publish",
            RecordStatus::Draft => "draft",
            RecordStatus::Pending => "pending",
            RecordStatus::Private => "private",
            RecordStatus::Trash => "trash",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, RecordStatusParseError> {
        match s.to_lowercase().as_str() {
            "publish" => Ok(RecordStatus::Publish),
            "draft" => Ok(RecordStatus::Draft),
            "pending" => Ok(RecordStatus::Pending),
            "private" => Ok(RecordStatus::Private),
            "trash" => Ok(RecordStatus::Trash),
            _ => Err(RecordStatusParseError(s.to_string())),
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for RecordStatus {
    type Err = RecordStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid record status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordStatusParseError(pub String);

impl fmt::Display for RecordStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid record status: {}", self.0)
    }
}

impl std::error::Error for RecordStatusParseError {}

// ============================================================================
// RECORD
// ============================================================================

/// Fixed-schema fields every record carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFields {
    pub id: RecordId,
    pub record_type: String,
    pub status: RecordStatus,
    pub title: String,
    pub content: String,
    pub parent: Option<RecordId>,
    pub menu_order: i32,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
}

/// Value returned by [`Record::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Id(RecordId),
    Text(&'a str),
    Status(RecordStatus),
    Parent(Option<RecordId>),
    Int(i32),
    Time(Timestamp),
    Meta(&'a str),
}

impl FieldValue<'_> {
    /// Render as a string, the way meta values are stored.
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Id(id) => id.to_string(),
            FieldValue::Text(s) | FieldValue::Meta(s) => (*s).to_string(),
            FieldValue::Status(status) => status.to_string(),
            FieldValue::Parent(parent) => parent.map(|p| p.to_string()).unwrap_or_default(),
            FieldValue::Int(n) => n.to_string(),
            FieldValue::Time(t) => t.to_rfc3339(),
        }
    }
}

/// A stored record: fixed fields plus multi-valued string meta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub fields: RecordFields,
    pub meta: BTreeMap<String, Vec<String>>,
}

impl Record {
    pub fn id(&self) -> RecordId {
        self.fields.id
    }

    pub fn record_type(&self) -> &str {
        &self.fields.record_type
    }

    pub fn status(&self) -> RecordStatus {
        self.fields.status
    }

    /// Look a key up among the fixed fields, then among meta.
    ///
    /// Meta lookups return the first stored value.
    pub fn get(&self, key: &str) -> Option<FieldValue<'_>> {
        let f = &self.fields;
        let field = match key {
            "id" => Some(FieldValue::Id(f.id)),
            "record_type" => Some(FieldValue::Text(&f.record_type)),
            "status" => Some(FieldValue::Status(f.status)),
            "title" => Some(FieldValue::Text(&f.title)),
            "content" => Some(FieldValue::Text(&f.content)),
            "parent" => Some(FieldValue::Parent(f.parent)),
            "menu_order" => Some(FieldValue::Int(f.menu_order)),
            "created_at" => Some(FieldValue::Time(f.created_at)),
            "modified_at" => Some(FieldValue::Time(f.modified_at)),
            _ => None,
        };
        field.or_else(|| {
            self.meta
                .get(key)
                .and_then(|values| values.first())
                .map(|v| FieldValue::Meta(v.as_str()))
        })
    }

    /// All meta values stored under `key`, in insertion order.
    pub fn meta_values(&self, key: &str) -> &[String] {
        self.meta.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Input for inserting a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    pub record_type: String,
    pub status: RecordStatus,
    pub title: String,
    pub content: String,
    pub parent: Option<RecordId>,
    pub menu_order: i32,
    pub meta: BTreeMap<String, Vec<String>>,
}

impl NewRecord {
    /// A published record of the given type with empty content.
    pub fn new(record_type: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            status: RecordStatus::Publish,
            title: title.into(),
            content: String::new(),
            parent: None,
            menu_order: 0,
            meta: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: RecordStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: RecordId) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub fn with_menu_order(mut self, menu_order: i32) -> Self {
        self.menu_order = menu_order;
        self
    }

    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.entry(key.into()).or_default().push(value.into());
        self
    }
}

/// Partial update for an existing record. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub status: Option<RecordStatus>,
    pub title: Option<String>,
    pub content: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "crate::query::double_option"
    )]
    pub parent: Option<Option<RecordId>>,
    pub menu_order: Option<i32>,
}

impl RecordUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.title.is_none()
            && self.content.is_none()
            && self.parent.is_none()
            && self.menu_order.is_none()
    }
}

// ============================================================================
// TERMS AND REVISIONS
// ============================================================================

/// A term inside a taxonomy, with the number of published records using it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub id: TermId,
    pub taxonomy: String,
    pub name: String,
    pub count: usize,
}

/// Snapshot of a record's content taken before an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: RevisionId,
    pub record_id: RecordId,
    pub title: String,
    pub content: String,
    /// Values of the record type's revisioned meta keys at snapshot time.
    pub meta: BTreeMap<String, Vec<String>>,
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_record() -> Record {
        let now = Utc::now();
        Record {
            fields: RecordFields {
                id: RecordId::now_v7(),
                record_type: "page".to_string(),
                status: RecordStatus::Publish,
                title: "About".to_string(),
                content: "Hello".to_string(),
                parent: None,
                menu_order: 3,
                created_at: now,
                modified_at: now,
            },
            meta: BTreeMap::from([
                ("color".to_string(), vec!["red".to_string(), "blue".to_string()]),
                ("title".to_string(), vec!["shadowed".to_string()]),
            ]),
        }
    }

    #[test]
    fn test_get_prefers_fixed_fields() {
        let record = make_record();
        assert_eq!(record.get("title"), Some(FieldValue::Text("About")));
        assert_eq!(record.get("menu_order"), Some(FieldValue::Int(3)));
    }

    #[test]
    fn test_get_falls_back_to_first_meta_value() {
        let record = make_record();
        assert_eq!(record.get("color"), Some(FieldValue::Meta("red")));
        assert_eq!(record.meta_values("color"), ["red", "blue"]);
        assert_eq!(record.get("missing"), None);
        assert!(record.meta_values("missing").is_empty());
    }

    #[test]
    fn test_field_value_to_text() {
        let record = make_record();
        assert_eq!(record.get("status").unwrap().to_text(), "publish");
        assert_eq!(record.get("parent").unwrap().to_text(), "");
        assert_eq!(record.get("menu_order").unwrap().to_text(), "3");
    }

    #[test]
    fn test_status_round_trips_through_db_str() {
        for status in [
            RecordStatus::Publish,
            RecordStatus::Draft,
            RecordStatus::Pending,
            RecordStatus::Private,
            RecordStatus::Trash,
        ] {
            assert_eq!(status.as_db_str().parse::<RecordStatus>(), Ok(status));
        }
        assert!("archived".parse::<RecordStatus>().is_err());
    }

    #[test]
    fn test_new_record_builder() {
        let new = NewRecord::new("page", "Child")
            .with_status(RecordStatus::Draft)
            .with_menu_order(2)
            .with_meta("k", "v1")
            .with_meta("k", "v2");
        assert_eq!(new.status, RecordStatus::Draft);
        assert_eq!(new.menu_order, 2);
        assert_eq!(new.meta["k"], vec!["v1", "v2"]);
    }

    #[test]
    fn test_record_update_is_empty() {
        assert!(RecordUpdate::default().is_empty());
        let update = RecordUpdate {
            title: Some("x".to_string()),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
