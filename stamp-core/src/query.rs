//! Record query parameters
//!
//! A [`RecordQuery`] is the parameter object of a derived query. It is
//! serialized into the cache key, so every field that changes the result set
//! must be part of it.

use serde::{Deserialize, Deserializer, Serialize};

use crate::{Record, RecordId, RecordStatus};

/// Field to sort query results by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[default]
    Date,
    Title,
    MenuOrder,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Asc,
    #[default]
    Desc,
}

/// Filter, sort, and pagination for a record listing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordQuery {
    pub record_type: Option<String>,
    /// Statuses to include. Empty means every status except trash.
    pub status: Vec<RecordStatus>,
    /// `Some(None)` restricts to top-level records.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub parent: Option<Option<RecordId>>,
    pub meta_key: Option<String>,
    /// Only used together with `meta_key`.
    pub meta_value: Option<String>,
    pub order_by: OrderBy,
    pub order: Order,
    /// Page size; `None` takes the configured default.
    pub number: Option<usize>,
    pub offset: usize,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn record_type(mut self, record_type: impl Into<String>) -> Self {
        self.record_type = Some(record_type.into());
        self
    }

    #[must_use]
    pub fn status(mut self, status: RecordStatus) -> Self {
        self.status.push(status);
        self
    }

    #[must_use]
    pub fn parent(mut self, parent: Option<RecordId>) -> Self {
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub fn meta(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.meta_key = Some(key.into());
        self.meta_value = value;
        self
    }

    #[must_use]
    pub fn order_by(mut self, order_by: OrderBy, order: Order) -> Self {
        self.order_by = order_by;
        self.order = order;
        self
    }

    #[must_use]
    pub fn number(mut self, number: usize) -> Self {
        self.number = Some(number);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Whether `record` passes the filters (ignores sort and pagination).
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(record_type) = &self.record_type {
            if record.record_type() != record_type {
                return false;
            }
        }

        let status_ok = if self.status.is_empty() {
            record.status() != RecordStatus::Trash
        } else {
            self.status.contains(&record.status())
        };
        if !status_ok {
            return false;
        }

        if let Some(parent) = self.parent {
            if record.fields.parent != parent {
                return false;
            }
        }

        if let Some(key) = &self.meta_key {
            let values = record.meta_values(key);
            match &self.meta_value {
                Some(wanted) => {
                    if !values.iter().any(|v| v == wanted) {
                        return false;
                    }
                }
                None => {
                    if values.is_empty() {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Sort `records` in place by this query's order.
    ///
    /// Ties fall back to the record id so results are deterministic.
    pub fn sort(&self, records: &mut [&Record]) {
        records.sort_by(|a, b| {
            let primary = match self.order_by {
                OrderBy::Date => a.fields.created_at.cmp(&b.fields.created_at),
                OrderBy::Title => a.fields.title.cmp(&b.fields.title),
                OrderBy::MenuOrder => a
                    .fields
                    .menu_order
                    .cmp(&b.fields.menu_order)
                    .then_with(|| a.fields.title.cmp(&b.fields.title)),
            }
            .then_with(|| a.id().cmp(&b.id()));
            match self.order {
                Order::Asc => primary,
                Order::Desc => primary.reverse(),
            }
        });
    }
}

/// Keeps "absent" and "explicit null" apart for `Option<Option<T>>` fields,
/// so "any parent" and "top-level only" serialize (and hash) differently.
pub(crate) fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Parameters for listing pages.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageQuery {
    pub number: Option<usize>,
    pub offset: usize,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub parent: Option<Option<RecordId>>,
    pub meta_key: Option<String>,
    pub meta_value: Option<String>,
}

impl PageQuery {
    pub fn number(number: usize) -> Self {
        Self {
            number: Some(number),
            ..Default::default()
        }
    }

    /// Published pages ordered by menu order, then title.
    pub fn into_record_query(self) -> RecordQuery {
        RecordQuery {
            record_type: Some("page".to_string()),
            status: vec![RecordStatus::Publish],
            parent: self.parent,
            meta_key: self.meta_key,
            meta_value: self.meta_value,
            order_by: OrderBy::MenuOrder,
            order: Order::Asc,
            number: self.number,
            offset: self.offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordFields;
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;

    fn record(record_type: &str, title: &str, status: RecordStatus, age_secs: i64) -> Record {
        let at = Utc::now() - Duration::seconds(age_secs);
        Record {
            fields: RecordFields {
                id: RecordId::now_v7(),
                record_type: record_type.to_string(),
                status,
                title: title.to_string(),
                content: String::new(),
                parent: None,
                menu_order: 0,
                created_at: at,
                modified_at: at,
            },
            meta: BTreeMap::new(),
        }
    }

    #[test]
    fn test_default_query_excludes_trash() {
        let query = RecordQuery::new();
        assert!(query.matches(&record("post", "a", RecordStatus::Draft, 0)));
        assert!(!query.matches(&record("post", "a", RecordStatus::Trash, 0)));
    }

    #[test]
    fn test_type_status_and_meta_filters() {
        let mut page = record("page", "a", RecordStatus::Publish, 0);
        page.meta.insert("color".to_string(), vec!["red".to_string()]);

        assert!(RecordQuery::new().record_type("page").matches(&page));
        assert!(!RecordQuery::new().record_type("post").matches(&page));
        assert!(!RecordQuery::new().status(RecordStatus::Draft).matches(&page));
        assert!(RecordQuery::new().meta("color", None).matches(&page));
        assert!(RecordQuery::new()
            .meta("color", Some("red".to_string()))
            .matches(&page));
        assert!(!RecordQuery::new()
            .meta("color", Some("blue".to_string()))
            .matches(&page));
        assert!(!RecordQuery::new().meta("size", None).matches(&page));
    }

    #[test]
    fn test_sort_by_date_desc() {
        let old = record("post", "old", RecordStatus::Publish, 60);
        let new = record("post", "new", RecordStatus::Publish, 0);
        let mut refs = vec![&old, &new];
        RecordQuery::new().sort(&mut refs);
        assert_eq!(refs[0].fields.title, "new");
    }

    #[test]
    fn test_sort_by_title_asc() {
        let b = record("post", "b", RecordStatus::Publish, 0);
        let a = record("post", "a", RecordStatus::Publish, 0);
        let mut refs = vec![&b, &a];
        RecordQuery::new()
            .order_by(OrderBy::Title, Order::Asc)
            .sort(&mut refs);
        assert_eq!(refs[0].fields.title, "a");
    }

    #[test]
    fn test_page_query_conversion() {
        let query = PageQuery::number(2).into_record_query();
        assert_eq!(query.record_type.as_deref(), Some("page"));
        assert_eq!(query.status, vec![RecordStatus::Publish]);
        assert_eq!(query.order_by, OrderBy::MenuOrder);
        assert_eq!(query.number, Some(2));
    }

    #[test]
    fn test_any_parent_and_top_level_serialize_differently() {
        let any = serde_json::to_value(RecordQuery::new()).unwrap();
        let top = serde_json::to_value(RecordQuery::new().parent(None)).unwrap();
        assert_ne!(any, top);

        let back: RecordQuery = serde_json::from_value(top).unwrap();
        assert_eq!(back.parent, Some(None));
        let back: RecordQuery = serde_json::from_value(any).unwrap();
        assert_eq!(back.parent, None);
    }
}
