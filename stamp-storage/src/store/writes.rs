//! Record and meta writes.

use std::collections::BTreeMap;

use chrono::Utc;
use stamp_core::{
    GroupId, NewRecord, Record, RecordEvent, RecordFields, RecordId, RecordStatus, RecordUpdate,
    StampResult, ValidationError,
};
use tracing::{debug, info};

use super::tables::{snapshot, Tables};
use super::{record_cache_key, RecordStore};
use crate::cache::CacheBackend;

/// Meta key holding the status a trashed record had before trashing.
pub const TRASH_STATUS_META: &str = "_trash_meta_status";
/// Meta key holding when a record was trashed (RFC 3339).
pub const TRASH_TIME_META: &str = "_trash_meta_time";

impl<B: CacheBackend + ?Sized> RecordStore<B> {
    /// Insert a new record and warm its cache entry.
    pub fn insert_record(&self, new: NewRecord) -> StampResult<RecordId> {
        let def = self.registry.require_record_type(&new.record_type)?;
        for key in new.meta.keys() {
            validate_meta_key(key)?;
        }

        let now = Utc::now();
        let record = Record {
            fields: RecordFields {
                id: RecordId::now_v7(),
                record_type: new.record_type,
                status: new.status,
                title: new.title,
                content: new.content,
                parent: new.parent,
                menu_order: new.menu_order,
                created_at: now,
                modified_at: now,
            },
            meta: new.meta,
        };
        let id = record.id();

        {
            let mut tables = self.write_tables()?;
            if let Some(parent) = record.fields.parent {
                tables.validate_parent(def, None, parent)?;
            }
            tables.records.insert(id, record.clone());
            self.invalidate(&[GroupId::records()], &[]);
            self.guard.set_item(&record_cache_key(id), &record);
        }

        info!(record_id = %id, record_type = %record.fields.record_type, "Inserted record");
        self.dispatch(RecordEvent::Inserted(id));
        Ok(id)
    }

    /// Apply a partial update. An empty update is a no-op.
    ///
    /// When the type supports revisions and the title or content changes,
    /// the previous state is stored as a revision first.
    pub fn update_record(&self, id: RecordId, update: RecordUpdate) -> StampResult<Record> {
        let mut tables = self.write_tables()?;
        let current = tables.record(id)?.clone();
        if update.is_empty() {
            return Ok(current);
        }
        let def = self.registry.require_record_type(current.record_type())?;

        if let Some(Some(parent)) = update.parent {
            tables.validate_parent(def, Some(id), parent)?;
        }

        let mut next = current.clone();
        let f = &mut next.fields;
        if let Some(status) = update.status {
            f.status = status;
        }
        if let Some(title) = update.title {
            f.title = title;
        }
        if let Some(content) = update.content {
            f.content = content;
        }
        if let Some(parent) = update.parent {
            f.parent = parent;
        }
        if let Some(menu_order) = update.menu_order {
            f.menu_order = menu_order;
        }

        if next == current {
            return Ok(current);
        }
        let now = Utc::now();
        next.fields.modified_at = now;

        let content_changed = next.fields.title != current.fields.title
            || next.fields.content != current.fields.content;
        if def.supports_revisions && content_changed {
            tables.push_revision(snapshot(&current, def, now), self.config.revisions_to_keep);
        }

        let status_changed = next.status() != current.status();
        tables.records.insert(id, next.clone());
        let groups = self.recount_if(&mut tables, id, status_changed);
        self.invalidate(&groups, &[id]);
        drop(tables);

        debug!(record_id = %id, "Updated record");
        self.dispatch(RecordEvent::Updated(id));
        Ok(next)
    }

    /// Move a record to the trash, remembering its status.
    ///
    /// Trashing an already trashed record changes nothing.
    pub fn trash_record(&self, id: RecordId) -> StampResult<Record> {
        let mut tables = self.write_tables()?;
        let record = tables.record_mut(id)?;
        if record.status() == RecordStatus::Trash {
            return Ok(record.clone());
        }

        let now = Utc::now();
        let previous = record.status();
        record.meta.insert(
            TRASH_STATUS_META.to_string(),
            vec![previous.as_db_str().to_string()],
        );
        record
            .meta
            .insert(TRASH_TIME_META.to_string(), vec![now.to_rfc3339()]);
        record.fields.status = RecordStatus::Trash;
        record.fields.modified_at = now;
        let trashed = record.clone();

        let groups = self.recount_if(&mut tables, id, true);
        self.invalidate(&groups, &[id]);
        drop(tables);

        info!(record_id = %id, "Trashed record");
        self.dispatch(RecordEvent::Trashed(id));
        Ok(trashed)
    }

    /// Restore a trashed record to the status it had before.
    ///
    /// A missing or unreadable saved status restores to draft.
    pub fn untrash_record(&self, id: RecordId) -> StampResult<Record> {
        let mut tables = self.write_tables()?;
        let record = tables.record_mut(id)?;
        if record.status() != RecordStatus::Trash {
            return Err(ValidationError::InvalidValue {
                field: "status".to_string(),
                reason: format!("record {} is not in the trash", id),
            }
            .into());
        }

        let restored = record
            .meta
            .remove(TRASH_STATUS_META)
            .and_then(|values| values.into_iter().next())
            .and_then(|s| RecordStatus::from_db_str(&s).ok())
            .filter(|s| *s != RecordStatus::Trash)
            .unwrap_or(RecordStatus::Draft);
        record.meta.remove(TRASH_TIME_META);
        record.fields.status = restored;
        record.fields.modified_at = Utc::now();
        let untrashed = record.clone();

        let groups = self.recount_if(&mut tables, id, true);
        self.invalidate(&groups, &[id]);
        drop(tables);

        info!(record_id = %id, status = %restored, "Untrashed record");
        self.dispatch(RecordEvent::Untrashed(id));
        Ok(untrashed)
    }

    /// Remove a record with its revisions and term relationships.
    ///
    /// Children move up to the deleted record's parent.
    pub fn delete_record(&self, id: RecordId) -> StampResult<Record> {
        let mut tables = self.write_tables()?;
        let children = tables.children_of(id);

        let removed = match tables.records.remove(&id) {
            Some(record) => record,
            None => return Err(super::tables::not_found(id)),
        };
        tables.revisions.remove(&id);
        let terms = tables.relationships.remove(&id).unwrap_or_default();
        tables.recount_terms(&terms);

        let now = Utc::now();
        for child in &children {
            if let Some(record) = tables.records.get_mut(child) {
                record.fields.parent = removed.fields.parent;
                record.fields.modified_at = now;
            }
        }

        let mut groups = vec![GroupId::records()];
        if !terms.is_empty() {
            groups.push(GroupId::terms());
        }
        let mut touched = children;
        touched.push(id);
        self.invalidate(&groups, &touched);
        drop(tables);

        info!(record_id = %id, reparented = touched.len() - 1, "Deleted record");
        self.dispatch(RecordEvent::Deleted(id));
        Ok(removed)
    }

    /// Append a meta value under `key`.
    pub fn add_meta(&self, id: RecordId, key: &str, value: impl Into<String>) -> StampResult<()> {
        let value = value.into();
        self.write_meta(id, key, |meta| {
            meta.entry(key.to_string()).or_default().push(value);
            true
        })
        .map(|_| ())
    }

    /// Replace every value under `key` with `value`.
    pub fn update_meta(&self, id: RecordId, key: &str, value: impl Into<String>) -> StampResult<()> {
        let values = vec![value.into()];
        self.write_meta(id, key, |meta| {
            if meta.get(key) == Some(&values) {
                return false;
            }
            meta.insert(key.to_string(), values);
            true
        })
        .map(|_| ())
    }

    /// Remove every value under `key`. Returns whether anything was removed.
    pub fn delete_meta(&self, id: RecordId, key: &str) -> StampResult<bool> {
        self.write_meta(id, key, |meta| meta.remove(key).is_some())
    }

    /// Run a meta mutation; `mutate` reports whether it changed anything.
    ///
    /// Changing a revisioned key stores a revision of the previous state.
    fn write_meta<F>(&self, id: RecordId, key: &str, mutate: F) -> StampResult<bool>
    where
        F: FnOnce(&mut BTreeMap<String, Vec<String>>) -> bool,
    {
        validate_meta_key(key)?;
        let mut tables = self.write_tables()?;
        let before = tables.record(id)?.clone();
        let def = self.registry.require_record_type(before.record_type())?;

        let record = tables.record_mut(id)?;
        if !mutate(&mut record.meta) {
            return Ok(false);
        }
        let now = Utc::now();
        record.fields.modified_at = now;

        if def.supports_revisions && def.revisioned_meta.iter().any(|k| k == key) {
            tables.push_revision(snapshot(&before, def, now), self.config.revisions_to_keep);
        }
        self.invalidate(&[GroupId::records()], &[id]);
        drop(tables);

        debug!(record_id = %id, key, "Changed record meta");
        self.dispatch(RecordEvent::MetaChanged {
            record_id: id,
            key: key.to_string(),
        });
        Ok(true)
    }

    /// Recount the record's terms when its status changed, returning the
    /// groups the write has to bump.
    pub(super) fn recount_if(
        &self,
        tables: &mut Tables,
        id: RecordId,
        status_changed: bool,
    ) -> Vec<GroupId> {
        let terms = tables.related_terms(id);
        if status_changed && !terms.is_empty() {
            tables.recount_terms(&terms);
            vec![GroupId::records(), GroupId::terms()]
        } else {
            vec![GroupId::records()]
        }
    }
}

fn validate_meta_key(key: &str) -> StampResult<()> {
    if key.trim().is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "meta_key".to_string(),
        }
        .into());
    }
    Ok(())
}
