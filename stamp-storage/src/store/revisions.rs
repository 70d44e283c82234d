//! Revision history.

use chrono::Utc;
use stamp_core::{GroupId, Record, RecordEvent, RecordId, Revision, RevisionId, StampResult};
use tracing::info;

use super::tables::snapshot;
use super::RecordStore;
use crate::cache::CacheBackend;

impl<B: CacheBackend + ?Sized> RecordStore<B> {
    /// Stored revisions of `record_id`, newest first.
    pub fn revisions(&self, record_id: RecordId) -> StampResult<Vec<Revision>> {
        let tables = self.read_tables()?;
        tables.record(record_id)?;
        Ok(tables
            .revisions
            .get(&record_id)
            .map(|revs| revs.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    /// Put a revision's title, content, and revisioned meta back on its
    /// record. The state being replaced is itself stored as a revision.
    pub fn restore_revision(&self, revision_id: RevisionId) -> StampResult<Record> {
        let mut tables = self.write_tables()?;
        let revision = tables.find_revision(revision_id)?.clone();
        let record_id = revision.record_id;
        let current = tables.record(record_id)?.clone();
        let def = self.registry.require_record_type(current.record_type())?;

        let mut next = current.clone();
        next.fields.title = revision.title;
        next.fields.content = revision.content;
        for key in &def.revisioned_meta {
            match revision.meta.get(key) {
                Some(values) => {
                    next.meta.insert(key.clone(), values.clone());
                }
                None => {
                    next.meta.remove(key);
                }
            }
        }
        if next == current {
            return Ok(current);
        }

        let now = Utc::now();
        next.fields.modified_at = now;
        tables.push_revision(snapshot(&current, def, now), self.config.revisions_to_keep);
        tables.records.insert(record_id, next.clone());
        self.invalidate(&[GroupId::records()], &[record_id]);
        drop(tables);

        info!(record_id = %record_id, revision_id = %revision_id, "Restored revision");
        self.dispatch(RecordEvent::Updated(record_id));
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::store;
    use super::*;
    use crate::cache::{ChangeTokenGuard, MemoryCacheBackend};
    use stamp_core::{
        Hooks, NewRecord, RecordTypeDef, RecordUpdate, RegistryBuilder, StampConfig,
    };
    use std::sync::Arc;

    fn retitle(store: &RecordStore<MemoryCacheBackend>, id: RecordId, title: &str) {
        store
            .update_record(
                id,
                RecordUpdate {
                    title: Some(title.to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn test_revisions_newest_first() {
        let store = store();
        let id = store.insert_record(NewRecord::new("post", "v1")).unwrap();
        retitle(&store, id, "v2");
        retitle(&store, id, "v3");

        let titles: Vec<_> = store
            .revisions(id)
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, vec!["v2", "v1"]);
    }

    #[test]
    fn test_status_only_update_stores_no_revision() {
        let store = store();
        let id = store.insert_record(NewRecord::new("post", "v1")).unwrap();
        store
            .update_record(
                id,
                RecordUpdate {
                    status: Some(stamp_core::RecordStatus::Draft),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(store.revisions(id).unwrap().is_empty());
    }

    #[test]
    fn test_restore_revision() {
        let store = store();
        let id = store.insert_record(NewRecord::new("post", "v1")).unwrap();
        retitle(&store, id, "v2");
        let v1 = store.revisions(id).unwrap()[0].id;

        let restored = store.restore_revision(v1).unwrap();
        assert_eq!(restored.fields.title, "v1");
        assert_eq!(store.get_record(id).unwrap().unwrap().fields.title, "v1");
        assert_eq!(store.revisions(id).unwrap()[0].title, "v2");
    }

    #[test]
    fn test_revisioned_meta_is_snapshotted_and_restored() {
        let mut builder = RegistryBuilder::new();
        builder
            .register_record_type(
                RecordTypeDef::new("doc")
                    .with_revisions()
                    .with_revisioned_meta("summary"),
            )
            .unwrap();
        let store = RecordStore::new(
            Arc::new(builder.build()),
            Hooks::new(),
            ChangeTokenGuard::new(Arc::new(MemoryCacheBackend::new())),
            StampConfig::default(),
        );

        let id = store
            .insert_record(NewRecord::new("doc", "d").with_meta("summary", "first"))
            .unwrap();
        store.update_meta(id, "summary", "second").unwrap();
        store.update_meta(id, "other", "ignored").unwrap();

        let revisions = store.revisions(id).unwrap();
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].meta["summary"], vec!["first".to_string()]);

        store.restore_revision(revisions[0].id).unwrap();
        let record = store.get_record(id).unwrap().unwrap();
        assert_eq!(record.meta_values("summary"), ["first"]);
        assert_eq!(record.meta_values("other"), ["ignored"]);
    }

    #[test]
    fn test_revisions_to_keep_caps_history() {
        let store = RecordStore::new(
            Arc::new(stamp_core::Registry::with_defaults()),
            Hooks::new(),
            ChangeTokenGuard::new(Arc::new(MemoryCacheBackend::new())),
            StampConfig {
                revisions_to_keep: Some(2),
                ..Default::default()
            },
        );
        let id = store.insert_record(NewRecord::new("post", "v0")).unwrap();
        for i in 1..=5 {
            retitle(&store, id, &format!("v{}", i));
        }
        let titles: Vec<_> = store
            .revisions(id)
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, vec!["v4", "v3"]);
    }

    #[test]
    fn test_delete_drops_revisions() {
        let store = store();
        let id = store.insert_record(NewRecord::new("post", "v1")).unwrap();
        retitle(&store, id, "v2");
        let rev = store.revisions(id).unwrap()[0].id;
        store.delete_record(id).unwrap();
        assert!(store.restore_revision(rev).is_err());
    }
}
