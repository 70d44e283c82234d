//! Backing tables of the record store and the pure helpers over them.

use std::collections::{BTreeMap, BTreeSet};

use stamp_core::{
    Record, RecordId, RecordQuery, RecordStatus, RecordTypeDef, Revision, RevisionId, StampError,
    StampResult, StorageError, Term, TermId, Timestamp, ValidationError,
};

/// Rows of every table, guarded together by the store's lock.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub records: BTreeMap<RecordId, Record>,
    pub terms: BTreeMap<TermId, Term>,
    /// Term relationships per record.
    pub relationships: BTreeMap<RecordId, BTreeSet<TermId>>,
    /// Revisions per record, oldest first.
    pub revisions: BTreeMap<RecordId, Vec<Revision>>,
}

impl Tables {
    pub fn record(&self, id: RecordId) -> StampResult<&Record> {
        self.records.get(&id).ok_or_else(|| not_found(id))
    }

    pub fn record_mut(&mut self, id: RecordId) -> StampResult<&mut Record> {
        self.records.get_mut(&id).ok_or_else(|| not_found(id))
    }

    /// Ids matching `query`, sorted and paginated. `query.number` must be set.
    pub fn select_ids(&self, query: &RecordQuery) -> Vec<RecordId> {
        let mut matched: Vec<&Record> = self
            .records
            .values()
            .filter(|r| query.matches(r))
            .collect();
        query.sort(&mut matched);
        matched
            .into_iter()
            .skip(query.offset)
            .take(query.number.unwrap_or(usize::MAX))
            .map(Record::id)
            .collect()
    }

    /// Check that `parent` may become the parent of `child`.
    ///
    /// The parent must exist, be of the same hierarchical type, and must not
    /// be `child` or one of its descendants.
    pub fn validate_parent(
        &self,
        def: &RecordTypeDef,
        child: Option<RecordId>,
        parent: RecordId,
    ) -> StampResult<()> {
        if !def.hierarchical {
            return Err(invalid_parent(format!(
                "record type '{}' is not hierarchical",
                def.name
            )));
        }
        let parent_record = self.record(parent)?;
        if parent_record.record_type() != def.name {
            return Err(invalid_parent(format!(
                "parent {} is a '{}', expected '{}'",
                parent,
                parent_record.record_type(),
                def.name
            )));
        }

        let Some(child) = child else {
            return Ok(());
        };
        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if id == child {
                return Err(invalid_parent(format!(
                    "{} cannot be nested under its own descendant",
                    child
                )));
            }
            cursor = self.records.get(&id).and_then(|r| r.fields.parent);
        }
        Ok(())
    }

    /// Direct children of `id`.
    pub fn children_of(&self, id: RecordId) -> Vec<RecordId> {
        self.records
            .values()
            .filter(|r| r.fields.parent == Some(id))
            .map(Record::id)
            .collect()
    }

    pub fn related_terms(&self, id: RecordId) -> BTreeSet<TermId> {
        self.relationships.get(&id).cloned().unwrap_or_default()
    }

    /// Recompute `Term::count` for `term_ids`: the number of published
    /// records related to each term.
    pub fn recount_terms(&mut self, term_ids: &BTreeSet<TermId>) {
        for term_id in term_ids {
            let count = self
                .relationships
                .iter()
                .filter(|(record_id, terms)| {
                    terms.contains(term_id)
                        && self
                            .records
                            .get(record_id)
                            .is_some_and(|r| r.status() == RecordStatus::Publish)
                })
                .count();
            if let Some(term) = self.terms.get_mut(term_id) {
                term.count = count;
            }
        }
    }

    /// Append a revision, dropping the oldest ones beyond `keep`.
    pub fn push_revision(&mut self, revision: Revision, keep: Option<usize>) {
        if keep == Some(0) {
            return;
        }
        let revisions = self.revisions.entry(revision.record_id).or_default();
        revisions.push(revision);
        if let Some(keep) = keep {
            let excess = revisions.len().saturating_sub(keep);
            if excess > 0 {
                *revisions = revisions.split_off(excess);
            }
        }
    }

    pub fn find_revision(&self, revision_id: RevisionId) -> StampResult<&Revision> {
        self.revisions
            .values()
            .flatten()
            .find(|r| r.id == revision_id)
            .ok_or_else(|| {
                StorageError::RevisionNotFound {
                    id: revision_id.as_uuid(),
                }
                .into()
            })
    }
}

/// Snapshot of the revisioned parts of `record`.
pub(crate) fn snapshot(record: &Record, def: &RecordTypeDef, at: Timestamp) -> Revision {
    let meta = def
        .revisioned_meta
        .iter()
        .filter_map(|key| record.meta.get(key).map(|v| (key.clone(), v.clone())))
        .collect();
    Revision {
        id: RevisionId::now_v7(),
        record_id: record.id(),
        title: record.fields.title.clone(),
        content: record.fields.content.clone(),
        meta,
        created_at: at,
    }
}

pub(crate) fn not_found(id: RecordId) -> StampError {
    StorageError::RecordNotFound { id: id.as_uuid() }.into()
}

fn invalid_parent(reason: String) -> StampError {
    ValidationError::InvalidValue {
        field: "parent".to_string(),
        reason,
    }
    .into()
}
