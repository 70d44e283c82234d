//! Taxonomy terms and term-count accounting.
//!
//! `Term::count` is the number of published records related to the term.
//! Anything that can move it bumps the `terms` group.

use std::collections::BTreeSet;

use serde::Serialize;
use stamp_core::{
    GroupId, RecordEvent, RecordId, StampResult, StorageError, Term, TermId, ValidationError,
};
use tracing::debug;

use super::RecordStore;
use crate::cache::CacheBackend;

#[derive(Serialize)]
struct TaxonomyParams<'a> {
    taxonomy: &'a str,
    record_id: Option<RecordId>,
}

impl<B: CacheBackend + ?Sized> RecordStore<B> {
    /// Create a term in `taxonomy`. Names are unique per taxonomy.
    pub fn create_term(&self, taxonomy: &str, name: &str) -> StampResult<TermId> {
        self.registry.require_taxonomy(taxonomy)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "name".to_string(),
            }
            .into());
        }

        let mut tables = self.write_tables()?;
        if tables
            .terms
            .values()
            .any(|t| t.taxonomy == taxonomy && t.name == name)
        {
            return Err(ValidationError::InvalidValue {
                field: "name".to_string(),
                reason: format!("term '{}' already exists in '{}'", name, taxonomy),
            }
            .into());
        }

        let id = TermId::now_v7();
        tables.terms.insert(
            id,
            Term {
                id,
                taxonomy: taxonomy.to_string(),
                name: name.to_string(),
                count: 0,
            },
        );
        self.invalidate(&[GroupId::terms()], &[]);
        drop(tables);

        debug!(term_id = %id, taxonomy, name, "Created term");
        Ok(id)
    }

    /// Replace the record's terms within `taxonomy` by `term_ids`.
    ///
    /// Terms the record keeps in other taxonomies are untouched. Counts of
    /// every term added or removed are recomputed.
    pub fn set_record_terms(
        &self,
        record_id: RecordId,
        taxonomy: &str,
        term_ids: &[TermId],
    ) -> StampResult<()> {
        let tax = self.registry.require_taxonomy(taxonomy)?;
        let mut tables = self.write_tables()?;
        let record_type = tables.record(record_id)?.record_type().to_string();
        if !tax.object_types.iter().any(|t| *t == record_type) {
            return Err(ValidationError::InvalidValue {
                field: "taxonomy".to_string(),
                reason: format!("'{}' does not apply to '{}'", taxonomy, record_type),
            }
            .into());
        }

        let wanted: BTreeSet<TermId> = term_ids.iter().copied().collect();
        for term_id in &wanted {
            let term = tables.terms.get(term_id).ok_or(StorageError::TermNotFound {
                id: term_id.as_uuid(),
            })?;
            if term.taxonomy != taxonomy {
                return Err(ValidationError::TermTaxonomyMismatch {
                    term_id: term_id.as_uuid(),
                    taxonomy: taxonomy.to_string(),
                }
                .into());
            }
        }

        let current = tables.related_terms(record_id);
        let (in_taxonomy, elsewhere): (BTreeSet<TermId>, BTreeSet<TermId>) = current
            .into_iter()
            .partition(|id| tables.terms.get(id).is_some_and(|t| t.taxonomy == taxonomy));
        if in_taxonomy == wanted {
            return Ok(());
        }

        let affected: BTreeSet<TermId> = in_taxonomy.union(&wanted).copied().collect();
        let next: BTreeSet<TermId> = elsewhere.union(&wanted).copied().collect();
        if next.is_empty() {
            tables.relationships.remove(&record_id);
        } else {
            tables.relationships.insert(record_id, next);
        }
        tables.recount_terms(&affected);
        self.invalidate(&[GroupId::terms()], &[]);
        drop(tables);

        debug!(record_id = %record_id, taxonomy, terms = wanted.len(), "Set record terms");
        self.dispatch(RecordEvent::TermsChanged {
            record_id,
            terms: wanted.into_iter().collect(),
        });
        Ok(())
    }

    /// Terms of `record_id` within `taxonomy`, cached under `terms`.
    pub fn get_record_terms(&self, record_id: RecordId, taxonomy: &str) -> StampResult<Vec<Term>> {
        self.registry.require_taxonomy(taxonomy)?;
        let params = TaxonomyParams {
            taxonomy,
            record_id: Some(record_id),
        };
        let read = self.guard.cached_query(&GroupId::terms(), &params, || {
            let tables = self.read_tables()?;
            let terms = tables
                .related_terms(record_id)
                .iter()
                .filter_map(|id| tables.terms.get(id))
                .filter(|t| t.taxonomy == taxonomy)
                .cloned()
                .collect::<Vec<_>>();
            Ok(sorted_by_name(terms))
        })?;
        Ok(read.into_value())
    }

    /// Every term in `taxonomy` with its count, cached under `terms`.
    pub fn terms_in(&self, taxonomy: &str) -> StampResult<Vec<Term>> {
        self.registry.require_taxonomy(taxonomy)?;
        let params = TaxonomyParams {
            taxonomy,
            record_id: None,
        };
        let read = self.guard.cached_query(&GroupId::terms(), &params, || {
            let tables = self.read_tables()?;
            let terms = tables
                .terms
                .values()
                .filter(|t| t.taxonomy == taxonomy)
                .cloned()
                .collect::<Vec<_>>();
            Ok(sorted_by_name(terms))
        })?;
        Ok(read.into_value())
    }

    pub fn get_term(&self, term_id: TermId) -> StampResult<Option<Term>> {
        let tables = self.read_tables()?;
        Ok(tables.terms.get(&term_id).cloned())
    }
}

fn sorted_by_name(mut terms: Vec<Term>) -> Vec<Term> {
    terms.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    terms
}
