//! Record type and taxonomy registry.
//!
//! Registration happens once, through [`RegistryBuilder`]. Building the
//! registry ends the registration phase: a [`Registry`] is immutable and is
//! shared by `Arc` with whatever needs to resolve a type name.
//!
//! ```text
//! RegistryBuilder ── register_*() ↺ ── build() ──→ Registry (read-only)
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{StampResult, ValidationError};

/// Schema of a record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTypeDef {
    pub name: String,
    /// Whether records of this type may have a parent.
    pub hierarchical: bool,
    /// Whether updates snapshot the previous content as a revision.
    pub supports_revisions: bool,
    /// Meta keys copied into revisions alongside title and content.
    pub revisioned_meta: Vec<String>,
}

impl RecordTypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hierarchical: false,
            supports_revisions: false,
            revisioned_meta: Vec::new(),
        }
    }

    #[must_use]
    pub fn hierarchical(mut self) -> Self {
        self.hierarchical = true;
        self
    }

    #[must_use]
    pub fn with_revisions(mut self) -> Self {
        self.supports_revisions = true;
        self
    }

    #[must_use]
    pub fn with_revisioned_meta(mut self, key: impl Into<String>) -> Self {
        self.revisioned_meta.push(key.into());
        self
    }
}

/// Schema of a taxonomy and the record types it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyDef {
    pub name: String,
    pub object_types: Vec<String>,
}

impl TaxonomyDef {
    pub fn new<I, S>(name: impl Into<String>, object_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            object_types: object_types.into_iter().map(Into::into).collect(),
        }
    }
}

/// Accumulates definitions during the registration phase.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    record_types: BTreeMap<String, RecordTypeDef>,
    taxonomies: BTreeMap<String, TaxonomyDef>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_record_type(&mut self, def: RecordTypeDef) -> StampResult<&mut Self> {
        if def.name.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "record_type.name".to_string(),
            }
            .into());
        }
        if self.record_types.contains_key(&def.name) {
            return Err(ValidationError::DuplicateRegistration {
                kind: "record type".to_string(),
                name: def.name,
            }
            .into());
        }
        self.record_types.insert(def.name.clone(), def);
        Ok(self)
    }

    /// Register a taxonomy. Every object type must already be registered.
    pub fn register_taxonomy(&mut self, def: TaxonomyDef) -> StampResult<&mut Self> {
        if def.name.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "taxonomy.name".to_string(),
            }
            .into());
        }
        if self.taxonomies.contains_key(&def.name) {
            return Err(ValidationError::DuplicateRegistration {
                kind: "taxonomy".to_string(),
                name: def.name,
            }
            .into());
        }
        if let Some(unknown) = def
            .object_types
            .iter()
            .find(|t| !self.record_types.contains_key(*t))
        {
            return Err(ValidationError::UnknownRecordType {
                name: unknown.clone(),
            }
            .into());
        }
        self.taxonomies.insert(def.name.clone(), def);
        Ok(self)
    }

    /// End the registration phase.
    pub fn build(self) -> Registry {
        Registry {
            record_types: self.record_types,
            taxonomies: self.taxonomies,
        }
    }
}

/// Read-only view of registered record types and taxonomies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    record_types: BTreeMap<String, RecordTypeDef>,
    taxonomies: BTreeMap<String, TaxonomyDef>,
}

impl Registry {
    /// Registry with the stock types: `post`, hierarchical `page`, and the
    /// `category` and `post_tag` taxonomies over `post`.
    pub fn with_defaults() -> Self {
        let mut builder = RegistryBuilder::new();
        builder.record_types.insert(
            "post".to_string(),
            RecordTypeDef::new("post").with_revisions(),
        );
        builder.record_types.insert(
            "page".to_string(),
            RecordTypeDef::new("page").hierarchical().with_revisions(),
        );
        builder.taxonomies.insert(
            "category".to_string(),
            TaxonomyDef::new("category", ["post"]),
        );
        builder.taxonomies.insert(
            "post_tag".to_string(),
            TaxonomyDef::new("post_tag", ["post"]),
        );
        builder.build()
    }

    pub fn record_type(&self, name: &str) -> Option<&RecordTypeDef> {
        self.record_types.get(name)
    }

    /// Like [`Registry::record_type`] but failing with a validation error.
    pub fn require_record_type(&self, name: &str) -> StampResult<&RecordTypeDef> {
        self.record_type(name).ok_or_else(|| {
            ValidationError::UnknownRecordType {
                name: name.to_string(),
            }
            .into()
        })
    }

    pub fn taxonomy(&self, name: &str) -> Option<&TaxonomyDef> {
        self.taxonomies.get(name)
    }

    pub fn require_taxonomy(&self, name: &str) -> StampResult<&TaxonomyDef> {
        self.taxonomy(name).ok_or_else(|| {
            ValidationError::UnknownTaxonomy {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Taxonomies that apply to `record_type`, in name order.
    pub fn taxonomies_for<'a>(&'a self, record_type: &'a str) -> impl Iterator<Item = &'a TaxonomyDef> {
        self.taxonomies
            .values()
            .filter(move |t| t.object_types.iter().any(|o| o == record_type))
    }

    pub fn record_type_names(&self) -> impl Iterator<Item = &str> {
        self.record_types.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StampError;

    #[test]
    fn test_defaults() {
        let registry = Registry::with_defaults();
        assert!(registry.record_type("page").unwrap().hierarchical);
        assert!(!registry.record_type("post").unwrap().hierarchical);
        let names: Vec<_> = registry.taxonomies_for("post").map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["category", "post_tag"]);
        assert_eq!(registry.taxonomies_for("page").count(), 0);
    }

    #[test]
    fn test_duplicate_record_type_rejected() {
        let mut builder = RegistryBuilder::new();
        builder.register_record_type(RecordTypeDef::new("book")).unwrap();
        let err = builder
            .register_record_type(RecordTypeDef::new("book"))
            .unwrap_err();
        assert!(matches!(
            err,
            StampError::Validation(ValidationError::DuplicateRegistration { .. })
        ));
    }

    #[test]
    fn test_taxonomy_requires_known_types() {
        let mut builder = RegistryBuilder::new();
        builder.register_record_type(RecordTypeDef::new("book")).unwrap();
        assert!(builder
            .register_taxonomy(TaxonomyDef::new("genre", ["book", "film"]))
            .is_err());
        assert!(builder
            .register_taxonomy(TaxonomyDef::new("genre", ["book"]))
            .is_ok());
        let registry = builder.build();
        assert_eq!(registry.require_taxonomy("genre").unwrap().object_types, ["book"]);
        assert!(registry.require_taxonomy("mood").is_err());
    }

    #[test]
    fn test_require_record_type() {
        let registry = Registry::with_defaults();
        assert!(registry.require_record_type("post").is_ok());
        assert!(matches!(
            registry.require_record_type("movie"),
            Err(StampError::Validation(ValidationError::UnknownRecordType { .. }))
        ));
    }

    #[test]
    fn test_chained_registration() {
        let mut builder = RegistryBuilder::new();
        builder
            .register_record_type(
                RecordTypeDef::new("book")
                    .with_revisions()
                    .with_revisioned_meta("isbn"),
            )
            .unwrap()
            .register_record_type(RecordTypeDef::new("author"))
            .unwrap();
        let registry = builder.build();
        assert_eq!(
            registry.record_type_names().collect::<Vec<_>>(),
            vec!["author", "book"]
        );
        assert_eq!(registry.record_type("book").unwrap().revisioned_meta, ["isbn"]);
    }
}
