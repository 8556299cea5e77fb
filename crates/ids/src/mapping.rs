//! The run-scoped identity mapping.
//!
//! Both the JSON reference rewriter and the XML substitution pass consult the same
//! [`IdentityMapping`], so an entity keeps one assigned identifier across every document it
//! appears in.

use crate::allocator::AssignedId;
use crate::{IdError, IdResult};
use std::collections::HashMap;

/// Where a mapping row came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MappingSource {
    /// The entity's own identity field.
    Primary,
    /// A secondary, domain-meaningful value attached to the entity.
    NaturalKey,
}

/// One row of the mapping: the identifier assigned to an original identity and its type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappedId {
    pub id: AssignedId,
    pub resource_type: String,
    pub source: MappingSource,
}

/// Original identity to assigned identifier, for one conversion run.
#[derive(Clone, Debug, Default)]
pub struct IdentityMapping {
    entries: HashMap<String, MappedId>,
}

impl IdentityMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the primary identity of an entity.
    ///
    /// Re-inserting the same row is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::ConflictingMapping`] if `original` is already mapped to a different
    /// identifier.
    pub fn insert(
        &mut self,
        original: impl Into<String>,
        id: AssignedId,
        resource_type: impl Into<String>,
    ) -> IdResult<()> {
        let original = original.into();
        if let Some(existing) = self.entries.get(&original) {
            if existing.id == id {
                return Ok(());
            }
            return Err(IdError::ConflictingMapping {
                original,
                existing: existing.id.to_string(),
                proposed: id.to_string(),
            });
        }
        self.entries.insert(
            original,
            MappedId {
                id,
                resource_type: resource_type.into(),
                source: MappingSource::Primary,
            },
        );
        Ok(())
    }

    /// Records a natural key for an already-mapped entity, unless the key is taken.
    ///
    /// Returns `true` if the key was added. An existing row (primary or natural) always wins.
    pub fn insert_natural_key(
        &mut self,
        key: impl Into<String>,
        id: AssignedId,
        resource_type: impl Into<String>,
    ) -> bool {
        let key = key.into();
        if key.is_empty() || self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(
            key,
            MappedId {
                id,
                resource_type: resource_type.into(),
                source: MappingSource::NaturalKey,
            },
        );
        true
    }

    pub fn get(&self, original: &str) -> Option<&MappedId> {
        self.entries.get(original)
    }

    pub fn contains(&self, original: &str) -> bool {
        self.entries.contains_key(original)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of rows that came from primary identities.
    pub fn primary_count(&self) -> usize {
        self.primary_keys().count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MappedId)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Original identities that came from an entity's own identity field.
    pub fn primary_keys(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, mapped)| mapped.source == MappingSource::Primary)
            .map(|(k, _)| k.as_str())
    }
}
