//! Synthetic identifier allocation and identity mapping.
//!
//! Records produced by the synthetic-data generator carry random hyphenated UUIDs as their
//! identities. The receiving system rejects those: it wants identifiers that contain at least one
//! non-numeric character and that never collide with identifiers issued by a previous run.
//!
//! This crate provides:
//! - [`IdRange`] and [`RangeTable`]: per-entity-type numeric ranges with an alphabetic prefix.
//! - [`IdAllocator`]: draws run-unique identifiers from those ranges.
//! - [`IdentityMapping`]: the run-scoped table from original identity to assigned identifier,
//!   shared by every consumer that rewrites documents (JSON bundles and XML documents alike).
//! - Lexical helpers for recognising original identities and already-assigned identifiers.
//!
//! ## Assigned identifier form
//! `<prefix><number>`, for example `t10234567`. The number lies inside the entity type's
//! configured range (inclusive on both ends); ranges of distinct types never overlap.

mod allocator;
mod mapping;
mod range;
mod token;

pub use allocator::{AssignedId, IdAllocator};
pub use mapping::{IdentityMapping, MappedId, MappingSource};
pub use range::{IdRange, RangeTable, DEFAULT_PREFIX, SUBJECT_RESOURCE_TYPE};
pub use token::{find_original_identities, is_original_identity};

/// Error type for identifier operations.
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    /// Invalid input provided
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The entity type has no configured range.
    #[error("no identifier range configured for entity type '{0}'")]
    UnconfiguredType(String),

    /// Every value in the entity type's range has been issued.
    #[error("identifier range for '{entity_type}' exhausted ({size} values issued)")]
    RangeExhausted { entity_type: String, size: u64 },

    /// A caller-supplied identifier has already been issued in this run.
    #[error("identifier {0} has already been issued in this run")]
    AlreadyIssued(String),

    /// An original identity was mapped a second time to a different identifier.
    #[error("original identity '{original}' is already mapped to {existing}, refusing {proposed}")]
    ConflictingMapping {
        original: String,
        existing: String,
        proposed: String,
    },
}

/// Result type for identifier operations.
pub type IdResult<T> = Result<T, IdError>;
