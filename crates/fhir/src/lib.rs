//! FHIR bundle support for the mock patient converter.
//!
//! This crate owns everything that touches FHIR JSON:
//! - a bundle wire model that keeps unknown members verbatim
//! - the document index that assigns synthetic identifiers to every entity
//! - reference parsing and rewriting
//! - vendor annotations (extensions, metadata, ordered identifiers)
//! - bundle organisation (shared-resource split, dependency ordering, linkage fixes)
//!
//! Resources are handled as `serde_json::Value` trees. The converter only needs a handful of
//! members from each resource; everything else must survive untouched, in its original order.

pub mod annotate;
pub mod bundle;
pub mod index;
pub mod organise;
pub mod reference;
pub mod rewrite;
pub mod vendor;

pub use annotate::{annotate_bundle, AnnotationStats, VendorContext};
pub use bundle::{resource_id, resource_type, Bundle, BundleEntry, BundleRequest};
pub use index::{build_mapping, IndexReport};
pub use reference::Reference;
pub use rewrite::{rewrite_resource_ids, ReferenceRewriter, ReferenceTypePolicy, RewriteStats};

/// Errors returned by the `fhir` crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("identifier error: {0}")]
    Ids(#[from] mockpt_ids::IdError),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;
