//! CCDA document support for the mock patient converter.
//!
//! A CCDA document describes the same patient as the FHIR bundle but shares no structural model
//! with it. Identity consistency is therefore kept by literal token substitution driven by the
//! same [`mockpt_ids::IdentityMapping`] the JSON rewriter uses, while a few structural additions
//! (patient identifier, encompassing encounter, vendor entry ids, demographics) are made with a
//! streaming reader/writer pass that leaves every untouched byte as it was.

mod stream;

pub mod context;
pub mod document;
pub mod index;
pub mod substitute;

pub use context::{infer_entity_type, FALLBACK_ENTITY_TYPE};
pub use document::{
    add_encompassing_encounter, add_vendor_entry_ids, ensure_declaration,
    insert_patient_identifier, strip_line_breaks, update_demographics, Demographics, Edit,
    EncompassingEncounter,
};
pub use index::build_mapping_from_tree;
pub use substitute::{apply_to_tree, Substitution};

/// Errors returned by the `ccda` crate.
#[derive(Debug, thiserror::Error)]
pub enum CcdaError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("identifier error: {0}")]
    Ids(#[from] mockpt_ids::IdError),
}

/// Type alias for Results that can fail with a [`CcdaError`].
pub type CcdaResult<T> = Result<T, CcdaError>;
