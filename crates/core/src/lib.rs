//! # mockpt core
//!
//! Workflows that turn generated synthetic patients into upload-ready test data:
//! - **convert**: remap a generated FHIR bundle (and its CCDA twin) to synthetic identifiers,
//!   annotate it for the receiving vendor and lay out the upload files
//! - **addon**: generate a fresh CCDA encounter for a patient that already exists on a remote
//!   server and rewrite it to that patient's identity
//! - **validator**: check a converted bundle before upload
//!
//! The format-specific work lives in the `mockpt-ids`, `fhir` and `ccda` crates. This crate
//! wires them together with the file system, the generator process and the remote server.
//!
//! **No CLI concerns**: argument parsing, environment lookup and console output belong in the
//! `mockpt` binary.

pub mod addon;
pub mod config;
pub mod constants;
pub mod convert;
pub mod generator;
pub mod remote;
pub mod validation;
pub mod validator;

mod error;

pub use addon::{run_addon, AddonRequest, AddonSummary};
pub use config::CoreConfig;
pub use convert::{convert, ConvertRequest, ConvertSummary};
pub use error::{CoreError, CoreResult};
pub use generator::Generator;
pub use remote::RemoteClient;
pub use validator::{validate, ValidationReport};
