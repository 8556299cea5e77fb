//! Add-on documents: a freshly generated CCDA encounter grafted onto an existing server patient.

use crate::config::CoreConfig;
use crate::generator::Generator;
use crate::remote::RemoteClient;
use crate::{CoreError, CoreResult};
use ccda::{
    add_encompassing_encounter, add_vendor_entry_ids, apply_to_tree, build_mapping_from_tree,
    ensure_declaration, strip_line_breaks, update_demographics, Demographics,
    EncompassingEncounter,
};
use chrono::NaiveDate;
use mockpt_ids::IdAllocator;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;

/// Reads name, gender and birth date from a FHIR Patient resource.
///
/// Only the first `name` entry is used. A patient without a family name keeps an empty one.
pub fn demographics_from_patient(
    patient: &Value,
    patient_id: &str,
    practice_name: Option<String>,
) -> Demographics {
    let name = patient
        .get("name")
        .and_then(Value::as_array)
        .and_then(|names| names.first());
    let given = name
        .and_then(|n| n.get("given"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let family = name
        .and_then(|n| n.get("family"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let text_field = |field: &str| {
        patient
            .get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    Demographics {
        patient_id: patient_id.to_string(),
        given,
        family,
        gender: text_field("gender"),
        birth_date: text_field("birthDate"),
        practice_name,
    }
}

/// A generated document after every add-on edit.
#[derive(Clone, Debug)]
pub struct ProcessedDocument {
    pub xml: String,
    pub demographics_updated: usize,
    pub tokens_replaced: usize,
    pub occurrences: usize,
    pub vendor_ids: usize,
}

/// Applies the add-on edits to a generated document, in order: demographics, encompassing
/// encounter, identity remapping, vendor entry ids, line-break removal, XML declaration.
pub fn process_document(
    xml: &str,
    demographics: &Demographics,
    encounter: &EncompassingEncounter,
    config: &CoreConfig,
) -> CoreResult<ProcessedDocument> {
    let with_demographics = update_demographics(xml, demographics)?;
    let with_encounter = add_encompassing_encounter(&with_demographics.xml, encounter)?;
    if with_encounter.applied == 0 {
        tracing::warn!("document already has an encompassing encounter, leaving it as is");
    }

    let mut allocator = IdAllocator::new(config.ranges().clone());
    let mapping = build_mapping_from_tree(&with_encounter.xml, &mut allocator)?;
    let substitution = apply_to_tree(&with_encounter.xml, &mapping);

    let with_vendor_ids = add_vendor_entry_ids(&substitution.xml, config.practice_id())?;
    let flattened = strip_line_breaks(&with_vendor_ids.xml)?;

    Ok(ProcessedDocument {
        xml: ensure_declaration(&flattened),
        demographics_updated: with_demographics.applied,
        tokens_replaced: substitution.tokens_replaced,
        occurrences: substitution.occurrences,
        vendor_ids: with_vendor_ids.applied,
    })
}

/// One add-on run.
#[derive(Clone, Debug)]
pub struct AddonRequest {
    /// Patient identifier on the remote server.
    pub patient_id: String,
    pub server: String,
    pub encounter_date: NaiveDate,
    pub output_dir: PathBuf,
    pub generator: Generator,
}

#[derive(Clone, Debug)]
pub struct AddonSummary {
    pub output: PathBuf,
    pub encounter_id: String,
    pub practice_name: String,
    pub tokens_replaced: usize,
    pub vendor_ids: usize,
}

/// Generates a document, fetches the patient and practice from the server, applies the add-on
/// edits and writes `{output_dir}/{patient}_addon.xml`.
///
/// # Errors
///
/// Fails when the generator produces nothing, the patient cannot be fetched, or the document
/// cannot be edited or written. A missing practice is not an error.
pub fn run_addon(config: &CoreConfig, request: &AddonRequest) -> CoreResult<AddonSummary> {
    let generated = request.generator.generate()?;
    let xml = fs::read_to_string(&generated).map_err(|source| CoreError::FileRead {
        path: generated.clone(),
        source,
    })?;

    let client = RemoteClient::new(&request.server)?;
    let patient = client.fetch_patient(&request.patient_id)?;
    let practice = client.fetch_practice(&patient);

    let demographics =
        demographics_from_patient(&patient, &request.patient_id, Some(practice.name.clone()));
    let encounter = EncompassingEncounter {
        patient_id: request.patient_id.clone(),
        date: request.encounter_date,
    };
    let processed = process_document(&xml, &demographics, &encounter, config)?;

    fs::create_dir_all(&request.output_dir).map_err(|source| CoreError::DirCreation {
        path: request.output_dir.clone(),
        source,
    })?;
    let output = request
        .output_dir
        .join(format!("{}_addon.xml", request.patient_id));
    fs::write(&output, &processed.xml).map_err(|source| CoreError::FileWrite {
        path: output.clone(),
        source,
    })?;

    tracing::info!(
        "wrote add-on document for {} ({}) to {}",
        demographics.full_name(),
        practice.name,
        output.display()
    );
    Ok(AddonSummary {
        output,
        encounter_id: encounter.encounter_id(),
        practice_name: practice.name,
        tokens_replaced: processed.tokens_replaced,
        vendor_ids: processed.vendor_ids,
    })
}
