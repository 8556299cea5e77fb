//! Document index: assigns a synthetic identifier to every entity in a bundle.

use crate::bundle::{resource_id, resource_type, Bundle};
use crate::FhirResult;
use mockpt_ids::{IdAllocator, IdentityMapping, SUBJECT_RESOURCE_TYPE};
use serde_json::Value;

/// Result of indexing a bundle.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub mapping: IdentityMapping,
    /// Entities whose id already had assigned-identifier shape.
    pub already_assigned: usize,
    /// `(type, id)` of entities skipped because their type has no range.
    pub unconfigured: Vec<(String, String)>,
    /// Natural keys added to the mapping.
    pub natural_keys: usize,
}

/// Builds the identity mapping for `bundle`.
///
/// The first subject-type entity (`Patient`) receives `subject_number` verbatim (with the
/// subject prefix) instead of a drawn identifier; later subject entities draw from the subject
/// range. All primary identities are mapped before any natural key, so a natural key can never
/// shadow another entity's primary identity.
///
/// # Errors
///
/// Fails if a range is exhausted. Entities of types without a range are skipped with a warning
/// instead.
pub fn build_mapping(
    bundle: &Bundle,
    allocator: &mut IdAllocator,
    subject_number: Option<u64>,
) -> FhirResult<IndexReport> {
    let mut report = IndexReport::default();
    let mut subject_id = None;

    // The subject number is claimed before any draw so no earlier entity can take it.
    if let Some(number) = subject_number {
        let subject = bundle
            .resources_of_type(SUBJECT_RESOURCE_TYPE)
            .filter_map(resource_id)
            .find(|id| !allocator.ranges().is_assigned_id(id));
        if let Some(id) = subject {
            subject_id = Some(id);
            let assigned = allocator.claim(SUBJECT_RESOURCE_TYPE, number)?;
            tracing::debug!("{SUBJECT_RESOURCE_TYPE}/{id} -> {assigned}");
            report.mapping.insert(id, assigned, SUBJECT_RESOURCE_TYPE)?;
        }
    }

    for resource in bundle.resources() {
        let (Some(resource_type), Some(id)) = (resource_type(resource), resource_id(resource))
        else {
            continue;
        };

        if allocator.ranges().is_assigned_id(id) {
            report.already_assigned += 1;
            continue;
        }
        if subject_id.take_if(|subject| *subject == id).is_some() {
            continue;
        }
        if report.mapping.contains(id) {
            tracing::debug!("{resource_type}/{id} appears more than once, keeping first mapping");
            continue;
        }

        if !allocator.ranges().contains_type(resource_type) {
            tracing::warn!("no identifier range for {resource_type}, leaving {resource_type}/{id} unchanged");
            report
                .unconfigured
                .push((resource_type.to_string(), id.to_string()));
            continue;
        }
        let assigned = allocator.allocate(resource_type)?;

        tracing::debug!("{resource_type}/{id} -> {assigned}");
        report.mapping.insert(id, assigned, resource_type)?;
    }

    for resource in bundle.resources() {
        let (Some(resource_type), Some(id)) = (resource_type(resource), resource_id(resource))
        else {
            continue;
        };
        let Some(mapped) = report.mapping.get(id) else {
            continue;
        };
        if mapped.resource_type != resource_type {
            continue;
        }
        let assigned = mapped.id.clone();

        let values: Vec<&str> = resource
            .get("identifier")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|identifier| identifier.get("value").and_then(Value::as_str))
            .collect();
        for value in values {
            if report
                .mapping
                .insert_natural_key(value, assigned.clone(), resource_type)
            {
                report.natural_keys += 1;
            }
        }
    }

    tracing::info!(
        "indexed {} entities ({} natural keys, {} already assigned, {} without range)",
        report.mapping.primary_count(),
        report.natural_keys,
        report.already_assigned,
        report.unconfigured.len()
    );
    Ok(report)
}
