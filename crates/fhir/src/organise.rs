//! Bundle organisation: linkage fixes, shared-resource split and dependency ordering.

use crate::bundle::{resource_id, resource_type, Bundle, BundleEntry};
use mockpt_ids::SUBJECT_RESOURCE_TYPE;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Resource types shared between patients and written to their own bundles.
pub const SHARED_RESOURCE_TYPES: [&str; 4] =
    ["Organization", "Practitioner", "Location", "PractitionerRole"];

/// Position of each type in the output bundle. Unlisted types go last.
pub const DEPENDENCY_ORDER: &[(&str, u32)] = &[
    ("Patient", 0),
    ("Medication", 1),
    ("MedicationRequest", 2),
    ("Encounter", 3),
    ("Condition", 4),
    ("Observation", 5),
    ("DiagnosticReport", 6),
    ("Procedure", 7),
    ("AllergyIntolerance", 8),
    ("Immunization", 9),
    ("DocumentReference", 10),
    ("MedicationAdministration", 11),
    ("Claim", 12),
    ("ExplanationOfBenefit", 13),
    ("Provenance", 14),
];

const UNLISTED_ORDER: u32 = 999;

const VIRTUAL_CLASS_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v3-ActCode";

fn dependency_rank(resource_type: Option<&str>) -> u32 {
    resource_type
        .and_then(|t| DEPENDENCY_ORDER.iter().find(|(name, _)| *name == t))
        .map(|(_, rank)| *rank)
        .unwrap_or(UNLISTED_ORDER)
}

/// Stable sort of entries by [`DEPENDENCY_ORDER`].
pub fn sort_by_dependency_order(bundle: &mut Bundle) {
    bundle
        .entry
        .sort_by_key(|entry| dependency_rank(entry.resource_type()));
}

/// Removes shared resources from `bundle` and returns them as one transaction bundle per type.
///
/// Every returned entry carries a `PUT {Type}/{id}` request. Types with no resources are omitted.
pub fn split_shared_resources(bundle: &mut Bundle) -> Vec<(String, Bundle)> {
    let mut shared: Vec<(String, Vec<BundleEntry>)> = SHARED_RESOURCE_TYPES
        .iter()
        .map(|t| ((*t).to_string(), Vec::new()))
        .collect();

    let mut kept = Vec::with_capacity(bundle.entry.len());
    for entry in std::mem::take(&mut bundle.entry) {
        let slot = entry
            .resource_type()
            .and_then(|t| shared.iter().position(|(name, _)| name == t));
        match slot {
            Some(index) => shared[index].1.push(BundleEntry::put(entry.resource)),
            None => kept.push(entry),
        }
    }
    bundle.entry = kept;

    let split: Vec<(String, Bundle)> = shared
        .into_iter()
        .filter(|(_, entries)| !entries.is_empty())
        .map(|(resource_type, entries)| (resource_type, Bundle::transaction(entries)))
        .collect();

    for (resource_type, shared_bundle) in &split {
        tracing::info!(
            "split {} {resource_type} resource(s) out of the patient bundle",
            shared_bundle.entry.len()
        );
    }
    split
}

/// Points every Patient's `generalPractitioner` at the first Practitioner in the bundle.
///
/// Returns the practitioner id used, or `None` when the bundle has no Practitioner.
pub fn link_general_practitioner(bundle: &mut Bundle) -> Option<String> {
    let Some(practitioner_id) = bundle.first_id_of_type("Practitioner").map(str::to_owned) else {
        tracing::warn!("no Practitioner in bundle, Patient will have no generalPractitioner");
        return None;
    };

    for resource in bundle.resources_mut() {
        if resource_type(resource) == Some(SUBJECT_RESOURCE_TYPE) {
            resource["generalPractitioner"] = json!([{
                "reference": format!("Practitioner/{practitioner_id}"),
                "type": "Practitioner",
            }]);
        }
    }
    Some(practitioner_id)
}

/// Fills `Encounter.serviceProvider.display` from the referenced Organization's name.
///
/// Existing displays are kept. Returns the number of encounters updated.
pub fn fill_service_provider_display(bundle: &mut Bundle) -> usize {
    let names: HashMap<String, String> = bundle
        .resources_of_type("Organization")
        .filter_map(|org| {
            let id = resource_id(org)?;
            let name = org
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("Unknown Organization");
            Some((id.to_string(), name.to_string()))
        })
        .collect();
    if names.is_empty() {
        tracing::warn!("no Organization in bundle, cannot fill serviceProvider display");
        return 0;
    }

    let mut updated = 0;
    for resource in bundle.resources_mut() {
        if resource_type(resource) != Some("Encounter") {
            continue;
        }
        let Some(provider) = resource
            .get_mut("serviceProvider")
            .and_then(Value::as_object_mut)
        else {
            continue;
        };
        if provider.contains_key("display") {
            continue;
        }
        let org_id = provider
            .get("reference")
            .and_then(Value::as_str)
            .map(|reference| reference.rsplit('/').next().unwrap_or(reference));
        if let Some(name) = org_id.and_then(|id| names.get(id)) {
            provider.insert("display".into(), Value::String(name.clone()));
            updated += 1;
        }
    }

    tracing::info!("added serviceProvider display to {updated} encounters");
    updated
}

/// Marks encounters starting on one of `dates` (`YYYY-MM-DD`) as virtual.
///
/// Only encounters that already carry a `class` are changed. Returns the number marked.
pub fn mark_virtual_encounters(bundle: &mut Bundle, dates: &[String]) -> usize {
    let mut marked = 0;
    for resource in bundle.resources_mut() {
        if resource_type(resource) != Some("Encounter") || resource.get("class").is_none() {
            continue;
        }
        let start = resource
            .pointer("/period/start")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let day = start.get(..10).unwrap_or(start);
        if dates.iter().any(|date| date == day) {
            resource["class"] = json!({
                "system": VIRTUAL_CLASS_SYSTEM,
                "code": "VR",
                "display": "virtual",
            });
            marked += 1;
        }
    }
    tracing::info!("marked {marked} encounters as virtual");
    marked
}
