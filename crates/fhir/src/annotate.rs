//! Vendor annotations applied to every converted resource.
//!
//! Each resource with a type and an id receives:
//! - practice and chart-sharing extensions pointing at the practice organization
//! - an `athenaId` extension carrying the vendor identifier
//! - `meta.source` and a test-data security tag (only when absent)
//! - a rebuilt `identifier` list with the vendor identifier first

use crate::bundle::Bundle;
use crate::vendor::{
    vendor_identifier, ACT_REASON_SYSTEM, CHART_SHARING_EXTENSION_URL, GENERATOR_SYSTEM_MARKERS,
    META_SOURCE, PATIENT_IDENTIFIER_SYSTEM, PRACTICE_EXTENSION_URL, TEST_DATA_CODE,
    TEST_DATA_DISPLAY, VENDOR_IDENTIFIER_SYSTEM, VENDOR_ID_EXTENSION_URL,
};
use mockpt_ids::{is_original_identity, SUBJECT_RESOURCE_TYPE};
use serde_json::{json, Map, Value};

/// Practice identity stamped onto every resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VendorContext {
    /// Qualified practice id, for example `a-16349`.
    pub practice_id: String,
    /// Organization the practice and chart-sharing extensions point at.
    pub practice_org_id: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnnotationStats {
    pub resources: usize,
    pub extensions_added: usize,
    pub identifiers_removed: usize,
}

/// Annotates every resource in `bundle`.
pub fn annotate_bundle(bundle: &mut Bundle, context: &VendorContext) -> AnnotationStats {
    let mut stats = AnnotationStats::default();

    for resource in bundle.resources_mut() {
        let Some(map) = resource.as_object_mut() else {
            continue;
        };
        let (Some(resource_type), Some(id)) = (
            map.get("resourceType").and_then(Value::as_str).map(str::to_owned),
            map.get("id").and_then(Value::as_str).map(str::to_owned),
        ) else {
            continue;
        };

        stats.extensions_added += add_extensions(map, context, &resource_type, &id);
        add_metadata(map);
        stats.identifiers_removed += rebuild_identifiers(map, context, &resource_type, &id);
        stats.resources += 1;
    }

    tracing::info!(
        "annotated {} resources ({} extensions added, {} generator identifiers removed)",
        stats.resources,
        stats.extensions_added,
        stats.identifiers_removed
    );
    stats
}

/// Adds the three vendor extensions, skipping any url already present.
fn add_extensions(
    resource: &mut Map<String, Value>,
    context: &VendorContext,
    resource_type: &str,
    id: &str,
) -> usize {
    let organization = format!("Organization/{}", context.practice_org_id);
    let wanted = [
        json!({"url": PRACTICE_EXTENSION_URL, "valueReference": {"reference": organization}}),
        json!({"url": CHART_SHARING_EXTENSION_URL, "valueReference": {"reference": organization}}),
        json!({
            "url": VENDOR_ID_EXTENSION_URL,
            "valueString": vendor_identifier(&context.practice_id, resource_type, id),
        }),
    ];

    let extensions = resource
        .entry("extension")
        .or_insert_with(|| Value::Array(Vec::new()));
    let Some(extensions) = extensions.as_array_mut() else {
        return 0;
    };

    let mut added = 0;
    for extension in wanted {
        let present = extensions
            .iter()
            .any(|existing| existing.get("url") == extension.get("url"));
        if !present {
            extensions.push(extension);
            added += 1;
        }
    }
    added
}

fn add_metadata(resource: &mut Map<String, Value>) {
    let meta = resource
        .entry("meta")
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(meta) = meta.as_object_mut() else {
        return;
    };

    meta.entry("source")
        .or_insert_with(|| Value::String(META_SOURCE.into()));
    meta.entry("security").or_insert_with(|| {
        json!([{
            "system": ACT_REASON_SYSTEM,
            "code": TEST_DATA_CODE,
            "display": TEST_DATA_DISPLAY,
        }])
    });
}

fn is_generator_identifier(identifier: &Value) -> bool {
    let system = identifier
        .get("system")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    let value = identifier
        .get("value")
        .and_then(Value::as_str)
        .unwrap_or_default();

    GENERATOR_SYSTEM_MARKERS
        .iter()
        .any(|marker| system.contains(marker))
        || is_original_identity(value)
}

/// Rebuilds `identifier`: vendor id, then (Patient only) patient id, then surviving identifiers.
///
/// Returns the number of identifiers dropped.
fn rebuild_identifiers(
    resource: &mut Map<String, Value>,
    context: &VendorContext,
    resource_type: &str,
    id: &str,
) -> usize {
    let existing = match resource.get_mut("identifier").map(Value::take) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };
    let before = existing.len();
    let kept: Vec<Value> = existing
        .into_iter()
        .filter(|identifier| !is_generator_identifier(identifier))
        .collect();
    let removed = before - kept.len();

    let mut identifiers = vec![json!({
        "system": VENDOR_IDENTIFIER_SYSTEM,
        "value": vendor_identifier(&context.practice_id, resource_type, id),
    })];
    if resource_type == SUBJECT_RESOURCE_TYPE {
        identifiers.push(json!({"system": PATIENT_IDENTIFIER_SYSTEM, "value": id}));
    }
    identifiers.extend(kept);

    resource.insert("identifier".into(), Value::Array(identifiers));
    removed
}
