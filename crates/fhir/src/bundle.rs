//! Bundle wire model.
//!
//! Only the envelope is typed: `resourceType`, `type`, and the entries with their optional
//! `fullUrl` and `request`. Resources stay as JSON values and any member the model does not name
//! is carried through `extra` so nothing is lost on the way out.

use crate::{FhirError, FhirResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

// ============================================================================
// Wire model
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    #[serde(rename = "resourceType")]
    pub resource_type: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub bundle_type: Option<String>,

    #[serde(default)]
    pub entry: Vec<BundleEntry>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BundleEntry {
    #[serde(rename = "fullUrl", default, skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub resource: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<BundleRequest>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// How the receiving server should persist an entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRequest {
    pub method: String,
    pub url: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// Resource accessors
// ============================================================================

/// The `resourceType` of a resource value, if present.
pub fn resource_type(resource: &Value) -> Option<&str> {
    resource.get("resourceType").and_then(Value::as_str)
}

/// The `id` of a resource value, if present.
pub fn resource_id(resource: &Value) -> Option<&str> {
    resource.get("id").and_then(Value::as_str)
}

impl BundleEntry {
    /// Entry carrying `resource` with a `PUT {Type}/{id}` request.
    pub fn put(resource: Value) -> Self {
        let request = match (resource_type(&resource), resource_id(&resource)) {
            (Some(resource_type), Some(id)) => Some(BundleRequest {
                method: "PUT".into(),
                url: format!("{resource_type}/{id}"),
                extra: Map::new(),
            }),
            _ => None,
        };
        Self {
            full_url: None,
            resource,
            request,
            extra: Map::new(),
        }
    }

    pub fn resource_type(&self) -> Option<&str> {
        resource_type(&self.resource)
    }

    pub fn resource_id(&self) -> Option<&str> {
        resource_id(&self.resource)
    }
}

impl Bundle {
    /// Parses a bundle from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::Translation`] with the failing path if the JSON does not fit the
    /// bundle shape, or [`FhirError::InvalidInput`] if `resourceType` is not `Bundle`.
    pub fn parse(json: &str) -> FhirResult<Self> {
        let mut deserializer = serde_json::Deserializer::from_str(json);
        let bundle: Bundle = serde_path_to_error::deserialize(&mut deserializer).map_err(|e| {
            let path = e.path().to_string();
            let inner = e.into_inner();
            FhirError::Translation(format!("Bundle schema mismatch at {path}: {inner}"))
        })?;

        if bundle.resource_type != "Bundle" {
            return Err(FhirError::InvalidInput(format!(
                "expected resourceType 'Bundle', got '{}'",
                bundle.resource_type
            )));
        }
        Ok(bundle)
    }

    /// Renders the bundle as pretty-printed JSON.
    pub fn render(&self) -> FhirResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// A transaction bundle holding `entries`.
    pub fn transaction(entries: Vec<BundleEntry>) -> Self {
        Self {
            resource_type: "Bundle".into(),
            bundle_type: Some("transaction".into()),
            entry: entries,
            extra: Map::new(),
        }
    }

    /// Appends every entry of `other` that carries a resource. Returns the number appended.
    pub fn merge(&mut self, other: Bundle) -> usize {
        let before = self.entry.len();
        self.entry
            .extend(other.entry.into_iter().filter(|e| !e.resource.is_null()));
        self.entry.len() - before
    }

    pub fn resources(&self) -> impl Iterator<Item = &Value> {
        self.entry.iter().map(|e| &e.resource)
    }

    pub fn resources_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        self.entry.iter_mut().map(|e| &mut e.resource)
    }

    /// Resources whose `resourceType` equals `wanted`.
    pub fn resources_of_type<'a>(&'a self, wanted: &'a str) -> impl Iterator<Item = &'a Value> {
        self.resources()
            .filter(move |r| resource_type(r) == Some(wanted))
    }

    /// Id of the first resource of type `wanted`.
    pub fn first_id_of_type(&self, wanted: &str) -> Option<&str> {
        self.resources()
            .filter(|r| resource_type(r) == Some(wanted))
            .find_map(resource_id)
    }

    /// Resource counts keyed by type.
    pub fn count_by_type(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for resource_type in self.resources().filter_map(resource_type) {
            *counts.entry(resource_type.to_string()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"{
  "resourceType": "Bundle",
  "type": "transaction",
  "entry": [
    {
      "fullUrl": "urn:uuid:0a1b2c3d-1111-2222-3333-444455556666",
      "resource": {"resourceType": "Patient", "id": "0a1b2c3d-1111-2222-3333-444455556666", "zeta": 1, "alpha": 2},
      "request": {"method": "POST", "url": "Patient"}
    },
    {
      "resource": {"resourceType": "Encounter", "id": "e1"},
      "search": {"mode": "match"}
    }
  ],
  "timestamp": "2024-01-01T00:00:00Z"
}"#;

    #[test]
    fn parse_keeps_unknown_members() {
        let bundle = Bundle::parse(SAMPLE).expect("parse bundle");
        assert_eq!(bundle.bundle_type.as_deref(), Some("transaction"));
        assert_eq!(bundle.entry.len(), 2);
        assert!(bundle.extra.contains_key("timestamp"));
        assert!(bundle.entry[1].extra.contains_key("search"));

        let rendered = bundle.render().expect("render");
        let reparsed = Bundle::parse(&rendered).expect("reparse");
        assert_eq!(bundle, reparsed);
    }

    #[test]
    fn render_preserves_resource_member_order() {
        let bundle = Bundle::parse(SAMPLE).expect("parse bundle");
        let rendered = bundle.render().expect("render");
        let zeta = rendered.find("\"zeta\"").expect("zeta present");
        let alpha = rendered.find("\"alpha\"").expect("alpha present");
        assert!(zeta < alpha);
    }

    #[test]
    fn parse_reports_schema_mismatch() {
        let input = r#"{"resourceType": "Bundle", "entry": [{"request": {"method": 5, "url": "x"}}]}"#;
        let err = Bundle::parse(input).expect_err("method must be a string");
        match err {
            FhirError::Translation(msg) => assert!(msg.starts_with("Bundle schema mismatch")),
            other => panic!("expected Translation error, got {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_non_bundle() {
        let err = Bundle::parse(r#"{"resourceType": "Patient"}"#).expect_err("not a bundle");
        assert!(matches!(err, FhirError::InvalidInput(_)));
    }

    #[test]
    fn merge_skips_entries_without_resource() {
        let mut bundle = Bundle::parse(SAMPLE).expect("parse bundle");
        let mut other = Bundle::transaction(vec![BundleEntry::put(
            json!({"resourceType": "Organization", "id": "o1"}),
        )]);
        other.entry.push(BundleEntry {
            full_url: None,
            resource: Value::Null,
            request: None,
            extra: Map::new(),
        });

        assert_eq!(bundle.merge(other), 1);
        assert_eq!(bundle.first_id_of_type("Organization"), Some("o1"));
        assert_eq!(bundle.count_by_type().get("Organization"), Some(&1));
    }

    #[test]
    fn put_entry_targets_type_and_id() {
        let entry = BundleEntry::put(json!({"resourceType": "Location", "id": "t800000001"}));
        let request = entry.request.expect("request");
        assert_eq!(request.method, "PUT");
        assert_eq!(request.url, "Location/t800000001");
    }
}
