use super::BundleIndex;
use fhir::vendor::{
    META_SOURCE, PATIENT_IDENTIFIER_SYSTEM, PRACTICE_EXTENSION_URL, VENDOR_IDENTIFIER_SYSTEM,
};
use fhir::Reference;
use mockpt_ids::is_original_identity;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Outcome of one check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    /// What the check enforces, one line.
    pub rule: &'static str,
    pub critical: bool,
    pub passed: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub info: Vec<String>,
    /// Resources (or references) the check looked at.
    pub checked: usize,
    /// How many of those were valid.
    pub valid: usize,
}

impl CheckResult {
    fn new(name: &'static str, rule: &'static str, critical: bool) -> Self {
        Self {
            name,
            rule,
            critical,
            passed: true,
            issues: Vec::new(),
            warnings: Vec::new(),
            info: Vec::new(),
            checked: 0,
            valid: 0,
        }
    }

    pub fn add_issue(&mut self, issue: impl Into<String>) {
        self.passed = false;
        self.issues.push(issue.into());
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn add_info(&mut self, info: impl Into<String>) {
        self.info.push(info.into());
    }

    fn tally(&mut self, ok: bool) {
        self.checked += 1;
        if ok {
            self.valid += 1;
        }
    }
}

pub type Check = fn(&BundleIndex<'_>) -> CheckResult;

/// Every check, in report order.
pub const CHECKS: &[Check] = &[
    bundle_structure,
    resource_inventory,
    duplicate_identifiers,
    leftover_identities,
    identifier_hygiene,
    primary_reference_placement,
    dangling_references,
    dependency_order,
    vendor_metadata,
    reference_format,
    general_practitioner,
    empty_encounters,
];

/// Systems the generator stamps on its own identifiers.
const GENERATOR_IDENTIFIER_MARKERS: [&str; 2] = ["synthea", "smarthealthit"];

/// Links that must resolve inside the bundle: path from the resource, expected target type.
const TRACKED_LINKS: &[(&[&str], &str)] = &[
    (&["encounter"], "Encounter"),
    (&["context"], "Encounter"),
    (&["context", "encounter"], "Encounter"),
    (&["item", "encounter"], "Encounter"),
    (&["medicationReference"], "Medication"),
];

/// Fields holding references, checked for shape.
const REFERENCE_FIELDS: [&str; 14] = [
    "subject",
    "patient",
    "encounter",
    "serviceProvider",
    "generalPractitioner",
    "managingOrganization",
    "medicationReference",
    "requester",
    "recorder",
    "asserter",
    "organization",
    "practitioner",
    "provider",
    "insurer",
];

/// Types that must come before the listed later types when both are present.
const ORDERING_RULES: &[(&[&str], &[&str])] = &[
    (&["Medication"], &["MedicationRequest", "MedicationAdministration"]),
    (&["Organization", "Practitioner", "Location"], &["Encounter"]),
];

/// Types the Patient does not have to precede.
const NON_CLINICAL_TYPES: [&str; 5] = [
    "Patient",
    "Organization",
    "Practitioner",
    "Location",
    "PractitionerRole",
];

const VENDOR_COVERAGE_THRESHOLD: f64 = 0.5;

fn type_of(resource: &Value) -> &str {
    resource
        .get("resourceType")
        .and_then(Value::as_str)
        .unwrap_or("<untyped>")
}

fn id_of(resource: &Value) -> Option<&str> {
    resource.get("id").and_then(Value::as_str)
}

fn label(resource: &Value) -> String {
    format!("{}/{}", type_of(resource), id_of(resource).unwrap_or("<no id>"))
}

fn identifiers(resource: &Value) -> &[Value] {
    resource
        .get("identifier")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn system_of(identifier: &Value) -> &str {
    identifier
        .get("system")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// Values reached by following `path`, descending into arrays at every step.
fn values_at<'a>(resource: &'a Value, path: &[&str]) -> Vec<&'a Value> {
    let mut current = vec![resource];
    for segment in path {
        let mut next = Vec::new();
        for value in current {
            match value.get(segment) {
                Some(Value::Array(items)) => next.extend(items.iter()),
                Some(found) => next.push(found),
                None => {}
            }
        }
        current = next;
    }
    current
}

fn bundle_structure(index: &BundleIndex<'_>) -> CheckResult {
    let mut result = CheckResult::new(
        "Bundle structure",
        "top level is a Bundle with a type and an entry array",
        true,
    );
    let Some(root) = index.root.as_object() else {
        result.add_issue("bundle is not a JSON object");
        return result;
    };

    match root.get("resourceType").and_then(Value::as_str) {
        Some("Bundle") => {}
        Some(other) => result.add_issue(format!("resourceType is '{other}', expected 'Bundle'")),
        None => result.add_issue("resourceType is missing"),
    }
    match root.get("type").and_then(Value::as_str) {
        Some(kind) => result.add_info(format!("bundle type: {kind}")),
        None => result.add_issue("type is missing"),
    }
    match root.get("entry") {
        Some(Value::Array(entries)) => {
            for (position, entry) in entries.iter().enumerate() {
                let ok = entry.get("resource").is_some_and(Value::is_object);
                result.tally(ok);
                if !ok {
                    result.add_issue(format!("entry {position} has no resource"));
                }
            }
        }
        Some(_) => result.add_issue("entry is not an array"),
        None => result.add_issue("entry is missing"),
    }
    result
}

fn resource_inventory(index: &BundleIndex<'_>) -> CheckResult {
    let mut result = CheckResult::new("Resource inventory", "bundle contains a Patient", true);
    for (resource_type, count) in index.counts() {
        result.add_info(format!("{resource_type}: {count}"));
    }
    for resource in index.resources() {
        let typed = resource.get("resourceType").and_then(Value::as_str).is_some();
        result.tally(typed);
        if !typed {
            result.add_warning("resource without resourceType");
        }
    }

    match index.positions("Patient").len() {
        0 => result.add_issue("no Patient resource"),
        1 => {}
        n => result.add_warning(format!("{n} Patient resources")),
    }
    result
}

fn duplicate_identifiers(index: &BundleIndex<'_>) -> CheckResult {
    let mut result = CheckResult::new(
        "Duplicate identifiers",
        "resource ids are unique across the bundle",
        true,
    );
    let mut seen: HashMap<&str, String> = HashMap::new();
    for resource in index.resources() {
        let Some(id) = id_of(resource) else {
            result.add_warning(format!("{} has no id", type_of(resource)));
            continue;
        };
        match seen.get(id) {
            Some(first) => {
                result.tally(false);
                result.add_issue(format!("id {id} used by {first} and {}", label(resource)));
            }
            None => {
                result.tally(true);
                seen.insert(id, label(resource));
            }
        }
    }
    result
}

fn leftover_identities(index: &BundleIndex<'_>) -> CheckResult {
    let mut result = CheckResult::new(
        "Leftover original identities",
        "no resource id still carries a generator identity (Medication exempt)",
        true,
    );
    for resource in index.resources() {
        if type_of(resource) == "Medication" {
            continue;
        }
        let Some(id) = id_of(resource) else { continue };
        let leftover = is_original_identity(id);
        result.tally(!leftover);
        if leftover {
            result.add_issue(format!("{} still has a generator id", label(resource)));
        }
    }
    result
}

fn identifier_hygiene(index: &BundleIndex<'_>) -> CheckResult {
    let mut result = CheckResult::new(
        "Identifier hygiene",
        "no identifier from a generator system or with a generator value",
        true,
    );
    for resource in index.resources() {
        let mut clean = true;
        for identifier in identifiers(resource) {
            let system = system_of(identifier);
            if GENERATOR_IDENTIFIER_MARKERS.iter().any(|m| system.contains(m)) {
                clean = false;
                result.add_issue(format!("{} has identifier system {system}", label(resource)));
            }
            if let Some(value) = identifier.get("value").and_then(Value::as_str) {
                if is_original_identity(value) {
                    clean = false;
                    result.add_issue(format!("{} has identifier value {value}", label(resource)));
                }
            }
        }
        result.tally(clean);
    }
    result
}

fn primary_reference_placement(index: &BundleIndex<'_>) -> CheckResult {
    let mut result = CheckResult::new(
        "Primary reference placement",
        "vendor identifier first; Patient identifier second on the Patient",
        false,
    );
    for resource in index.resources() {
        if id_of(resource).is_none() {
            continue;
        }
        let identifiers = identifiers(resource);
        let mut ok = true;

        if identifiers.first().map(system_of) != Some(VENDOR_IDENTIFIER_SYSTEM) {
            ok = false;
            result.add_issue(format!("{} does not lead with the vendor identifier", label(resource)));
        }
        if type_of(resource) == "Patient"
            && identifiers.get(1).map(system_of) != Some(PATIENT_IDENTIFIER_SYSTEM)
        {
            ok = false;
            result.add_issue(format!("{} lacks the patient identifier in second place", label(resource)));
        }
        result.tally(ok);
    }
    result
}

fn dangling_references(index: &BundleIndex<'_>) -> CheckResult {
    let mut result = CheckResult::new(
        "Dangling references",
        "encounter and medication links resolve to a resource of the stated type",
        true,
    );
    for resource in index.resources() {
        for (path, expected) in TRACKED_LINKS {
            for link in values_at(resource, path) {
                let Some(raw) = link.get("reference").and_then(Value::as_str) else {
                    continue;
                };
                let problem = match Reference::parse(raw) {
                    Reference::Typed {
                        resource_type,
                        token,
                    } if resource_type == *expected => {
                        (!index.has(expected, token)).then(|| format!("{raw} has no target"))
                    }
                    Reference::Typed { resource_type, .. } => Some(format!(
                        "{raw} points to {resource_type}, expected {expected}"
                    )),
                    Reference::DirectLink { .. } => Some(format!("{raw} was never rewritten")),
                    Reference::Query { .. } => Some(format!("{raw} is an unresolved query")),
                    Reference::Other => Some(format!("{raw} is not a local reference")),
                };
                result.tally(problem.is_none());
                if let Some(problem) = problem {
                    result.add_issue(format!("{}.{}: {problem}", label(resource), path.join(".")));
                }
            }
        }
    }
    result.add_info(format!("{} links checked", result.checked));
    result
}

fn dependency_order(index: &BundleIndex<'_>) -> CheckResult {
    let mut result = CheckResult::new(
        "Dependency order",
        "referenced resources come before the resources that use them",
        true,
    );
    let last_of = |types: &[&str]| {
        types
            .iter()
            .filter_map(|t| index.positions(t).last().map(|&p| (p, t.to_string())))
            .max()
    };
    let first_of = |types: &[&str]| {
        types
            .iter()
            .filter_map(|t| index.positions(t).first().map(|&p| (p, t.to_string())))
            .min()
    };

    let clinical: Vec<&str> = index
        .types()
        .filter(|t| !NON_CLINICAL_TYPES.contains(t))
        .collect();
    let mut rules: Vec<(&[&str], &[&str])> = ORDERING_RULES.to_vec();
    rules.push((&["Patient"], &clinical));

    for (earlier, later) in rules {
        let (Some((last, before)), Some((first, after))) = (last_of(earlier), first_of(later))
        else {
            continue;
        };
        result.tally(last < first);
        if last > first {
            result.add_issue(format!(
                "{before} at entry {last} comes after {after} at entry {first}"
            ));
        }
    }
    result
}

fn vendor_metadata(index: &BundleIndex<'_>) -> CheckResult {
    let mut result = CheckResult::new(
        "Vendor metadata",
        "resources carry the practice extension and meta source",
        false,
    );
    for resource in index.resources() {
        let has_extension = resource
            .get("extension")
            .and_then(Value::as_array)
            .is_some_and(|exts| {
                exts.iter()
                    .any(|e| e.get("url").and_then(Value::as_str) == Some(PRACTICE_EXTENSION_URL))
            });
        let has_meta = resource
            .get("meta")
            .and_then(|m| m.get("source"))
            .and_then(Value::as_str)
            == Some(META_SOURCE);
        result.tally(has_extension && has_meta);
        if !has_extension || !has_meta {
            result.add_info(format!("{} lacks vendor metadata", label(resource)));
        }
    }

    if result.checked > 0 {
        let coverage = result.valid as f64 / result.checked as f64;
        if result.valid == 0 {
            result.add_issue("no resource carries vendor metadata");
        } else if coverage < VENDOR_COVERAGE_THRESHOLD {
            result.add_warning(format!(
                "only {} of {} resources carry vendor metadata",
                result.valid, result.checked
            ));
        }
    }
    result
}

fn reference_format(index: &BundleIndex<'_>) -> CheckResult {
    let mut result = CheckResult::new(
        "Reference format",
        "reference fields are objects with a reference string",
        false,
    );
    for resource in index.resources() {
        for field in REFERENCE_FIELDS {
            for value in values_at(resource, &[field]) {
                let ok = value.get("reference").is_some_and(Value::is_string)
                    || (value.is_object() && value.get("reference").is_none());
                result.tally(ok);
                if !ok {
                    result.add_issue(format!("{}.{field} is not a reference object", label(resource)));
                } else if value.get("reference").is_none() {
                    result.add_warning(format!("{}.{field} has no reference", label(resource)));
                }
            }
        }
    }
    result
}

fn general_practitioner(index: &BundleIndex<'_>) -> CheckResult {
    let mut result = CheckResult::new(
        "Patient general practitioner",
        "the Patient names a Practitioner as general practitioner",
        true,
    );
    for patient in index.of_type("Patient") {
        let linked = values_at(patient, &["generalPractitioner"])
            .into_iter()
            .filter_map(|gp| gp.get("reference").and_then(Value::as_str))
            .any(|r| matches!(Reference::parse(r), Reference::Typed { resource_type: "Practitioner", .. }));
        result.tally(linked);
        if !linked {
            result.add_issue(format!("{} has no general practitioner", label(patient)));
        }
    }
    result
}

fn empty_encounters(index: &BundleIndex<'_>) -> CheckResult {
    let mut result = CheckResult::new(
        "Empty encounters",
        "every encounter has something linked to it",
        false,
    );
    let mut linked: HashSet<&str> = HashSet::new();
    for resource in index.resources() {
        for (path, expected) in TRACKED_LINKS {
            if *expected != "Encounter" {
                continue;
            }
            for link in values_at(resource, path) {
                if let Some(Reference::Typed { token, .. }) = link
                    .get("reference")
                    .and_then(Value::as_str)
                    .map(Reference::parse)
                {
                    linked.insert(token);
                }
            }
        }
    }

    for encounter in index.of_type("Encounter") {
        let used = id_of(encounter).is_some_and(|id| linked.contains(id));
        result.tally(used);
        if !used {
            result.add_warning(format!("{} has nothing linked to it", label(encounter)));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle(resources: Vec<Value>) -> Value {
        let entry: Vec<Value> = resources.into_iter().map(|r| json!({"resource": r})).collect();
        json!({"resourceType": "Bundle", "type": "transaction", "entry": entry})
    }

    fn run(check: Check, resources: Vec<Value>) -> CheckResult {
        let bundle = bundle(resources);
        check(&BundleIndex::new(&bundle))
    }

    #[test]
    fn structure_reports_every_problem() {
        let broken = json!({"resourceType": "Patient", "entry": {}});
        let result = bundle_structure(&BundleIndex::new(&broken));
        assert!(!result.passed);
        assert_eq!(result.issues.len(), 3);

        let not_object = json!([]);
        assert!(!bundle_structure(&BundleIndex::new(&not_object)).passed);
    }

    #[test]
    fn inventory_requires_patient() {
        let result = run(resource_inventory, vec![json!({"resourceType": "Encounter", "id": "t1"})]);
        assert!(!result.passed);
        assert!(result.info.contains(&"Encounter: 1".to_string()));
    }

    #[test]
    fn duplicate_ids_across_types_are_caught() {
        let result = run(
            duplicate_identifiers,
            vec![
                json!({"resourceType": "Patient", "id": "t1"}),
                json!({"resourceType": "Encounter", "id": "t1"}),
            ],
        );
        assert_eq!(result.issues, vec!["id t1 used by Patient/t1 and Encounter/t1"]);
    }

    #[test]
    fn medication_keeps_its_generator_id() {
        let result = run(
            leftover_identities,
            vec![
                json!({"resourceType": "Medication", "id": "7a1d3c2e-1b4f-4a8e-9c6d-5e2f1a0b9c8d"}),
                json!({"resourceType": "Encounter", "id": "t1"}),
            ],
        );
        assert!(result.passed);
        assert_eq!(result.checked, 1);
    }

    #[test]
    fn generator_identifiers_are_rejected() {
        let result = run(
            identifier_hygiene,
            vec![json!({
                "resourceType": "Patient",
                "id": "t1",
                "identifier": [
                    {"system": "https://github.com/synthetichealth/synthea", "value": "x"},
                    {"system": "urn:other", "value": "7a1d3c2e-1b4f-4a8e-9c6d-5e2f1a0b9c8d"},
                    {"system": "https://www.thetarho.com/fhir/identifiers/athena", "value": "a-1.patient-t1"}
                ]
            })],
        );
        assert_eq!(result.issues.len(), 2);
    }

    #[test]
    fn patient_needs_both_leading_identifiers() {
        let result = run(
            primary_reference_placement,
            vec![json!({
                "resourceType": "Patient",
                "id": "t1",
                "identifier": [{"system": VENDOR_IDENTIFIER_SYSTEM, "value": "a-1.patient-t1"}]
            })],
        );
        assert!(!result.passed);
        assert!(!result.critical);
        assert_eq!(result.issues.len(), 1);
    }

    #[test]
    fn dangling_links_are_named() {
        let result = run(
            dangling_references,
            vec![
                json!({"resourceType": "Encounter", "id": "t2"}),
                json!({"resourceType": "Condition", "id": "t3", "encounter": {"reference": "Encounter/t2"}}),
                json!({"resourceType": "Observation", "id": "t4", "encounter": {"reference": "Encounter/t9"}}),
                json!({"resourceType": "MedicationRequest", "id": "t5", "medicationReference": {"reference": "Encounter/t2"}}),
                json!({"resourceType": "DocumentReference", "id": "t6", "context": {"encounter": [{"reference": "urn:uuid:abc"}]}}),
            ],
        );
        assert_eq!(result.checked, 4);
        assert_eq!(result.valid, 1);
        assert!(result.issues[0].starts_with("Observation/t4.encounter: Encounter/t9 has no target"));
        assert!(result.issues[1].contains("expected Medication"));
        assert!(result.issues[2].contains("never rewritten"));
    }

    #[test]
    fn claim_item_encounters_are_resolved() {
        let result = run(
            dangling_references,
            vec![
                json!({"resourceType": "Encounter", "id": "t2"}),
                json!({"resourceType": "Claim", "id": "t3", "item": [
                    {"sequence": 1, "encounter": [{"reference": "Encounter/t2"}]},
                    {"sequence": 2, "encounter": [{"reference": "Encounter/t999"}]}
                ]}),
            ],
        );
        assert_eq!(result.checked, 2);
        assert_eq!(result.valid, 1);
        assert!(result.issues[0].starts_with("Claim/t3.item.encounter: Encounter/t999 has no target"));
    }

    #[test]
    fn encounter_linked_only_by_a_benefit_item_is_not_empty() {
        let result = run(
            empty_encounters,
            vec![
                json!({"resourceType": "Encounter", "id": "t2"}),
                json!({"resourceType": "ExplanationOfBenefit", "id": "t3", "item": [
                    {"sequence": 1, "encounter": [{"reference": "Encounter/t2"}]}
                ]}),
            ],
        );
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
        assert_eq!(result.valid, 1);
    }

    #[test]
    fn medication_must_precede_requests() {
        let result = run(
            dependency_order,
            vec![
                json!({"resourceType": "Patient", "id": "t1"}),
                json!({"resourceType": "MedicationRequest", "id": "t2"}),
                json!({"resourceType": "Medication", "id": "m"}),
            ],
        );
        assert_eq!(
            result.issues,
            vec!["Medication at entry 2 comes after MedicationRequest at entry 1"]
        );
    }

    #[test]
    fn patient_must_precede_clinical_resources() {
        let result = run(
            dependency_order,
            vec![
                json!({"resourceType": "Condition", "id": "t2"}),
                json!({"resourceType": "Patient", "id": "t1"}),
                json!({"resourceType": "Organization", "id": "t3"}),
            ],
        );
        assert_eq!(result.issues.len(), 1);
        assert!(result.issues[0].starts_with("Patient at entry 1"));
    }

    #[test]
    fn sparse_vendor_metadata_warns() {
        let annotated = json!({
            "resourceType": "Patient",
            "id": "t1",
            "extension": [{"url": PRACTICE_EXTENSION_URL}],
            "meta": {"source": META_SOURCE}
        });
        let bare = json!({"resourceType": "Encounter", "id": "t2"});
        let result = run(
            vendor_metadata,
            vec![annotated, bare.clone(), bare.clone()],
        );
        assert!(result.passed);
        assert_eq!(result.warnings.len(), 1);
        assert!(!run(vendor_metadata, vec![bare]).passed);
    }

    #[test]
    fn string_references_are_malformed() {
        let result = run(
            reference_format,
            vec![json!({"resourceType": "Condition", "id": "t1", "subject": "Patient/t0", "encounter": {"display": "visit"}})],
        );
        assert_eq!(result.issues, vec!["Condition/t1.subject is not a reference object"]);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn general_practitioner_must_be_a_practitioner() {
        let without = run(
            general_practitioner,
            vec![json!({"resourceType": "Patient", "id": "t1", "generalPractitioner": [{"reference": "Organization/t2"}]})],
        );
        assert!(!without.passed);

        let with = run(
            general_practitioner,
            vec![json!({"resourceType": "Patient", "id": "t1", "generalPractitioner": [{"reference": "Practitioner/t2"}]})],
        );
        assert!(with.passed);
    }

    #[test]
    fn unused_encounter_warns() {
        let result = run(
            empty_encounters,
            vec![
                json!({"resourceType": "Encounter", "id": "t1"}),
                json!({"resourceType": "Encounter", "id": "t2"}),
                json!({"resourceType": "Condition", "id": "t3", "encounter": {"reference": "Encounter/t1"}}),
            ],
        );
        assert!(result.passed);
        assert_eq!(result.warnings, vec!["Encounter/t2 has nothing linked to it"]);
    }
}
