use fhir::ReferenceTypePolicy;
use mockpt_core::validator::{load_bundle, validate, EXIT_FAILED, EXIT_PASSED};
use mockpt_core::{convert, ConvertRequest, CoreConfig};
use mockpt_ids::{find_original_identities, RangeTable};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

const PATIENT: &str = "0a1b2c3d-0000-4000-8000-000000000001";
const ENCOUNTER: &str = "0a1b2c3d-0000-4000-8000-000000000002";
const CONDITION: &str = "0a1b2c3d-0000-4000-8000-000000000003";
const MEDICATION: &str = "0a1b2c3d-0000-4000-8000-000000000004";
const REQUEST: &str = "0a1b2c3d-0000-4000-8000-000000000005";
const ORGANIZATION: &str = "0a1b2c3d-0000-4000-8000-000000000006";
const PRACTITIONER: &str = "0a1b2c3d-0000-4000-8000-000000000007";
const QUESTIONNAIRE: &str = "0a1b2c3d-0000-4000-8000-000000000008";

const SYNTHEA: &str = "https://github.com/synthetichealth/synthea";

fn entry(resource: Value) -> Value {
    let resource_type = resource["resourceType"].as_str().expect("type").to_string();
    let id = resource["id"].as_str().expect("id").to_string();
    json!({
        "fullUrl": format!("urn:uuid:{id}"),
        "resource": resource,
        "request": {"method": "POST", "url": resource_type}
    })
}

fn patient_bundle(extra: Vec<Value>) -> Value {
    let mut entries = vec![
        entry(json!({
            "resourceType": "Patient",
            "id": PATIENT,
            "identifier": [{"system": SYNTHEA, "value": PATIENT}],
            "name": [{"given": ["Jane"], "family": "Doe"}]
        })),
        entry(json!({
            "resourceType": "Encounter",
            "id": ENCOUNTER,
            "identifier": [{"system": SYNTHEA, "value": ENCOUNTER}],
            "period": {"start": "2024-03-01T10:00:00-05:00"},
            "subject": {"reference": format!("urn:uuid:{PATIENT}")},
            "serviceProvider": {"reference": format!("Organization?identifier={SYNTHEA}|{ORGANIZATION}")}
        })),
        entry(json!({
            "resourceType": "Condition",
            "id": CONDITION,
            "subject": {"reference": format!("urn:uuid:{PATIENT}")},
            "encounter": {"reference": format!("urn:uuid:{ENCOUNTER}")}
        })),
        entry(json!({
            "resourceType": "MedicationRequest",
            "id": REQUEST,
            "subject": {"reference": format!("urn:uuid:{PATIENT}")},
            "encounter": {"reference": format!("urn:uuid:{ENCOUNTER}")},
            "medicationReference": {"reference": format!("urn:uuid:{MEDICATION}")}
        })),
        entry(json!({"resourceType": "Medication", "id": MEDICATION})),
    ];
    entries.extend(extra);
    json!({"resourceType": "Bundle", "type": "transaction", "entry": entries})
}

fn practitioner_bundle() -> Value {
    json!({
        "resourceType": "Bundle",
        "type": "batch",
        "entry": [
            {
                "resource": {
                    "resourceType": "Organization",
                    "id": ORGANIZATION,
                    "identifier": [{"system": SYNTHEA, "value": ORGANIZATION}],
                    "name": "Valley Clinic"
                },
                "request": {"method": "PUT", "url": format!("Organization/{ORGANIZATION}")}
            },
            {
                "resource": {"resourceType": "Practitioner", "id": PRACTITIONER},
                "request": {"method": "PUT", "url": format!("Practitioner/{PRACTITIONER}")}
            }
        ]
    })
}

fn write_json(path: &Path, value: &Value) {
    fs::write(path, serde_json::to_string_pretty(value).expect("json")).expect("write");
}

fn run_convert(dir: &Path, bundle: Value) -> (mockpt_core::ConvertSummary, PathBuf) {
    let fhir_dir = dir.join("fhir");
    fs::create_dir_all(&fhir_dir).expect("fhir dir");
    let input = fhir_dir.join("Jane_Doe.json");
    write_json(&input, &bundle);
    write_json(&fhir_dir.join("practitionerInformation1.json"), &practitioner_bundle());

    let config = CoreConfig::new("a-16349", RangeTable::default(), ReferenceTypePolicy::default())
        .expect("config");
    let request = ConvertRequest {
        input,
        output: dir.join("out").join("patient.json"),
        patient_number: 1_000_001,
        virtual_dates: Vec::new(),
    };
    let summary = convert(&config, &request).expect("convert");
    let path = summary.bundle_path.clone();
    (summary, path)
}

#[test]
fn converted_bundle_passes_validation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (summary, path) = run_convert(dir.path(), patient_bundle(Vec::new()));

    assert_eq!(summary.patient_id, "t1000001");
    assert!(summary.unconfigured.is_empty());
    assert_eq!(summary.shared_bundles.len(), 2);

    let rendered = fs::read_to_string(&path).expect("bundle");
    assert!(find_original_identities(&rendered).is_empty());

    let bundle = load_bundle(&path).expect("load");
    let report = validate(&bundle);
    for result in report.results.iter().filter(|r| r.critical) {
        assert!(result.passed, "{} failed: {:?}", result.name, result.issues);
    }
    assert_eq!(report.exit_code(), EXIT_PASSED);
    assert_eq!(report.resource_counts.get("Patient"), Some(&1));
    assert!(report.resource_counts.get("Organization").is_none());

    let dangling = report.result("Dangling references").expect("dangling check");
    assert_eq!(dangling.checked, 3);
    assert_eq!(dangling.valid, 3);
}

#[test]
fn unconfigured_type_is_reported_and_fails_validation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let questionnaire = entry(json!({"resourceType": "Questionnaire", "id": QUESTIONNAIRE}));
    let (summary, path) = run_convert(dir.path(), patient_bundle(vec![questionnaire]));

    assert_eq!(
        summary.unconfigured,
        vec![("Questionnaire".to_string(), QUESTIONNAIRE.to_string())]
    );

    let report = validate(&load_bundle(&path).expect("load"));
    let leftover = report
        .result("Leftover original identities")
        .expect("leftover check");
    assert!(!leftover.passed);
    assert!(leftover.issues[0].contains(&format!("Questionnaire/{QUESTIONNAIRE}")));
    assert_eq!(report.exit_code(), EXIT_FAILED);
}
