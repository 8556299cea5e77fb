//! Bundle conversion: remap identities, annotate for the vendor, and lay out upload-ready files.

use crate::config::CoreConfig;
use crate::constants::{
    ADDITIONAL_BUNDLE_PATTERNS, BUNDLES_DIR_NAME, CCDA_DIR_NAME, MOCK_PATIENTS_DIR_NAME,
};
use crate::{CoreError, CoreResult};
use fhir::organise::{
    fill_service_provider_display, link_general_practitioner, mark_virtual_encounters,
    sort_by_dependency_order, split_shared_resources,
};
use fhir::vendor::DEFAULT_PRACTICE_ORG_ID;
use fhir::{annotate_bundle, build_mapping, rewrite_resource_ids, Bundle, ReferenceRewriter, VendorContext};
use mockpt_ids::{IdAllocator, IdentityMapping};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// One conversion run.
#[derive(Clone, Debug)]
pub struct ConvertRequest {
    /// Generated patient bundle.
    pub input: PathBuf,
    /// Where a copy of the converted patient bundle is written.
    pub output: PathBuf,
    /// Number the subject's identifier is built from (`t{number}`).
    pub patient_number: u64,
    /// Encounter start dates (`YYYY-MM-DD`) to mark as virtual.
    pub virtual_dates: Vec<String>,
}

/// Outcome of the CCDA twin update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentSummary {
    pub path: PathBuf,
    pub tokens_replaced: usize,
    pub occurrences: usize,
}

/// Counts and paths produced by [`convert`].
#[derive(Clone, Debug, Default)]
pub struct ConvertSummary {
    pub patient_id: String,
    pub merged_entries: usize,
    pub mapped: usize,
    pub already_assigned: usize,
    /// `(type, id)` of entities left untouched because their type has no range.
    pub unconfigured: Vec<(String, String)>,
    pub ids_rewritten: usize,
    pub references_updated: usize,
    pub conditional_references: usize,
    pub annotated: usize,
    pub virtual_encounters: usize,
    pub document: Option<DocumentSummary>,
    pub shared_bundles: Vec<PathBuf>,
    pub bundle_path: PathBuf,
    pub resource_counts: BTreeMap<String, usize>,
}

fn read_text(path: &Path) -> CoreResult<String> {
    fs::read_to_string(path).map_err(|source| CoreError::FileRead {
        path: path.to_path_buf(),
        source,
    })
}

fn write_text(path: &Path, contents: &str) -> CoreResult<()> {
    fs::write(path, contents).map_err(|source| CoreError::FileWrite {
        path: path.to_path_buf(),
        source,
    })
}

fn create_dir(path: &Path) -> CoreResult<()> {
    fs::create_dir_all(path).map_err(|source| CoreError::DirCreation {
        path: path.to_path_buf(),
        source,
    })
}

/// Merges practitioner and hospital bundles that sit next to `input`.
///
/// Returns the number of entries added.
pub fn merge_additional_bundles(bundle: &mut Bundle, input: &Path) -> CoreResult<usize> {
    let dir = input.parent().unwrap_or_else(|| Path::new("."));
    let mut merged = 0;

    for pattern in ADDITIONAL_BUNDLE_PATTERNS {
        let full = dir.join(pattern);
        let mut paths: Vec<PathBuf> = glob::glob(&full.to_string_lossy())?
            .filter_map(Result::ok)
            .filter(|path| path.as_path() != input)
            .collect();
        paths.sort();

        for path in paths {
            let extra = Bundle::parse(&read_text(&path)?)?;
            let added = bundle.merge(extra);
            tracing::info!("merged {added} entries from {}", path.display());
            merged += added;
        }
    }
    Ok(merged)
}

/// Path of the CCDA document generated alongside `input`: `<input dir>/../ccda/<stem>.xml`.
pub fn ccda_twin_path(input: &Path) -> Option<PathBuf> {
    let stem = input.file_stem()?;
    let dir = input.parent()?;
    let base = dir.parent().unwrap_or_else(|| Path::new(".."));
    let mut name = stem.to_os_string();
    name.push(".xml");
    Some(base.join(CCDA_DIR_NAME).join(name))
}

/// Applies the run's mapping to the CCDA twin and writes it next to the patient bundle.
fn convert_document(
    input: &Path,
    mapping: &IdentityMapping,
    patient_id: &str,
    bundles_dir: &Path,
) -> CoreResult<Option<DocumentSummary>> {
    let Some(twin) = ccda_twin_path(input).filter(|path| path.is_file()) else {
        tracing::warn!(
            "no CCDA document found for {}, skipping document update",
            input.display()
        );
        return Ok(None);
    };

    let xml = read_text(&twin)?;
    let edit = ccda::insert_patient_identifier(&xml, patient_id)?;
    let substitution = ccda::apply_to_tree(&edit.xml, mapping);

    let path = bundles_dir.join(format!("{patient_id}_ccda.xml"));
    write_text(&path, &ccda::ensure_declaration(&substitution.xml))?;
    tracing::info!("wrote updated CCDA document to {}", path.display());

    Ok(Some(DocumentSummary {
        path,
        tokens_replaced: substitution.tokens_replaced,
        occurrences: substitution.occurrences,
    }))
}

/// Converts a generated bundle into the vendor's shape.
///
/// Output lands in `<output dir>/mock_patients/`: the patient bundle and shared-resource bundles
/// under `bundles/`, plus an empty per-patient directory. A copy of the patient bundle is also
/// written to `request.output`.
///
/// # Errors
///
/// Fails on unreadable or malformed input, range exhaustion, or file-system errors. Entities of
/// unconfigured types and missing CCDA documents are reported, not fatal.
pub fn convert(config: &CoreConfig, request: &ConvertRequest) -> CoreResult<ConvertSummary> {
    let mut bundle = Bundle::parse(&read_text(&request.input)?)?;
    tracing::info!(
        "loaded {} entries from {}",
        bundle.entry.len(),
        request.input.display()
    );

    let mut summary = ConvertSummary {
        merged_entries: merge_additional_bundles(&mut bundle, &request.input)?,
        ..ConvertSummary::default()
    };

    // Identities
    let mut allocator = IdAllocator::new(config.ranges().clone());
    let report = build_mapping(&bundle, &mut allocator, Some(request.patient_number))?;
    summary.patient_id = format!(
        "{}{}",
        config.ranges().prefix_for(mockpt_ids::SUBJECT_RESOURCE_TYPE),
        request.patient_number
    );
    summary.mapped = report.mapping.primary_count();
    summary.already_assigned = report.already_assigned;
    summary.unconfigured = report.unconfigured.clone();

    summary.ids_rewritten = rewrite_resource_ids(&mut bundle, &report.mapping);
    let stats = ReferenceRewriter::new(&report.mapping)
        .with_policy(config.reference_policy())
        .rewrite_bundle(&mut bundle);
    summary.references_updated = stats.updated;
    summary.conditional_references = stats.conditional;

    // Vendor annotations
    let context = VendorContext {
        practice_id: config.practice_id().to_string(),
        practice_org_id: bundle
            .first_id_of_type("Organization")
            .unwrap_or(DEFAULT_PRACTICE_ORG_ID)
            .to_string(),
    };
    summary.annotated = annotate_bundle(&mut bundle, &context).resources;
    summary.virtual_encounters = mark_virtual_encounters(&mut bundle, &request.virtual_dates);
    fill_service_provider_display(&mut bundle);
    link_general_practitioner(&mut bundle);

    // Output layout
    let output_dir = request
        .output
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mock_patients_dir = output_dir.join(MOCK_PATIENTS_DIR_NAME);
    let bundles_dir = mock_patients_dir.join(BUNDLES_DIR_NAME);
    create_dir(&bundles_dir)?;
    create_dir(&mock_patients_dir.join(&summary.patient_id))?;

    summary.document = convert_document(
        &request.input,
        &report.mapping,
        &summary.patient_id,
        &bundles_dir,
    )?;

    for (resource_type, shared) in split_shared_resources(&mut bundle) {
        let path = bundles_dir.join(format!("{resource_type}.json"));
        write_text(&path, &shared.render()?)?;
        summary.shared_bundles.push(path);
    }

    sort_by_dependency_order(&mut bundle);
    summary.resource_counts = bundle.count_by_type();

    let rendered = bundle.render()?;
    summary.bundle_path = bundles_dir.join(format!("{}_bundle.json", summary.patient_id));
    write_text(&summary.bundle_path, &rendered)?;
    if request.output != summary.bundle_path {
        write_text(&request.output, &rendered)?;
    }

    tracing::info!(
        "converted {} into {} ({} resources)",
        request.input.display(),
        summary.bundle_path.display(),
        bundle.entry.len()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhir::ReferenceTypePolicy;
    use mockpt_ids::RangeTable;
    use serde_json::{json, Value};

    const PATIENT: &str = "aaaaaaaa-0000-4000-8000-000000000001";
    const ENCOUNTER: &str = "bbbbbbbb-0000-4000-8000-000000000002";
    const ORGANIZATION: &str = "cccccccc-0000-4000-8000-000000000003";

    fn config() -> CoreConfig {
        CoreConfig::new("16349", RangeTable::default(), ReferenceTypePolicy::default())
            .expect("config")
    }

    fn write_json(path: &Path, value: &Value) {
        fs::write(path, serde_json::to_string_pretty(value).expect("json")).expect("write");
    }

    fn generated_bundle() -> Value {
        json!({
            "resourceType": "Bundle",
            "type": "transaction",
            "entry": [
                {
                    "fullUrl": format!("urn:uuid:{ENCOUNTER}"),
                    "resource": {
                        "resourceType": "Encounter",
                        "id": ENCOUNTER,
                        "class": {"code": "AMB"},
                        "period": {"start": "2024-01-15T09:00:00-05:00"},
                        "subject": {"reference": format!("urn:uuid:{PATIENT}")},
                        "serviceProvider": {"reference": format!("Organization?identifier=https://github.com/synthetichealth/synthea|{ORGANIZATION}")}
                    },
                    "request": {"method": "POST", "url": "Encounter"}
                },
                {
                    "fullUrl": format!("urn:uuid:{PATIENT}"),
                    "resource": {"resourceType": "Patient", "id": PATIENT},
                    "request": {"method": "POST", "url": "Patient"}
                }
            ]
        })
    }

    fn hospital_bundle() -> Value {
        json!({
            "resourceType": "Bundle",
            "type": "batch",
            "entry": [{
                "resource": {"resourceType": "Organization", "id": ORGANIZATION, "name": "Valley Clinic"},
                "request": {"method": "PUT", "url": format!("Organization/{ORGANIZATION}")}
            }]
        })
    }

    #[test]
    fn twin_path_is_sibling_ccda_directory() {
        let twin = ccda_twin_path(Path::new("/out/fhir/Jane_Doe.json")).expect("twin");
        assert_eq!(twin, PathBuf::from("/out/ccda/Jane_Doe.xml"));
    }

    #[test]
    fn convert_writes_upload_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fhir_dir = dir.path().join("fhir");
        let ccda_dir = dir.path().join("ccda");
        fs::create_dir_all(&fhir_dir).expect("fhir dir");
        fs::create_dir_all(&ccda_dir).expect("ccda dir");

        let input = fhir_dir.join("Jane_Doe.json");
        write_json(&input, &generated_bundle());
        write_json(&fhir_dir.join("hospitalInformation1.json"), &hospital_bundle());
        fs::write(
            ccda_dir.join("Jane_Doe.xml"),
            format!(
                "<ClinicalDocument><recordTarget><patientRole><id root=\"{PATIENT}\"/></patientRole></recordTarget><component><entry><id root=\"{ENCOUNTER}\"/></entry></component></ClinicalDocument>"
            ),
        )
        .expect("ccda");

        let output_dir = dir.path().join("converted");
        fs::create_dir_all(&output_dir).expect("output dir");
        let request = ConvertRequest {
            input,
            output: output_dir.join("athena.json"),
            patient_number: 1210,
            virtual_dates: vec!["2024-01-15".into()],
        };
        let summary = convert(&config(), &request).expect("convert");

        assert_eq!(summary.patient_id, "t1210");
        assert_eq!(summary.merged_entries, 1);
        assert!(summary.unconfigured.is_empty());
        assert_eq!(summary.virtual_encounters, 1);
        assert_eq!(
            summary.bundle_path,
            output_dir.join("mock_patients/bundles/t1210_bundle.json")
        );
        assert!(output_dir.join("mock_patients/t1210").is_dir());
        assert!(request.output.is_file());

        let written: Value =
            serde_json::from_str(&fs::read_to_string(&summary.bundle_path).expect("read"))
                .expect("json");
        let entries = written["entry"].as_array().expect("entries");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["resource"]["resourceType"], "Patient");
        assert_eq!(entries[0]["resource"]["id"], "t1210");
        assert_eq!(entries[0]["request"]["url"], "Patient/t1210");

        let encounter = &entries[1]["resource"];
        assert_eq!(encounter["subject"]["reference"], "Patient/t1210");
        assert_eq!(encounter["class"]["code"], "VR");
        let provider = encounter["serviceProvider"]["reference"]
            .as_str()
            .expect("provider");
        assert!(provider.starts_with("Organization/t7"));
        assert_eq!(encounter["serviceProvider"]["display"], "Valley Clinic");

        let organizations = fs::read_to_string(output_dir.join("mock_patients/bundles/Organization.json"))
            .expect("organization bundle");
        assert!(organizations.contains("\"PUT\""));
        assert!(!organizations.contains(ORGANIZATION));

        let document = summary.document.expect("document");
        let xml = fs::read_to_string(&document.path).expect("xml");
        assert!(xml.starts_with("<?xml"));
        assert!(!xml.contains(PATIENT));
        assert!(!xml.contains(ENCOUNTER));
        assert!(xml.contains("extension=\"t1210\""));
    }

    #[test]
    fn missing_twin_is_not_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("bundle.json");
        write_json(&input, &generated_bundle());
        let request = ConvertRequest {
            input,
            output: dir.path().join("out.json"),
            patient_number: 7,
            virtual_dates: Vec::new(),
        };
        let summary = convert(&config(), &request).expect("convert");
        assert!(summary.document.is_none());
        assert_eq!(summary.resource_counts.get("Patient"), Some(&1));
    }

    #[test]
    fn malformed_input_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("bundle.json");
        fs::write(&input, "{\"resourceType\": \"Patient\"}").expect("write");
        let request = ConvertRequest {
            input,
            output: dir.path().join("out.json"),
            patient_number: 7,
            virtual_dates: Vec::new(),
        };
        let err = convert(&config(), &request).expect_err("not a bundle");
        assert!(matches!(err, CoreError::Fhir(_)));
    }
}
