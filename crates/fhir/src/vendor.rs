//! Vendor vocabulary: extension urls, identifier systems and record-type prefixes.

pub const PRACTICE_EXTENSION_URL: &str = "https://fhir.athena.io/StructureDefinition/ah-practice";
pub const CHART_SHARING_EXTENSION_URL: &str =
    "https://fhir.athena.io/StructureDefinition/ah-chart-sharing-group";
pub const VENDOR_ID_EXTENSION_URL: &str = "athenaId";

pub const META_SOURCE: &str = "https://www.thetarho.com/fhir";
pub const ACT_REASON_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v3-ActReason";
pub const TEST_DATA_CODE: &str = "HTEST";
pub const TEST_DATA_DISPLAY: &str = "test health data";

pub const VENDOR_IDENTIFIER_SYSTEM: &str = "https://www.thetarho.com/fhir/identifiers/athena";
pub const PATIENT_IDENTIFIER_SYSTEM: &str = "https://www.thetarho.com/fhir/identifiers/patient";

/// Identifier systems containing any of these are dropped during annotation.
pub const GENERATOR_SYSTEM_MARKERS: [&str; 3] = ["synthea", "smarthealthit", "thetarho.com"];

/// Default organization when the bundle has none.
pub const DEFAULT_PRACTICE_ORG_ID: &str = "800001";

const RECORD_TYPE_PREFIXES: &[(&str, &str)] = &[
    ("Patient", "E"),
    ("Encounter", "encounter"),
    ("Condition", "Problem"),
    ("Observation", "resultamb"),
    ("DiagnosticReport", "clinicalresult"),
    ("MedicationRequest", "medicationrequest"),
    ("Procedure", "shb.7126"),
    ("DocumentReference", "document"),
    ("Immunization", "immunization"),
    ("CarePlan", "careplan"),
    ("Goal", "goal"),
    ("AllergyIntolerance", "allergy"),
    ("Binary", "binary"),
    ("Media", "media"),
    ("ImagingStudy", "imagingstudy"),
    ("Claim", "claim"),
    ("ExplanationOfBenefit", "eob"),
    ("Provenance", "provenance"),
    ("Composition", "composition"),
    ("CareTeam", "careteam"),
    ("Medication", "medication"),
    ("MedicationAdministration", "medicationadministration"),
    ("MedicationStatement", "medicationstatement"),
    ("PractitionerRole", "practitionerrole"),
    ("Practitioner", "practitioner"),
    ("Organization", "organization"),
    ("Location", "location"),
];

/// Vendor record-type prefix for `resource_type`; `unknown` when the type is not listed.
pub fn record_type_prefix(resource_type: &str) -> &'static str {
    RECORD_TYPE_PREFIXES
        .iter()
        .find(|(t, _)| *t == resource_type)
        .map(|(_, prefix)| *prefix)
        .unwrap_or("unknown")
}

/// The vendor identifier value: `{practice}.{prefix}-{id}`.
pub fn vendor_identifier(practice_id: &str, resource_type: &str, id: &str) -> String {
    format!("{practice_id}.{}-{id}", record_type_prefix(resource_type))
}
