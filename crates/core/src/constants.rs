//! Constants used throughout the mockpt core crate.
//!
//! Directory layout, generator invocation and remote-server defaults live here so the convert
//! and add-on flows agree on them.

use std::time::Duration;

/// Practice used when none is configured.
pub const DEFAULT_PRACTICE_ID: &str = "a-16349";

/// Prefix that qualifies a bare practice number.
pub const PRACTICE_ID_PREFIX: &str = "a-";

/// Patient number used when the caller does not supply one.
pub const DEFAULT_PATIENT_NUMBER: u64 = 1_000_000;

/// Directory name for converted patient output.
pub const MOCK_PATIENTS_DIR_NAME: &str = "mock_patients";

/// Directory name for upload-ready bundles under [`MOCK_PATIENTS_DIR_NAME`].
pub const BUNDLES_DIR_NAME: &str = "bundles";

/// Directory holding the generated CCDA twin of a bundle, next to the bundle's own directory.
pub const CCDA_DIR_NAME: &str = "ccda";

/// Bundles in the input directory whose entries are merged into the patient bundle.
pub const ADDITIONAL_BUNDLE_PATTERNS: [&str; 2] =
    ["practitionerInformation*.json", "hospitalInformation*.json"];

/// Generator launcher, relative to the generator home.
pub const GENERATOR_SCRIPT: &str = "./run_synthea";

/// One patient aged 20 to 22 in the default region.
pub const GENERATOR_ARGS: [&str; 5] = ["-p", "1", "-a", "20-22", "Massachusetts"];

/// Where the generator writes CCDA documents, relative to its home.
pub const GENERATOR_OUTPUT_DIR: &str = "output/ccda";

/// Modules the generator loads on every run.
pub const GENERATOR_MODULES_DIR: &str = "src/main/resources/modules";

/// Modules kept out of normal runs.
pub const GENERATOR_CUSTOM_MODULES_DIR: &str = "src/main/resources/custom_modules";

/// Add-on module looked up in [`GENERATOR_CUSTOM_MODULES_DIR`].
pub const DEFAULT_ADDON_MODULE: &str = "ccda_addon.json";

/// Generator stdout and stderr, written in the generator home.
pub const GENERATOR_LOG_FILENAME: &str = "mockpt_generator.log";

/// Upper bound on one generator run.
pub const GENERATOR_TIMEOUT: Duration = Duration::from_secs(120);

/// How often the generator process is polled while waiting.
pub const GENERATOR_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Request timeout for the remote clinical-data server.
pub const REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Port and path appended to a bare server host name.
pub const DEFAULT_REMOTE_SUFFIX: &str = ":8080/fhir";

/// Practice name used when no organization can be found for the patient.
pub const UNKNOWN_PRACTICE: &str = "Unknown Practice";

/// Default add-on encounter date, in days before today.
pub const DEFAULT_ENCOUNTER_DAYS_AGO: i64 = 30;

/// Oldest allowed add-on encounter date, in days before today.
pub const MAX_ENCOUNTER_DAYS_AGO: i64 = 180;
