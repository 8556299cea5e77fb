//! Post-conversion checks on a patient bundle.
//!
//! The validator works on the raw JSON tree rather than the typed [`fhir::Bundle`] so a
//! structurally broken file still gets a report. Checks are independent: each one looks at the
//! indexed bundle and returns its own [`CheckResult`]; a failing check never stops the others.
//! The run fails only when a check marked critical fails.

mod checks;
mod report;

pub use checks::{CheckResult, CHECKS};
pub use report::render_markdown;

use crate::{CoreError, CoreResult};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// Every critical check passed.
pub const EXIT_PASSED: i32 = 0;
/// At least one critical check failed.
pub const EXIT_FAILED: i32 = 1;
/// The bundle could not be read or parsed.
pub const EXIT_UNREADABLE: i32 = 2;

/// Reads and parses a bundle file.
pub fn load_bundle(path: &Path) -> CoreResult<Value> {
    let contents = std::fs::read_to_string(path).map_err(|source| CoreError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(CoreError::Deserialization)
}

/// Resources of a bundle, indexed for the checks.
pub struct BundleIndex<'a> {
    pub(crate) root: &'a Value,
    resources: Vec<&'a Value>,
    by_type: BTreeMap<&'a str, Vec<usize>>,
    ids: HashMap<&'a str, HashSet<&'a str>>,
}

impl<'a> BundleIndex<'a> {
    pub fn new(root: &'a Value) -> Self {
        let resources: Vec<&Value> = root
            .get("entry")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(|e| e.get("resource")).collect())
            .unwrap_or_default();

        let mut by_type: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        let mut ids: HashMap<&str, HashSet<&str>> = HashMap::new();
        for (position, resource) in resources.iter().enumerate() {
            let Some(resource_type) = resource.get("resourceType").and_then(Value::as_str) else {
                continue;
            };
            by_type.entry(resource_type).or_default().push(position);
            if let Some(id) = resource.get("id").and_then(Value::as_str) {
                ids.entry(resource_type).or_default().insert(id);
            }
        }

        Self {
            root,
            resources,
            by_type,
            ids,
        }
    }

    /// Resources in bundle order.
    pub fn resources(&self) -> &[&'a Value] {
        &self.resources
    }

    pub fn of_type(&self, resource_type: &str) -> impl Iterator<Item = &'a Value> + '_ {
        self.by_type
            .get(resource_type)
            .into_iter()
            .flatten()
            .map(|&position| self.resources[position])
    }

    /// Bundle positions of the given type, in order.
    pub fn positions(&self, resource_type: &str) -> &[usize] {
        self.by_type
            .get(resource_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn has(&self, resource_type: &str, id: &str) -> bool {
        self.ids
            .get(resource_type)
            .is_some_and(|ids| ids.contains(id))
    }

    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.by_type
            .iter()
            .map(|(resource_type, positions)| (resource_type.to_string(), positions.len()))
            .collect()
    }

    pub fn types(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.by_type.keys().copied()
    }
}

/// Results of every check over one bundle.
#[derive(Clone, Debug)]
pub struct ValidationReport {
    pub results: Vec<CheckResult>,
    pub resource_counts: BTreeMap<String, usize>,
    pub total_resources: usize,
}

impl ValidationReport {
    /// True when no critical check failed.
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed || !r.critical)
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            EXIT_PASSED
        } else {
            EXIT_FAILED
        }
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.passed_count()
    }

    pub fn issue_count(&self) -> usize {
        self.results.iter().map(|r| r.issues.len()).sum()
    }

    pub fn warning_count(&self) -> usize {
        self.results.iter().map(|r| r.warnings.len()).sum()
    }

    pub fn result(&self, name: &str) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

/// Runs every check over a parsed bundle.
pub fn validate(bundle: &Value) -> ValidationReport {
    let index = BundleIndex::new(bundle);
    let results: Vec<CheckResult> = CHECKS.iter().map(|check| check(&index)).collect();

    for result in &results {
        if result.passed {
            tracing::debug!("{}: passed", result.name);
        } else {
            tracing::warn!("{}: {} issues", result.name, result.issues.len());
        }
    }

    ValidationReport {
        resource_counts: index.counts(),
        total_resources: index.resources().len(),
        results,
    }
}
