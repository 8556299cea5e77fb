//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup (environment, `.env`, CLI flags) and then
//! passed into the conversion and add-on flows. Nothing below `main` reads the environment.

use crate::constants::PRACTICE_ID_PREFIX;
use crate::validation::normalise_practice_id;
use crate::{CoreError, CoreResult};
use fhir::ReferenceTypePolicy;
use mockpt_ids::RangeTable;
use serde::Deserialize;
use std::path::Path;

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    practice_id: String,
    ranges: RangeTable,
    reference_policy: ReferenceTypePolicy,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// The practice id may be given with or without its `a-` prefix.
    pub fn new(
        practice_id: &str,
        ranges: RangeTable,
        reference_policy: ReferenceTypePolicy,
    ) -> CoreResult<Self> {
        let practice_id = normalise_practice_id(practice_id)?;
        ranges.validate()?;

        Ok(Self {
            practice_id,
            ranges,
            reference_policy,
        })
    }

    /// Qualified practice id, for example `a-16349`.
    pub fn practice_id(&self) -> &str {
        &self.practice_id
    }

    /// Practice number without its prefix, for example `16349`.
    pub fn practice_number(&self) -> &str {
        self.practice_id
            .strip_prefix(PRACTICE_ID_PREFIX)
            .unwrap_or(&self.practice_id)
    }

    pub fn ranges(&self) -> &RangeTable {
        &self.ranges
    }

    pub fn reference_policy(&self) -> ReferenceTypePolicy {
        self.reference_policy
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RangeFile {
    #[serde(default)]
    ranges: Option<RangeTable>,
}

/// Parses a range override document and applies it over the default table.
///
/// ```yaml
/// ranges:
///   Encounter: { lo: 10100000, hi: 19999999, prefix: t }
/// ```
pub fn parse_id_ranges(yaml: &str) -> CoreResult<RangeTable> {
    let file: RangeFile = serde_yaml::from_str(yaml).map_err(CoreError::YamlDeserialization)?;
    let table = match file.ranges {
        Some(overrides) => RangeTable::default().with_overrides(overrides)?,
        None => RangeTable::default(),
    };
    Ok(table)
}

/// Resolve the identifier range table.
///
/// Without an override file the default table is used.
pub fn load_id_ranges(override_file: Option<&Path>) -> CoreResult<RangeTable> {
    let Some(path) = override_file else {
        return Ok(RangeTable::default());
    };

    let contents = std::fs::read_to_string(path).map_err(|source| CoreError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let table = parse_id_ranges(&contents)?;
    tracing::info!("loaded identifier ranges from {}", path.display());
    Ok(table)
}

/// Parse the reference type policy from a CLI/env value (`stated` or `mapped`).
pub fn reference_policy_from_value(value: Option<&str>) -> CoreResult<ReferenceTypePolicy> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None | Some("stated") => Ok(ReferenceTypePolicy::StatedType),
        Some("mapped") => Ok(ReferenceTypePolicy::MappedType),
        Some(other) => Err(CoreError::InvalidInput(format!(
            "unknown reference type policy '{other}', expected 'stated' or 'mapped'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn config_normalises_practice() {
        let config = CoreConfig::new("11783", RangeTable::default(), ReferenceTypePolicy::default())
            .expect("config");
        assert_eq!(config.practice_id(), "a-11783");
        assert_eq!(config.practice_number(), "11783");
    }

    #[test]
    fn overrides_replace_single_types() {
        let table = parse_id_ranges("ranges:\n  Encounter: { lo: 1, hi: 9, prefix: e }\n")
            .expect("ranges");
        let encounter = table.get("Encounter").expect("encounter range");
        assert_eq!((encounter.lo(), encounter.hi(), encounter.prefix()), (1, 9, "e"));
        assert_eq!(table.get("Patient"), RangeTable::default().get("Patient"));
    }

    #[test]
    fn overlapping_override_is_rejected() {
        let err = parse_id_ranges("ranges:\n  Encounter: { lo: 40000000, hi: 40000010 }\n")
            .expect_err("overlaps Observation");
        assert!(matches!(err, CoreError::Ids(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = parse_id_ranges("range: {}\n").expect_err("typo");
        assert!(matches!(err, CoreError::YamlDeserialization(_)));
    }

    #[test]
    fn ranges_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "ranges:\n  Claim: {{ lo: 5, hi: 6 }}").expect("write");
        let table = load_id_ranges(Some(file.path())).expect("load");
        assert_eq!(table.get("Claim").map(|r| r.lo()), Some(5));
        assert_eq!(load_id_ranges(None).expect("default"), RangeTable::default());
    }

    #[test]
    fn reference_policy_values() {
        assert_eq!(
            reference_policy_from_value(None).expect("default"),
            ReferenceTypePolicy::StatedType
        );
        assert_eq!(
            reference_policy_from_value(Some("mapped")).expect("mapped"),
            ReferenceTypePolicy::MappedType
        );
        assert!(reference_policy_from_value(Some("other")).is_err());
    }
}
