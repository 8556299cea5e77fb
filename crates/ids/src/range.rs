//! Per-entity-type identifier ranges.
//!
//! A range is static configuration: an inclusive numeric interval plus the alphabetic prefix
//! prepended to every identifier drawn from it. The default table covers every resource type the
//! generator emits; callers may override individual entries (for example from a YAML file).

use crate::{IdError, IdResult};
use std::collections::BTreeMap;

/// Prefix used when a type has no range of its own (for example a caller-supplied subject id).
pub const DEFAULT_PREFIX: &str = "t";

/// The top-level subject type. Its identifier is supplied by the caller rather than drawn.
pub const SUBJECT_RESOURCE_TYPE: &str = "Patient";

const DEFAULT_RANGES: &[(&str, u64, u64)] = &[
    ("Patient", 10_000_000, 10_000_000),
    ("Encounter", 10_100_000, 19_999_999),
    ("Condition", 20_000_000, 39_999_999),
    ("Observation", 40_000_000, 99_999_999),
    ("DiagnosticReport", 100_000_000, 119_999_999),
    ("MedicationRequest", 120_000_000, 139_999_999),
    ("Procedure", 140_000_000, 159_999_999),
    ("DocumentReference", 160_000_000, 179_999_999),
    ("Immunization", 180_000_000, 189_999_999),
    ("CarePlan", 190_000_000, 199_999_999),
    ("Goal", 200_000_000, 209_999_999),
    ("AllergyIntolerance", 210_000_000, 219_999_999),
    ("Binary", 220_000_000, 239_999_999),
    ("Media", 240_000_000, 249_999_999),
    ("ImagingStudy", 250_000_000, 259_999_999),
    ("Claim", 260_000_000, 279_999_999),
    ("ExplanationOfBenefit", 280_000_000, 299_999_999),
    ("Provenance", 300_000_000, 319_999_999),
    ("Composition", 320_000_000, 339_999_999),
    ("CareTeam", 340_000_000, 349_999_999),
    ("Medication", 350_000_000, 369_999_999),
    ("MedicationAdministration", 370_000_000, 389_999_999),
    ("MedicationStatement", 390_000_000, 409_999_999),
    ("Practitioner", 500_000_000, 599_999_999),
    ("PractitionerRole", 600_000_000, 699_999_999),
    ("Organization", 700_000_000, 799_999_999),
    ("Location", 800_000_000, 899_999_999),
];

#[cfg(feature = "serde")]
fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

/// An inclusive numeric interval `[lo, hi]` with an alphabetic prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(deny_unknown_fields))]
pub struct IdRange {
    lo: u64,
    hi: u64,
    #[cfg_attr(feature = "serde", serde(default = "default_prefix"))]
    prefix: String,
}

impl IdRange {
    /// Creates a validated range.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidInput`] if `lo > hi`, the range spans the whole `u64` domain,
    /// or the prefix is empty or not purely alphabetic.
    pub fn new(lo: u64, hi: u64, prefix: impl Into<String>) -> IdResult<Self> {
        let range = Self {
            lo,
            hi,
            prefix: prefix.into(),
        };
        range.check()?;
        Ok(range)
    }

    fn check(&self) -> IdResult<()> {
        if self.lo > self.hi {
            return Err(IdError::InvalidInput(format!(
                "range lower bound {} exceeds upper bound {}",
                self.lo, self.hi
            )));
        }
        if self.lo == 0 && self.hi == u64::MAX {
            return Err(IdError::InvalidInput(
                "range must not span the entire u64 domain".into(),
            ));
        }
        if self.prefix.is_empty() || !self.prefix.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(IdError::InvalidInput(format!(
                "range prefix must be non-empty and alphabetic, got: '{}'",
                self.prefix
            )));
        }
        Ok(())
    }

    pub fn lo(&self) -> u64 {
        self.lo
    }

    pub fn hi(&self) -> u64 {
        self.hi
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of values in the range.
    pub fn size(&self) -> u64 {
        self.hi - self.lo + 1
    }

    pub fn contains(&self, value: u64) -> bool {
        (self.lo..=self.hi).contains(&value)
    }

    fn overlaps(&self, other: &IdRange) -> bool {
        self.lo <= other.hi && other.lo <= self.hi
    }
}

/// Ranges keyed by entity type.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct RangeTable {
    ranges: BTreeMap<String, IdRange>,
}

impl Default for RangeTable {
    fn default() -> Self {
        let ranges = DEFAULT_RANGES
            .iter()
            .map(|(entity_type, lo, hi)| {
                (
                    (*entity_type).to_string(),
                    IdRange {
                        lo: *lo,
                        hi: *hi,
                        prefix: DEFAULT_PREFIX.to_string(),
                    },
                )
            })
            .collect();
        Self { ranges }
    }
}

impl RangeTable {
    /// Creates an empty table.
    pub fn empty() -> Self {
        Self {
            ranges: BTreeMap::new(),
        }
    }

    /// Adds or replaces the range for `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidInput`] if the range overlaps the range of another type.
    pub fn insert(&mut self, entity_type: impl Into<String>, range: IdRange) -> IdResult<()> {
        let entity_type = entity_type.into();
        range.check()?;
        if let Some((other, _)) = self
            .ranges
            .iter()
            .find(|(other, existing)| **other != entity_type && existing.overlaps(&range))
        {
            return Err(IdError::InvalidInput(format!(
                "range for '{entity_type}' overlaps range for '{other}'"
            )));
        }
        self.ranges.insert(entity_type, range);
        Ok(())
    }

    /// Applies every entry of `overrides` on top of this table.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidInput`] if the resulting table has overlapping or malformed
    /// ranges.
    pub fn with_overrides(mut self, overrides: RangeTable) -> IdResult<Self> {
        for (entity_type, range) in overrides.ranges {
            self.ranges.insert(entity_type, range);
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks every range and that no two ranges overlap.
    ///
    /// Tables built with [`RangeTable::insert`] are always valid; deserialised tables are not
    /// checked until this is called.
    pub fn validate(&self) -> IdResult<()> {
        let entries: Vec<_> = self.ranges.iter().collect();
        for (i, (entity_type, range)) in entries.iter().enumerate() {
            range.check()?;
            for (other, other_range) in &entries[i + 1..] {
                if range.overlaps(other_range) {
                    return Err(IdError::InvalidInput(format!(
                        "range for '{entity_type}' overlaps range for '{other}'"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, entity_type: &str) -> Option<&IdRange> {
        self.ranges.get(entity_type)
    }

    pub fn contains_type(&self, entity_type: &str) -> bool {
        self.ranges.contains_key(entity_type)
    }

    /// Prefix for `entity_type`, falling back to [`DEFAULT_PREFIX`].
    pub fn prefix_for(&self, entity_type: &str) -> &str {
        self.ranges
            .get(entity_type)
            .map(IdRange::prefix)
            .unwrap_or(DEFAULT_PREFIX)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IdRange)> {
        self.ranges.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns true if `id` already has the shape of an assigned identifier.
    ///
    /// Accepted shapes are a bare run of digits, or any configured prefix (or
    /// [`DEFAULT_PREFIX`]) followed by a non-empty run of digits.
    pub fn is_assigned_id(&self, id: &str) -> bool {
        fn all_digits(s: &str) -> bool {
            !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
        }

        if all_digits(id) {
            return true;
        }
        std::iter::once(DEFAULT_PREFIX)
            .chain(self.ranges.values().map(IdRange::prefix))
            .any(|prefix| id.strip_prefix(prefix).is_some_and(all_digits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_has_no_overlaps() {
        RangeTable::default().validate().expect("default table valid");
    }

    #[test]
    fn default_table_covers_shared_resource_types() {
        let table = RangeTable::default();
        for entity_type in ["Organization", "Practitioner", "Location", "PractitionerRole"] {
            assert!(table.contains_type(entity_type), "{entity_type} missing");
        }
        assert_eq!(table.get("Patient").map(IdRange::size), Some(1));
    }

    #[test]
    fn new_rejects_inverted_bounds() {
        let err = IdRange::new(10, 5, "t").expect_err("inverted bounds");
        assert!(matches!(err, IdError::InvalidInput(_)));
    }

    #[test]
    fn new_rejects_numeric_prefix() {
        assert!(IdRange::new(0, 5, "7").is_err());
        assert!(IdRange::new(0, 5, "").is_err());
    }

    #[test]
    fn insert_rejects_overlapping_range() {
        let mut table = RangeTable::empty();
        table
            .insert("A", IdRange::new(100, 199, "t").expect("range"))
            .expect("insert A");
        let err = table
            .insert("B", IdRange::new(150, 250, "t").expect("range"))
            .expect_err("overlap");
        match err {
            IdError::InvalidInput(msg) => assert!(msg.contains("'A'")),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn insert_replaces_own_range() {
        let mut table = RangeTable::empty();
        table
            .insert("A", IdRange::new(100, 199, "t").expect("range"))
            .expect("insert");
        table
            .insert("A", IdRange::new(150, 160, "t").expect("range"))
            .expect("replace");
        assert_eq!(table.get("A").map(IdRange::lo), Some(150));
    }

    #[test]
    fn recognises_assigned_identifier_shapes() {
        let table = RangeTable::default();
        assert!(table.is_assigned_id("t10234567"));
        assert!(table.is_assigned_id("1000000"));
        assert!(!table.is_assigned_id("t"));
        assert!(!table.is_assigned_id("tx123"));
        assert!(!table.is_assigned_id("0a1b2c3d-1111-2222-3333-444455556666"));
    }

    #[test]
    fn overrides_deserialise_from_yaml() {
        let yaml = "Encounter:\n  lo: 1\n  hi: 9\n  prefix: e\nGoal:\n  lo: 10\n  hi: 20\n";
        let overrides: RangeTable = serde_yaml::from_str(yaml).expect("parse overrides");
        let mut base = RangeTable::empty();
        base.insert("Encounter", IdRange::new(500, 600, "t").expect("range"))
            .expect("insert");

        let merged = base.with_overrides(overrides).expect("merge");
        let encounter = merged.get("Encounter").expect("encounter range");
        assert_eq!((encounter.lo(), encounter.hi(), encounter.prefix()), (1, 9, "e"));
        assert_eq!(merged.prefix_for("Goal"), "t");
    }

    #[test]
    fn overrides_that_collide_are_rejected() {
        let yaml = "Encounter:\n  lo: 20000000\n  hi: 20000005\n";
        let overrides: RangeTable = serde_yaml::from_str(yaml).expect("parse overrides");
        assert!(RangeTable::default().with_overrides(overrides).is_err());
    }
}
