//! Lexical recognition of original identities.
//!
//! The generator identifies every entity with a hyphenated UUID (`8-4-4-4-12` hexadecimal
//! groups). Any such token left in converted output means remapping was incomplete.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static ORIGINAL_IDENTITY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
        .expect("original identity pattern is valid")
});

const GROUP_LENGTHS: [usize; 5] = [8, 4, 4, 4, 12];

/// Returns true if `input` is exactly one hyphenated UUID token (either case).
pub fn is_original_identity(input: &str) -> bool {
    let groups: Vec<&str> = input.split('-').collect();
    groups.len() == GROUP_LENGTHS.len()
        && groups
            .iter()
            .zip(GROUP_LENGTHS)
            .all(|(group, len)| group.len() == len && group.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Distinct UUID-shaped tokens in `text`, in order of first occurrence.
pub fn find_original_identities(text: &str) -> Vec<&str> {
    let mut seen = HashSet::new();
    ORIGINAL_IDENTITY_REGEX
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|token| seen.insert(*token))
        .collect()
}
