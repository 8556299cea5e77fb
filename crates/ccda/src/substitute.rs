//! Literal token substitution driven by the identity mapping.

use mockpt_ids::{find_original_identities, IdentityMapping, MappingSource};
use std::collections::HashSet;

/// Outcome of [`apply_to_tree`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Substitution {
    pub xml: String,
    /// Distinct candidate tokens found in the document.
    pub tokens_found: usize,
    /// Distinct tokens that had a mapping entry and were replaced.
    pub tokens_replaced: usize,
    /// Total occurrences replaced.
    pub occurrences: usize,
}

/// Replaces every mapped identity token in `xml` with its assigned identifier.
///
/// Candidates are the UUID-shaped tokens in the text plus any primary mapping key that occurs
/// literally. Each candidate with a primary mapping entry is replaced everywhere it appears; the rest
/// are left untouched. Longer tokens are replaced first so no token is cut through by a shorter
/// one.
pub fn apply_to_tree(xml: &str, mapping: &IdentityMapping) -> Substitution {
    let mut seen = HashSet::new();
    let mut candidates: Vec<String> = find_original_identities(xml)
        .into_iter()
        .chain(mapping.primary_keys().filter(|key| xml.contains(key)))
        .filter(|token| seen.insert(*token))
        .map(str::to_owned)
        .collect();
    candidates.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut result = Substitution {
        xml: xml.to_string(),
        tokens_found: candidates.len(),
        ..Substitution::default()
    };

    for token in &candidates {
        let Some(mapped) = mapping
            .get(token)
            .filter(|mapped| mapped.source == MappingSource::Primary)
        else {
            continue;
        };
        let count = result.xml.matches(token.as_str()).count();
        if count == 0 {
            continue;
        }
        result.xml = result.xml.replace(token.as_str(), &mapped.id.to_string());
        result.tokens_replaced += 1;
        result.occurrences += count;
    }

    tracing::info!(
        "replaced {} occurrences of {} tokens ({} candidates)",
        result.occurrences,
        result.tokens_replaced,
        result.tokens_found
    );
    result
}
