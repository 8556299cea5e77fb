//! Identity mapping derived from a CCDA document alone.

use crate::context::{infer_entity_type, FALLBACK_ENTITY_TYPE};
use crate::CcdaResult;
use mockpt_ids::{find_original_identities, IdAllocator, IdentityMapping};

/// Assigns an identifier to every UUID-shaped token in `xml`.
///
/// Used when no JSON bundle accompanies the document. Each token's type is inferred from its
/// surrounding markup; a type without a configured range draws from the fallback type's range
/// but keeps its inferred type in the mapping.
///
/// # Errors
///
/// Fails if a range is exhausted, or if neither the inferred nor the fallback type has a range.
pub fn build_mapping_from_tree(xml: &str, allocator: &mut IdAllocator) -> CcdaResult<IdentityMapping> {
    let mut mapping = IdentityMapping::new();
    let tokens = find_original_identities(xml);
    tracing::info!("found {} unique identity tokens in document", tokens.len());

    for token in tokens {
        let entity_type = infer_entity_type(xml, token);
        let range_type = if allocator.ranges().contains_type(entity_type) {
            entity_type
        } else {
            FALLBACK_ENTITY_TYPE
        };
        let assigned = allocator.allocate(range_type)?;
        tracing::debug!("{token} ({entity_type}) -> {assigned}");
        mapping.insert(token, assigned, entity_type)?;
    }
    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substitute::apply_to_tree;
    use mockpt_ids::RangeTable;

    const DOCUMENT: &str = r#"<ClinicalDocument>
<component><section><code code="46240-8"/>
<entry><encounter classCode="ENC"><id root="aaaaaaaa-1111-2222-3333-444455556666"/></encounter></entry>
</section></component>
<component><section><code code="10160-0"/>
<entry><substanceAdministration classCode="SBADM"><id root="bbbbbbbb-1111-2222-3333-444455556666"/></substanceAdministration></entry>
</section></component>
</ClinicalDocument>"#;

    #[test]
    fn tokens_draw_from_inferred_type_ranges() {
        let mut allocator = IdAllocator::with_seed(RangeTable::default(), 8);
        let mapping = build_mapping_from_tree(DOCUMENT, &mut allocator).expect("mapping");

        let encounter = mapping
            .get("aaaaaaaa-1111-2222-3333-444455556666")
            .expect("encounter token");
        assert_eq!(encounter.resource_type, "Encounter");
        assert!((10_100_000..=19_999_999).contains(&encounter.id.value()));
        assert_eq!(mapping.len(), 2);
    }

    #[test]
    fn derived_mapping_removes_every_token() {
        let mut allocator = IdAllocator::with_seed(RangeTable::default(), 8);
        let mapping = build_mapping_from_tree(DOCUMENT, &mut allocator).expect("mapping");
        let result = apply_to_tree(DOCUMENT, &mapping);
        assert!(find_original_identities(&result.xml).is_empty());
        assert_eq!(result.occurrences, 2);
    }
}
