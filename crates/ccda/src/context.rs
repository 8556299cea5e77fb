//! Entity type inference from surrounding markup.
//!
//! A UUID inside a CCDA document carries no type. When there is no JSON mapping to consult, the
//! type is guessed from the markup around the token's first occurrence: entry class codes and
//! section LOINC codes. Anything unrecognised is treated as an Observation, the most common
//! statement in generated documents.

/// Type assumed when the context gives no hint.
pub const FALLBACK_ENTITY_TYPE: &str = "Observation";

const CONTEXT_WINDOW: usize = 500;

fn floor_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// Best-guess entity type for `token` based on the markup around its first occurrence.
pub fn infer_entity_type(xml: &str, token: &str) -> &'static str {
    let Some(position) = xml.find(token) else {
        return FALLBACK_ENTITY_TYPE;
    };
    let start = floor_boundary(xml, position.saturating_sub(CONTEXT_WINDOW));
    let end = ceil_boundary(xml, position + CONTEXT_WINDOW);
    let context = &xml[start..end];
    let lowered = context.to_lowercase();

    let has = |needle: &str| context.contains(needle);
    let observation = has(r#"classCode="OBS""#);

    if has(r#"classCode="ENC""#) || has("46240-8") {
        "Encounter"
    } else if observation && (has("8716-3") || lowered.contains("vital")) {
        "Observation"
    } else if observation && (has("30954-2") || lowered.contains("laboratory")) {
        "Observation"
    } else if has(r#"classCode="CLUSTER""#) && (has("58410-2") || has("24323-8")) {
        "DiagnosticReport"
    } else if has(r#"classCode="SBADM""#) || has("10160-0") {
        "MedicationRequest"
    } else if has(r#"classCode="PROC""#) || has("47519-4") {
        "Procedure"
    } else {
        FALLBACK_ENTITY_TYPE
    }
}
