//! Structural edits to CCDA documents.
//!
//! Every edit is a single streaming pass: events are copied through unchanged except where the
//! edit inserts or rewrites an element. An edit whose anchor element is missing leaves the
//! document as it was and reports zero changes.

use crate::stream::{attribute, element, local_name, owned, with_attribute, EventStream};
use crate::CcdaResult;
use chrono::NaiveDate;
use fhir::vendor::{vendor_identifier, PATIENT_IDENTIFIER_SYSTEM};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

pub const PATIENT_ID_ROOT: &str = "2.16.840.1.113883.3.1234.5.1";
pub const GENERATOR_AUTHORITY: &str = "https://github.com/synthetichealth/synthea";
pub const ENCOUNTER_ID_ROOT: &str = "2.16.840.1.113883.19.5";
pub const VENDOR_ID_ROOT: &str = "ThetaRho";

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Clinical statement elements and the resource type each becomes downstream.
const STATEMENT_TYPES: &[(&str, &str)] = &[
    ("substanceAdministration", "MedicationRequest"),
    ("procedure", "Procedure"),
    ("observation", "Observation"),
    ("organizer", "DiagnosticReport"),
    ("act", "Procedure"),
];

/// Result of a structural edit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edit {
    pub xml: String,
    /// Number of elements inserted or rewritten.
    pub applied: usize,
}

impl Edit {
    fn unchanged(xml: &str) -> Self {
        Self {
            xml: xml.to_string(),
            applied: 0,
        }
    }
}

/// Returns true if any start or empty element satisfies `predicate(ancestors, element)`.
fn any_element(
    xml: &str,
    mut predicate: impl FnMut(&[String], &BytesStart<'_>) -> bool,
) -> CcdaResult<bool> {
    let mut stream = EventStream::new(xml);
    while let Some(event) = stream.next_event()? {
        if let Event::Start(e) | Event::Empty(e) = &event {
            if predicate(stream.path(), e) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn ends_with(path: &[String], suffix: &[&str]) -> bool {
    path.len() >= suffix.len()
        && path[path.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(a, b)| a == b)
}

fn is_root_child(path: &[String], e: &BytesStart<'_>, wanted: &str) -> bool {
    path.len() == 1 && local_name(e) == wanted
}

fn is_patient_role_id(path: &[String], e: &BytesStart<'_>) -> bool {
    local_name(e) == "id" && ends_with(path, &["recordTarget", "patientRole"])
}

// ============================================================================
// Patient identifier
// ============================================================================

/// Inserts the subject's identifier after the first `recordTarget/patientRole/id`.
///
/// Does nothing when the identifier is already present or the patient role has no id.
pub fn insert_patient_identifier(xml: &str, subject_id: &str) -> CcdaResult<Edit> {
    let present = any_element(xml, |path, e| {
        is_patient_role_id(path, e) && attribute(e, "extension").as_deref() == Some(subject_id)
    })?;
    if present {
        return Ok(Edit::unchanged(xml));
    }

    let identifier = element(
        "id",
        &[
            ("root", PATIENT_ID_ROOT),
            ("extension", subject_id),
            ("assigningAuthorityName", PATIENT_IDENTIFIER_SYSTEM),
        ],
    );

    let mut stream = EventStream::new(xml);
    let mut applied = 0;
    let mut after_end_at = None;

    while let Some(event) = stream.next_event()? {
        let first_id = applied == 0
            && after_end_at.is_none()
            && matches!(&event, Event::Start(e) | Event::Empty(e) if is_patient_role_id(stream.path(), e));
        let is_empty = matches!(event, Event::Empty(_));
        let closes_id = matches!(event, Event::End(_)) && after_end_at == Some(stream.depth());

        stream.write(event)?;

        if (first_id && is_empty) || closes_id {
            stream.write(Event::Empty(identifier.clone()))?;
            applied = 1;
            after_end_at = None;
        } else if first_id {
            after_end_at = Some(stream.depth());
        }
    }

    if applied == 0 {
        tracing::warn!("recordTarget/patientRole/id not found, patient identifier not added");
    }
    Ok(Edit {
        xml: stream.finish()?,
        applied,
    })
}

// ============================================================================
// Encompassing encounter
// ============================================================================

/// The encounter a generated add-on document describes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncompassingEncounter {
    pub patient_id: String,
    pub date: NaiveDate,
}

impl EncompassingEncounter {
    pub fn encounter_id(&self) -> String {
        format!("{}addon{}", self.patient_id, self.date.format("%Y%m%d"))
    }

    fn events(&self) -> Vec<Event<'static>> {
        let encounter_id = self.encounter_id();
        let day = self.date.format("%Y%m%d").to_string();

        vec![
            Event::Start(BytesStart::new("componentOf")),
            Event::Start(element(
                "encompassingEncounter",
                &[("classCode", "ENC"), ("moodCode", "EVN")],
            )),
            Event::Empty(element(
                "id",
                &[("root", ENCOUNTER_ID_ROOT), ("extension", encounter_id.as_str())],
            )),
            Event::Start(element(
                "code",
                &[
                    ("code", "AMB"),
                    ("codeSystem", "2.16.840.1.113883.5.4"),
                    ("displayName", "Ambulatory"),
                    ("codeSystemName", "ActEncounterCode"),
                ],
            )),
            Event::Empty(element(
                "translation",
                &[
                    ("code", "185349003"),
                    ("codeSystem", "2.16.840.1.113883.6.96"),
                    ("displayName", "Encounter for check up (procedure)"),
                    ("codeSystemName", "SNOMED-CT"),
                ],
            )),
            Event::End(BytesEnd::new("code")),
            Event::Start(BytesStart::new("effectiveTime")),
            Event::Empty(element("low", &[("value", day.as_str())])),
            Event::Empty(element("high", &[("value", day.as_str())])),
            Event::End(BytesEnd::new("effectiveTime")),
            Event::End(BytesEnd::new("encompassingEncounter")),
            Event::End(BytesEnd::new("componentOf")),
        ]
    }
}

/// Adds `componentOf/encompassingEncounter` to the document root.
///
/// Placed after `documentationOf`, or before the first root-level `component` when there is no
/// `documentationOf`, or last as a fallback. Skipped when the root already has a `componentOf`.
pub fn add_encompassing_encounter(xml: &str, encounter: &EncompassingEncounter) -> CcdaResult<Edit> {
    if any_element(xml, |path, e| is_root_child(path, e, "componentOf"))? {
        return Ok(Edit::unchanged(xml));
    }
    let has_documentation_of = any_element(xml, |path, e| is_root_child(path, e, "documentationOf"))?;
    if !has_documentation_of {
        tracing::warn!("documentationOf not found, componentOf goes before the first component");
    }

    let mut stream = EventStream::new(xml);
    let mut inserted = false;

    while let Some(event) = stream.next_event()? {
        let depth = stream.depth();
        let before = !inserted
            && match &event {
                Event::Start(e) | Event::Empty(e) => {
                    !has_documentation_of && depth == 1 && local_name(e) == "component"
                }
                Event::End(_) => depth == 0,
                _ => false,
            };
        if before {
            for wrapper in encounter.events() {
                stream.write(wrapper)?;
            }
            inserted = true;
        }

        let after = !inserted
            && has_documentation_of
            && depth == 1
            && match &event {
                Event::End(e) => e.local_name().as_ref() == b"documentationOf",
                Event::Empty(e) => local_name(e) == "documentationOf",
                _ => false,
            };
        stream.write(event)?;
        if after {
            for wrapper in encounter.events() {
                stream.write(wrapper)?;
            }
            inserted = true;
        }
    }

    Ok(Edit {
        xml: stream.finish()?,
        applied: usize::from(inserted),
    })
}

// ============================================================================
// Vendor entry identifiers
// ============================================================================

struct OpenStatement {
    child_depth: usize,
    resource_type: &'static str,
    resource_id: Option<String>,
    done: bool,
}

/// Adds `<id root="ThetaRho" extension="{practice}.{prefix}-{id}"/>` to each section entry.
///
/// The entry's own id (extension, else root) supplies `{id}`. The new id goes after the
/// statement's leading `templateId`/`id` children. Statements without an id are skipped.
pub fn add_vendor_entry_ids(xml: &str, practice_id: &str) -> CcdaResult<Edit> {
    let mut stream = EventStream::new(xml);
    let mut open: Option<OpenStatement> = None;
    let mut applied = 0;

    while let Some(event) = stream.next_event()? {
        let depth = stream.depth();
        let mut insert_before = false;
        let mut closes = false;

        if let Some(statement) = open.as_mut() {
            match &event {
                Event::Start(e) | Event::Empty(e) if depth == statement.child_depth => {
                    match local_name(e).as_str() {
                        "templateId" => {}
                        "id" => {
                            if statement.resource_id.is_none() {
                                statement.resource_id = attribute(e, "extension")
                                    .or_else(|| attribute(e, "root"))
                                    .filter(|v| !v.is_empty());
                            }
                        }
                        _ => insert_before = !statement.done,
                    }
                }
                Event::End(_) if depth + 1 == statement.child_depth => {
                    insert_before = !statement.done;
                    closes = true;
                }
                _ => {}
            }

            if insert_before {
                statement.done = true;
                if let Some(resource_id) = &statement.resource_id {
                    let extension = vendor_identifier(practice_id, statement.resource_type, resource_id);
                    stream.write(Event::Empty(element(
                        "id",
                        &[("root", VENDOR_ID_ROOT), ("extension", extension.as_str())],
                    )))?;
                    applied += 1;
                }
            }
        }

        let opens = match &event {
            Event::Start(e) if open.is_none() && stream.parent() == Some("entry") && stream.within("section") => {
                let name = local_name(e);
                STATEMENT_TYPES
                    .iter()
                    .find(|(statement, _)| *statement == name)
                    .map(|(_, resource_type)| *resource_type)
            }
            _ => None,
        };

        stream.write(event)?;

        if closes {
            open = None;
        }
        if let Some(resource_type) = opens {
            open = Some(OpenStatement {
                child_depth: depth + 1,
                resource_type,
                resource_id: None,
                done: false,
            });
        }
    }

    tracing::info!("added {applied} vendor identifiers to document entries");
    Ok(Edit {
        xml: stream.finish()?,
        applied,
    })
}

// ============================================================================
// Demographics
// ============================================================================

/// Patient and practice details copied into an add-on document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Demographics {
    pub patient_id: String,
    pub given: Vec<String>,
    pub family: String,
    /// FHIR administrative gender (`male`, `female`, ...).
    pub gender: Option<String>,
    /// `YYYY-MM-DD`.
    pub birth_date: Option<String>,
    pub practice_name: Option<String>,
}

impl Demographics {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.given.join(" "), self.family)
            .trim()
            .to_string()
    }

    fn name_parts(&self) -> Vec<Event<'_>> {
        let mut events = Vec::new();
        for given in &self.given {
            events.push(Event::Start(BytesStart::new("given")));
            events.push(Event::Text(BytesText::new(given)));
            events.push(Event::End(BytesEnd::new("given")));
        }
        events.push(Event::Start(BytesStart::new("family")));
        events.push(Event::Text(BytesText::new(&self.family)));
        events.push(Event::End(BytesEnd::new("family")));
        events
    }
}

enum Rewrite {
    Keep,
    Attributes(BytesStart<'static>),
    Text(BytesStart<'static>, String),
    PatientName(BytesStart<'static>),
}

#[derive(Default)]
struct DemographicsProgress {
    id: bool,
    name: bool,
    gender: bool,
    birth_time: bool,
    author: bool,
    custodian: bool,
    title: bool,
}

fn classify(
    path: &[String],
    e: &BytesStart<'_>,
    demographics: &Demographics,
    progress: &mut DemographicsProgress,
) -> Rewrite {
    let in_record_target = path.iter().any(|p| p == "recordTarget");
    let parent = path.last().map(String::as_str);

    match local_name(e).as_str() {
        "id" if !progress.id
            && in_record_target
            && path.iter().any(|p| p == "patientRole")
            && attribute(e, "assigningAuthorityName").as_deref() == Some(GENERATOR_AUTHORITY) =>
        {
            progress.id = true;
            Rewrite::Attributes(with_attribute(e, "extension", &demographics.patient_id))
        }
        "name" if !progress.name && in_record_target && parent == Some("patient") => {
            progress.name = true;
            Rewrite::PatientName(owned(e))
        }
        "administrativeGenderCode" if !progress.gender && in_record_target && parent == Some("patient") => {
            let Some(gender) = demographics.gender.as_deref() else {
                return Rewrite::Keep;
            };
            progress.gender = true;
            let code = if gender == "male" { "M" } else { "F" };
            let mut display = gender.to_string();
            if let Some(first) = display.get_mut(..1) {
                first.make_ascii_uppercase();
            }
            let updated = with_attribute(e, "code", code);
            Rewrite::Attributes(with_attribute(&updated, "displayName", &display))
        }
        "birthTime" if !progress.birth_time && in_record_target && parent == Some("patient") => {
            let Some(birth_date) = demographics.birth_date.as_deref() else {
                return Rewrite::Keep;
            };
            progress.birth_time = true;
            let existing = attribute(e, "value").unwrap_or_default();
            let mut value = birth_date.replace('-', "");
            if let Some(time) = existing.get(8..) {
                value.push_str(time);
            }
            Rewrite::Attributes(with_attribute(e, "value", &value))
        }
        "name" if !progress.author
            && parent == Some("representedOrganization")
            && path.iter().any(|p| p == "author") =>
        {
            match &demographics.practice_name {
                Some(practice) => {
                    progress.author = true;
                    Rewrite::Text(owned(e), practice.clone())
                }
                None => Rewrite::Keep,
            }
        }
        "name" if !progress.custodian
            && parent == Some("representedCustodianOrganization")
            && path.iter().any(|p| p == "custodian") =>
        {
            match &demographics.practice_name {
                Some(practice) => {
                    progress.custodian = true;
                    Rewrite::Text(owned(e), practice.clone())
                }
                None => Rewrite::Keep,
            }
        }
        "title" if !progress.title && path.len() == 1 => {
            progress.title = true;
            Rewrite::Text(
                owned(e),
                format!("C-CDA R2.1 Patient Record: {}", demographics.full_name()),
            )
        }
        _ => Rewrite::Keep,
    }
}

/// Copies the remote patient's identity and practice into the document header.
///
/// Rewrites the generator-assigned patient id, the patient's name, gender and birth date, the
/// author and custodian organization names, and the document title.
pub fn update_demographics(xml: &str, demographics: &Demographics) -> CcdaResult<Edit> {
    let mut stream = EventStream::new(xml);
    let mut progress = DemographicsProgress::default();
    let mut applied = 0;

    while let Some(event) = stream.next_event()? {
        let rewrite = match &event {
            Event::Start(e) | Event::Empty(e) => classify(stream.path(), e, demographics, &mut progress),
            _ => Rewrite::Keep,
        };
        let has_children = matches!(event, Event::Start(_));

        match rewrite {
            Rewrite::Keep => stream.write(event)?,
            Rewrite::Attributes(updated) => {
                if has_children {
                    stream.write(Event::Start(updated))?;
                } else {
                    stream.write(Event::Empty(updated))?;
                }
                applied += 1;
            }
            Rewrite::Text(start, text) => {
                if has_children {
                    stream.skip_children()?;
                }
                stream.write_wrapped(start, vec![Event::Text(BytesText::new(&text))])?;
                applied += 1;
            }
            Rewrite::PatientName(start) => {
                if has_children {
                    stream.skip_children()?;
                }
                stream.write_wrapped(start, demographics.name_parts())?;
                applied += 1;
            }
        }
    }

    tracing::info!(
        "updated {applied} demographic elements for {} ({})",
        demographics.full_name(),
        demographics.patient_id
    );
    Ok(Edit {
        xml: stream.finish()?,
        applied,
    })
}

// ============================================================================
// Serialisation helpers
// ============================================================================

/// Removes carriage returns and line feeds from every text node.
pub fn strip_line_breaks(xml: &str) -> CcdaResult<String> {
    let mut stream = EventStream::new(xml);
    while let Some(event) = stream.next_event()? {
        match event {
            Event::Text(text) => {
                let raw: &[u8] = &text;
                if !raw.contains(&b'\n') && !raw.contains(&b'\r') {
                    stream.write(Event::Text(text))?;
                    continue;
                }
                let kept: Vec<u8> = raw
                    .iter()
                    .copied()
                    .filter(|b| *b != b'\n' && *b != b'\r')
                    .collect();
                if !kept.is_empty() {
                    let escaped = String::from_utf8_lossy(&kept).into_owned();
                    stream.write(Event::Text(BytesText::from_escaped(escaped)))?;
                }
            }
            other => stream.write(other)?,
        }
    }
    stream.finish()
}

/// Prefixes an XML declaration when the document has none.
pub fn ensure_declaration(xml: &str) -> String {
    if xml.trim_start().starts_with("<?xml") {
        xml.to_string()
    } else {
        format!("{XML_DECLARATION}\n{xml}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = r#"<ClinicalDocument xmlns="urn:hl7-org:v3"><title>Old title</title><author><assignedAuthor><representedOrganization><name>Generator Org</name></representedOrganization></assignedAuthor></author><custodian><assignedCustodian><representedCustodianOrganization><name>Generator Org</name></representedCustodianOrganization></assignedCustodian></custodian><recordTarget><patientRole><id root="2.16.840.1.113883.19.5" extension="abc" assigningAuthorityName="https://github.com/synthetichealth/synthea"/><id root="other"/><patient><name><given>Old</given><family>Name</family></name><administrativeGenderCode code="F" displayName="Female"/><birthTime value="19900101120000"/></patient></patientRole></recordTarget>"#;

    fn document(body: &str) -> String {
        format!("{HEADER}{body}</ClinicalDocument>")
    }

    #[test]
    fn patient_identifier_follows_first_patient_role_id() {
        let xml = document("");
        let edit = insert_patient_identifier(&xml, "t1000000").expect("edit");
        assert_eq!(edit.applied, 1);

        let first = edit.xml.find("extension=\"abc\"").expect("first id");
        let inserted = edit.xml.find("extension=\"t1000000\"").expect("inserted id");
        let second = edit.xml.find("root=\"other\"").expect("second id");
        assert!(first < inserted && inserted < second);
        assert!(edit.xml.contains(PATIENT_IDENTIFIER_SYSTEM));
    }

    #[test]
    fn patient_identifier_is_not_added_twice() {
        let xml = document("");
        let once = insert_patient_identifier(&xml, "t1000000").expect("first");
        let twice = insert_patient_identifier(&once.xml, "t1000000").expect("second");
        assert_eq!(twice.applied, 0);
        assert_eq!(twice.xml, once.xml);
    }

    #[test]
    fn patient_identifier_needs_patient_role() {
        let xml = "<ClinicalDocument><component/></ClinicalDocument>";
        let edit = insert_patient_identifier(xml, "t1").expect("edit");
        assert_eq!(edit.applied, 0);
        assert_eq!(edit.xml, xml);
    }

    fn encounter() -> EncompassingEncounter {
        EncompassingEncounter {
            patient_id: "t1210".into(),
            date: NaiveDate::from_ymd_opt(2024, 5, 17).expect("valid date"),
        }
    }

    #[test]
    fn component_of_goes_after_documentation_of() {
        let xml = document("<documentationOf><serviceEvent/></documentationOf><component><structuredBody/></component>");
        let edit = add_encompassing_encounter(&xml, &encounter()).expect("edit");
        assert_eq!(edit.applied, 1);

        let documentation = edit.xml.find("</documentationOf>").expect("documentationOf");
        let component_of = edit.xml.find("<componentOf>").expect("componentOf");
        let component = edit.xml.find("<component>").expect("component");
        assert!(documentation < component_of && component_of < component);
        assert!(edit.xml.contains(r#"extension="t1210addon20240517""#));
        assert!(edit.xml.contains(r#"<low value="20240517"/>"#));
        assert!(edit.xml.contains(r#"code="185349003""#));
    }

    #[test]
    fn component_of_goes_before_component_without_documentation_of() {
        let xml = document("<component><structuredBody/></component>");
        let edit = add_encompassing_encounter(&xml, &encounter()).expect("edit");
        let component_of = edit.xml.find("<componentOf>").expect("componentOf");
        let component = edit.xml.find("<component>").expect("component");
        assert!(component_of < component);
    }

    #[test]
    fn existing_component_of_is_kept() {
        let xml = document("<componentOf/><component/>");
        let edit = add_encompassing_encounter(&xml, &encounter()).expect("edit");
        assert_eq!(edit.applied, 0);
        assert_eq!(edit.xml, xml);
    }

    #[test]
    fn vendor_ids_follow_existing_ids_on_section_entries() {
        let xml = document(concat!(
            "<component><structuredBody><component><section>",
            r#"<entry><substanceAdministration classCode="SBADM"><templateId root="tpl"/><id root="t120000001"/><code code="x"/></substanceAdministration></entry>"#,
            r#"<entry><observation classCode="OBS"><code code="y"/></observation></entry>"#,
            r#"<entry><act classCode="ACT"><id root="r" extension="t140000002"/></act></entry>"#,
            "</section></component></structuredBody></component>"
        ));
        let edit = add_vendor_entry_ids(&xml, "a-11783").expect("edit");
        assert_eq!(edit.applied, 2);

        assert!(edit.xml.contains(concat!(
            r#"<id root="t120000001"/><id root="ThetaRho" extension="a-11783.medicationrequest-t120000001"/>"#,
            r#"<code code="x"/>"#
        )));
        assert!(edit.xml.contains(
            r#"<id root="r" extension="t140000002"/><id root="ThetaRho" extension="a-11783.shb.7126-t140000002"/></act>"#
        ));
        assert!(!edit.xml.contains("resultamb"));
    }

    #[test]
    fn demographics_replace_header_content() {
        let xml = document("");
        let demographics = Demographics {
            patient_id: "t1210".into(),
            given: vec!["Ada".into(), "Marie".into()],
            family: "Lovelace".into(),
            gender: Some("male".into()),
            birth_date: Some("1985-07-04".into()),
            practice_name: Some("Scottsdale Family Care".into()),
        };
        let edit = update_demographics(&xml, &demographics).expect("edit");

        assert!(edit.xml.contains(r#"extension="t1210""#));
        assert!(edit.xml.contains(
            "<name><given>Ada</given><given>Marie</given><family>Lovelace</family></name>"
        ));
        assert!(edit.xml.contains(r#"code="M" displayName="Male""#));
        assert!(edit.xml.contains(r#"<birthTime value="19850704120000"/>"#));
        assert_eq!(edit.xml.matches("Scottsdale Family Care").count(), 2);
        assert!(edit
            .xml
            .contains("<title>C-CDA R2.1 Patient Record: Ada Marie Lovelace</title>"));
        assert!(!edit.xml.contains("Generator Org"));
        assert_eq!(edit.applied, 7);
    }

    #[test]
    fn line_breaks_are_removed_from_text() {
        let xml = "<a>\n  <b>one\r\ntwo &amp; three</b>\n</a>";
        let stripped = strip_line_breaks(xml).expect("strip");
        assert_eq!(stripped, "<a>  <b>onetwo &amp; three</b></a>");
    }

    #[test]
    fn declaration_is_added_once() {
        let with = ensure_declaration("<a/>");
        assert!(with.starts_with("<?xml"));
        assert_eq!(ensure_declaration(&with), with);
    }
}
