//! Reference integrity
//!
//! Checks that pointer-valued fields resolve to a record in the same bundle
//! (or, per policy, point outside it) and that the target has a permitted
//! type. Which fields hold references is declared in [`REFERENCE_FIELDS`];
//! nothing is discovered by inspecting values.

use crate::config::ReferencesConfig;
use crate::navigator::{navigate_all, FieldPath};
use bundlecheck_model::{codes, ParsedBundle, Record, ValidationError};
use phf::phf_map;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

pub const RULE_ID: &str = "reference-integrity";
pub const RULE_TYPE: &str = "ReferenceIntegrity";

/// A pointer-valued field and the record types it may point to. An empty
/// target list accepts any type.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceField {
    pub path: &'static str,
    pub targets: &'static [&'static str],
}

const fn field(path: &'static str, targets: &'static [&'static str]) -> ReferenceField {
    ReferenceField { path, targets }
}

const ANY: &[&str] = &[];
const SUBJECT: &[&str] = &["Patient", "Group"];
const ENCOUNTER: &[&str] = &["Encounter"];
const ORGANIZATION: &[&str] = &["Organization"];
const CLINICIAN: &[&str] = &["Practitioner", "PractitionerRole"];
const RECORDER: &[&str] = &["Practitioner", "PractitionerRole", "Patient", "RelatedPerson"];
const PERFORMER: &[&str] = &[
    "Practitioner",
    "PractitionerRole",
    "Organization",
    "CareTeam",
    "Patient",
    "RelatedPerson",
];

const PATIENT_FIELDS: &[ReferenceField] = &[
    field("generalPractitioner", &["Organization", "Practitioner", "PractitionerRole"]),
    field("managingOrganization", ORGANIZATION),
    field("link.other", &["Patient", "RelatedPerson"]),
];
const PRACTITIONER_FIELDS: &[ReferenceField] = &[];
const PRACTITIONER_ROLE_FIELDS: &[ReferenceField] = &[
    field("practitioner", &["Practitioner"]),
    field("organization", ORGANIZATION),
    field("location", &["Location"]),
];
const ORGANIZATION_FIELDS: &[ReferenceField] = &[field("partOf", ORGANIZATION)];
const RELATED_PERSON_FIELDS: &[ReferenceField] = &[field("patient", &["Patient"])];
const LOCATION_FIELDS: &[ReferenceField] = &[
    field("managingOrganization", ORGANIZATION),
    field("partOf", &["Location"]),
];
const ENCOUNTER_FIELDS: &[ReferenceField] = &[
    field("subject", SUBJECT),
    field("episodeOfCare", &["EpisodeOfCare"]),
    field("participant.individual", &["Practitioner", "PractitionerRole", "RelatedPerson"]),
    field("location.location", &["Location"]),
    field("serviceProvider", ORGANIZATION),
    field("partOf", ENCOUNTER),
];
const OBSERVATION_FIELDS: &[ReferenceField] = &[
    field(
        "subject",
        &[
            "Patient",
            "Group",
            "Device",
            "Location",
            "Organization",
            "Procedure",
            "Practitioner",
            "Medication",
            "Substance",
        ],
    ),
    field("encounter", ENCOUNTER),
    field("performer", PERFORMER),
    field("specimen", &["Specimen"]),
    field("device", &["Device", "DeviceMetric"]),
    field("hasMember", &["Observation", "QuestionnaireResponse", "MolecularSequence"]),
    field("derivedFrom", ANY),
    field("basedOn", ANY),
];
const CONDITION_FIELDS: &[ReferenceField] = &[
    field("subject", SUBJECT),
    field("encounter", ENCOUNTER),
    field("recorder", RECORDER),
    field("asserter", RECORDER),
];
const ALLERGY_INTOLERANCE_FIELDS: &[ReferenceField] = &[
    field("patient", &["Patient"]),
    field("encounter", ENCOUNTER),
    field("recorder", RECORDER),
    field("asserter", RECORDER),
];
const PROCEDURE_FIELDS: &[ReferenceField] = &[
    field("subject", SUBJECT),
    field("encounter", ENCOUNTER),
    field("recorder", RECORDER),
    field("performer.actor", PERFORMER),
    field("location", &["Location"]),
];
const MEDICATION_REQUEST_FIELDS: &[ReferenceField] = &[
    field("subject", SUBJECT),
    field("encounter", ENCOUNTER),
    field("medicationReference", &["Medication"]),
    field("requester", PERFORMER),
    field("performer", PERFORMER),
];
const IMMUNIZATION_FIELDS: &[ReferenceField] = &[
    field("patient", &["Patient"]),
    field("encounter", ENCOUNTER),
    field("performer.actor", CLINICIAN),
    field("location", &["Location"]),
];
const DIAGNOSTIC_REPORT_FIELDS: &[ReferenceField] = &[
    field("subject", SUBJECT),
    field("encounter", ENCOUNTER),
    field("performer", PERFORMER),
    field("result", &["Observation"]),
    field("specimen", &["Specimen"]),
];
const SPECIMEN_FIELDS: &[ReferenceField] = &[
    field("subject", SUBJECT),
    field("parent", &["Specimen"]),
];
const COMPOSITION_FIELDS: &[ReferenceField] = &[
    field("subject", ANY),
    field("encounter", ENCOUNTER),
    field("author", PERFORMER),
    field("custodian", ORGANIZATION),
    field("section.entry", ANY),
];

/// Record type → reference fields.
pub static REFERENCE_FIELDS: phf::Map<&'static str, &'static [ReferenceField]> = phf_map! {
    "Patient" => PATIENT_FIELDS,
    "Practitioner" => PRACTITIONER_FIELDS,
    "PractitionerRole" => PRACTITIONER_ROLE_FIELDS,
    "Organization" => ORGANIZATION_FIELDS,
    "RelatedPerson" => RELATED_PERSON_FIELDS,
    "Location" => LOCATION_FIELDS,
    "Encounter" => ENCOUNTER_FIELDS,
    "Observation" => OBSERVATION_FIELDS,
    "Condition" => CONDITION_FIELDS,
    "AllergyIntolerance" => ALLERGY_INTOLERANCE_FIELDS,
    "Procedure" => PROCEDURE_FIELDS,
    "MedicationRequest" => MEDICATION_REQUEST_FIELDS,
    "Immunization" => IMMUNIZATION_FIELDS,
    "DiagnosticReport" => DIAGNOSTIC_REPORT_FIELDS,
    "Specimen" => SPECIMEN_FIELDS,
    "Composition" => COMPOSITION_FIELDS,
};

pub fn reference_fields(resource_type: &str) -> &'static [ReferenceField] {
    REFERENCE_FIELDS.get(resource_type).copied().unwrap_or(&[])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferencePolicy {
    /// Absolute `http(s)` references not found in the bundle are accepted
    pub allow_external: bool,
}

impl Default for ReferencePolicy {
    fn default() -> Self {
        Self {
            allow_external: true,
        }
    }
}

impl From<&ReferencesConfig> for ReferencePolicy {
    fn from(config: &ReferencesConfig) -> Self {
        Self {
            allow_external: config.allow_external,
        }
    }
}

/// Where each record of a bundle can be reached from.
struct BundleIndex<'b> {
    by_full_url: HashMap<&'b str, &'b Record>,
    by_type_and_id: HashMap<String, &'b Record>,
}

impl<'b> BundleIndex<'b> {
    fn build(bundle: &'b ParsedBundle) -> Self {
        let mut by_full_url = HashMap::new();
        let mut by_type_and_id = HashMap::new();
        for record in bundle.records() {
            if let Some(url) = record.full_url() {
                by_full_url.insert(url, record);
            }
            if let Some(id) = record.id() {
                by_type_and_id.insert(format!("{}/{}", record.resource_type(), id), record);
            }
        }
        Self {
            by_full_url,
            by_type_and_id,
        }
    }

    fn resolve(&self, reference: &str) -> Option<&'b Record> {
        if let Some(record) = self.by_full_url.get(reference) {
            return Some(record);
        }
        type_and_id(reference).and_then(|key| self.by_type_and_id.get(&key).copied())
    }
}

/// `Type/id` taken from a relative or absolute reference, ignoring a
/// trailing `_history/{version}`.
fn type_and_id(reference: &str) -> Option<String> {
    if reference.starts_with("urn:") {
        return None;
    }
    let path = reference.split(['?', '#']).next().unwrap_or(reference);
    let mut parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() >= 4 && parts[parts.len() - 2] == "_history" {
        parts.truncate(parts.len() - 2);
    }
    match parts.as_slice() {
        [.., kind, id] if kind.starts_with(|c: char| c.is_ascii_uppercase()) => {
            Some(format!("{}/{}", kind, id))
        }
        _ => None,
    }
}

fn is_absolute(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

pub struct ReferenceResolver {
    policy: ReferencePolicy,
}

impl ReferenceResolver {
    pub fn new(policy: ReferencePolicy) -> Self {
        Self { policy }
    }

    pub fn validate(&self, bundle: &ParsedBundle) -> Vec<ValidationError> {
        let index = BundleIndex::build(bundle);
        let mut errors = Vec::new();
        let mut checked = 0usize;
        for record in bundle.records() {
            for field in reference_fields(record.resource_type()) {
                let Ok(path) = FieldPath::parse(field.path) else {
                    continue;
                };
                for m in navigate_all(record.tree(), &path, &record.locator_prefix()) {
                    checked += 1;
                    self.check_reference(record, field, m.node, &m.locator, &index, &mut errors);
                }
            }
        }
        tracing::debug!(references = checked, errors = errors.len(), "checked references");
        errors
    }

    fn check_reference(
        &self,
        record: &Record,
        field: &ReferenceField,
        node: &JsonValue,
        locator: &str,
        index: &BundleIndex<'_>,
        errors: &mut Vec<ValidationError>,
    ) {
        // Display- or identifier-only references have nothing to resolve.
        let Some(reference) = node.get("reference").and_then(JsonValue::as_str) else {
            return;
        };
        let reference = reference.trim();
        if reference.is_empty() || reference.starts_with('#') {
            return;
        }
        let locator = format!("{}/reference", locator);
        let error = |code: &str, message: String| {
            ValidationError::new(RULE_ID, RULE_TYPE, code, message)
                .with_resource_type(record.resource_type())
                .with_field_path(field.path)
                .with_entry(record.entry_index(), record.id())
                .with_locator(locator.clone())
                .with_detail("reference", reference)
        };

        let target_type = match index.resolve(reference) {
            Some(target) => target.resource_type().to_string(),
            None if is_absolute(reference) && self.policy.allow_external => {
                match type_and_id(reference) {
                    Some(key) => key.split('/').next().unwrap_or_default().to_string(),
                    None => return,
                }
            }
            None => {
                errors.push(error(
                    codes::REFERENCE_NOT_FOUND,
                    format!("{} '{}' does not resolve to an entry in the bundle", field.path, reference),
                ));
                return;
            }
        };

        let declared = node.get("type").and_then(JsonValue::as_str);
        let permitted = field.targets.is_empty() || field.targets.contains(&target_type.as_str());
        let consistent = declared.map_or(true, |d| d == target_type);
        if permitted && consistent {
            return;
        }
        let expected: Vec<&str> = match declared {
            Some(d) if permitted => vec![d],
            _ => field.targets.to_vec(),
        };
        errors.push(
            error(
                codes::REFERENCE_TYPE_MISMATCH,
                format!(
                    "{} '{}' points to a {}, expected {}",
                    field.path,
                    reference,
                    target_type,
                    expected.join(" | ")
                ),
            )
            .with_detail("actualType", target_type.as_str())
            .with_detail("expectedTypes", expected),
        );
    }
}

impl Default for ReferenceResolver {
    fn default() -> Self {
        Self::new(ReferencePolicy::default())
    }
}
