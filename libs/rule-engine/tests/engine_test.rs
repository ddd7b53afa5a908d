//! End-to-end runs of the engine over small bundles.

use async_trait::async_trait;
use bundlecheck_engine::{
    CancelToken, EngineConfig, InMemoryTerminology, Lane, RuleEngine, TerminologyError, TerminologyService,
    FallbackReason,
};
use bundlecheck_model::{
    codes, ConceptSet, InstanceScope, ParsedBundle, Params, RuleDefinition, RuleSet, RuleType, Severity,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn bundle(resources: Vec<Value>) -> ParsedBundle {
    let entries: Vec<Value> = resources
        .into_iter()
        .enumerate()
        .map(|(i, r)| json!({"fullUrl": format!("urn:uuid:{}", i), "resource": r}))
        .collect();
    ParsedBundle::from_value(&json!({"resourceType": "Bundle", "type": "collection", "entry": entries})).unwrap()
}

fn rules(rules: Vec<RuleDefinition>) -> RuleSet {
    RuleSet::new("test-project", rules)
}

fn engine() -> RuleEngine {
    RuleEngine::new(EngineConfig::default()).unwrap()
}

fn codes_of(errors: &[bundlecheck_model::ValidationError]) -> Vec<&str> {
    errors.iter().map(|e| e.error_code.as_str()).collect()
}

#[tokio::test]
async fn required_absent_blank_and_present() {
    let parsed = bundle(vec![
        json!({"resourceType": "Patient", "id": "a"}),
        json!({"resourceType": "Patient", "id": "b", "gender": ""}),
        json!({"resourceType": "Patient", "id": "c", "gender": "female"}),
    ]);
    let set = rules(vec![RuleDefinition::new("gender", RuleType::Required, "Patient", "gender")]);
    let report = engine().validate(&parsed, &set).await;

    assert_eq!(report.errors.len(), 2);
    assert!(report.errors.iter().all(|e| e.error_code == codes::FIELD_REQUIRED));
    let ids: Vec<_> = report.errors.iter().filter_map(|e| e.resource_id.as_deref()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(report.errors[0].locator.as_deref(), Some("/entry/0/resource/gender"));
    assert_eq!(report.errors[1].locator.as_deref(), Some("/entry/1/resource/gender"));
    assert_eq!(report.rules_evaluated, 1);
    assert!(!report.cancelled);
}

#[tokio::test]
async fn allowed_values_are_deterministic() {
    let parsed = bundle(
        (0..12)
            .map(|i| json!({"resourceType": "Patient", "gender": if i % 3 == 0 { "male" } else { "x" }}))
            .collect(),
    );
    let set = rules(vec![
        RuleDefinition::new("gender-set", RuleType::AllowedValues, "Patient", "gender")
            .with_params(Params::new().with("values", json!(["male", "female"]))),
        RuleDefinition::new("gender-present", RuleType::Required, "Patient", "gender"),
    ]);
    let engine = engine();
    let first = serde_json::to_value(&engine.validate(&parsed, &set).await.errors).unwrap();
    for _ in 0..5 {
        let again = serde_json::to_value(&engine.validate(&parsed, &set).await.errors).unwrap();
        assert_eq!(first, again);
    }
    assert_eq!(first.as_array().unwrap().len(), 8);
}

#[tokio::test]
async fn required_resources_exact_mode() {
    let parsed = bundle(vec![
        json!({"resourceType": "Patient", "id": "p1"}),
        json!({"resourceType": "Patient", "id": "p2"}),
    ]);
    let set = rules(vec![RuleDefinition::new(
        "one-patient",
        RuleType::RequiredResources,
        "Bundle",
        "",
    )
    .with_params(Params::new().with("requirements", json!([{"resourceType": "Patient", "min": 1, "max": 1}])))]);
    let report = engine().validate(&parsed, &set).await;

    assert_eq!(codes_of(&report.errors), vec![codes::RESOURCE_REQUIREMENT_VIOLATION]);
    let error = &report.errors[0];
    assert!(error.is_bundle_level());
    let diff = error.detail("diff").unwrap();
    assert_eq!(diff["missing"], json!([]));
    assert_eq!(diff["countMismatch"][0]["resourceType"], "Patient");
}

#[tokio::test]
async fn array_length_boundaries() {
    let patient = |n: usize| {
        let names: Vec<Value> = (0..n).map(|i| json!({"family": format!("F{}", i)})).collect();
        if names.is_empty() {
            json!({"resourceType": "Patient"})
        } else {
            json!({"resourceType": "Patient", "name": names})
        }
    };
    let parsed = bundle(vec![patient(0), patient(3), patient(4)]);
    let set = rules(vec![RuleDefinition::new("names", RuleType::ArrayLength, "Patient", "name")
        .with_params(Params::new().with("min", 1u64).with("max", 3u64))]);
    let report = engine().validate(&parsed, &set).await;

    assert_eq!(report.errors.len(), 2);
    let by_entry: Vec<_> = report
        .errors
        .iter()
        .map(|e| (e.entry_index, e.detail("bound").cloned(), e.detail("actual").cloned()))
        .collect();
    assert_eq!(
        by_entry,
        vec![
            (Some(0), Some(json!("min")), Some(json!(0))),
            (Some(2), Some(json!("max")), Some(json!(4))),
        ]
    );
}

#[tokio::test]
async fn one_broken_rule_does_not_stop_the_others() {
    let parsed = bundle(vec![json!({"resourceType": "Patient", "id": "p1"})]);
    let mut definitions: Vec<RuleDefinition> = (0..9)
        .map(|i| RuleDefinition::new(format!("valid-{}", i), RuleType::Required, "Patient", format!("field{}", i)))
        .collect();
    definitions.insert(4, RuleDefinition::new("broken", RuleType::Required, "Patient", "name..family"));
    let report = engine().validate(&parsed, &rules(definitions)).await;

    assert_eq!(report.errors.len(), 10);
    assert_eq!(report.rules_evaluated, 10);
    let definition_errors: Vec<_> = report.with_code(codes::RULE_DEFINITION_ERROR).collect();
    assert_eq!(definition_errors.len(), 1);
    assert_eq!(definition_errors[0].rule_id, "broken");
    assert_eq!(definition_errors[0].detail("category"), Some(&json!("syntax")));
    assert!(definition_errors[0].detail("hint").is_some());
    assert_eq!(report.with_code(codes::FIELD_REQUIRED).count(), 9);
}

#[tokio::test]
async fn code_system_closed_world() {
    let mut terminology = InMemoryTerminology::new();
    terminology.add_concept_set(ConceptSet::from_codes("http://loinc.org", ["8867-4", "8480-6"]));
    let engine = engine().with_terminology(Arc::new(terminology));

    let parsed = bundle(vec![json!({
        "resourceType": "Observation",
        "status": "final",
        "code": {"coding": [{"system": "http://loinc.org", "code": "0000-0"}]}
    })]);
    let set = rules(vec![RuleDefinition::new("loinc", RuleType::CodeSystem, "Observation", "code")
        .with_params(Params::new().with("system", "http://loinc.org"))]);
    let report = engine.validate(&parsed, &set).await;

    assert_eq!(codes_of(&report.errors), vec![codes::CODE_NOT_IN_VALUESET]);
    assert_eq!(report.errors[0].locator.as_deref(), Some("/entry/0/resource/code/coding"));
}

#[tokio::test]
async fn unknown_code_system_is_a_configuration_error() {
    let parsed = bundle(vec![json!({"resourceType": "Observation", "code": {"coding": [{"system": "s", "code": "c"}]}})]);
    let set = rules(vec![RuleDefinition::new("cs", RuleType::CodeSystem, "Observation", "code")
        .with_params(Params::new().with("system", "http://nowhere"))]);
    let report = engine().validate(&parsed, &set).await;
    assert_eq!(codes_of(&report.errors), vec![codes::RULE_CONFIGURATION_ERROR]);
}

#[tokio::test]
async fn missing_parameters_are_reported_not_skipped() {
    let parsed = bundle(vec![json!({"resourceType": "Patient", "gender": "male"})]);
    let set = rules(vec![
        RuleDefinition::new("fixed", RuleType::FixedValue, "Patient", "gender"),
        RuleDefinition::new("pattern", RuleType::Regex, "Patient", "gender"),
        RuleDefinition::new("custom", RuleType::CustomPathExpression, "Patient", "gender = 'male'"),
    ]);
    let report = engine().validate(&parsed, &set).await;
    assert_eq!(
        codes_of(&report.errors),
        vec![codes::RULE_CONFIGURATION_ERROR; 3]
    );
}

#[tokio::test]
async fn custom_expression_runtime_failure_is_per_record() {
    let parsed = bundle(vec![
        json!({"resourceType": "Patient", "name": [{"family": "A"}]}),
        json!({"resourceType": "Patient", "name": [{"family": "A"}, {"family": "B"}]}),
    ]);
    let set = rules(vec![RuleDefinition::new("short-name", RuleType::CustomPathExpression, "Patient", "")
        .with_params(Params::new().with("expression", "name.family.length() < 5"))
        .with_error_code("NAME_TOO_LONG")]);
    let report = engine().validate(&parsed, &set).await;

    assert_eq!(codes_of(&report.errors), vec![codes::RULE_DEFINITION_ERROR]);
    assert_eq!(report.errors[0].entry_index, Some(1));
    assert_eq!(report.errors[0].detail("category"), Some(&json!("runtime")));
}

#[tokio::test]
async fn filtered_scope_selects_records() {
    let parsed = bundle(vec![
        json!({"resourceType": "Observation", "status": "final"}),
        json!({"resourceType": "Observation", "status": "preliminary"}),
    ]);
    let set = rules(vec![RuleDefinition::new("value", RuleType::Required, "Observation", "value[x]")
        .with_scope(InstanceScope::FilteredInstances {
            predicate_expression: "status = 'final'".into(),
        })]);
    let report = engine().validate(&parsed, &set).await;
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].entry_index, Some(0));
    assert_eq!(report.errors[0].locator.as_deref(), Some("/entry/0/resource/value"));
}

#[tokio::test]
async fn lanes_are_recorded() {
    let parsed = bundle(vec![
        json!({"resourceType": "Patient", "gender": "male"}),
        json!({"resourceType": "Patient", "gender": "male", "birthDate": "not-a-date"}),
    ]);
    let set = rules(vec![RuleDefinition::new("gender", RuleType::Required, "Patient", "gender")]);
    let engine = engine();
    let report = engine.validate(&parsed, &set).await;

    assert!(report.errors.is_empty());
    assert_eq!(report.lanes.len(), 2);
    assert_eq!(report.lanes[0].lane, Lane::Strict);
    assert_eq!(report.lanes[1].lane, Lane::BestEffort);
    assert_eq!(report.lanes[1].reasons, vec![FallbackReason::TypedParseFailed]);
    assert_eq!(engine.plan(&parsed, &set), report.lanes);
}

#[tokio::test]
async fn references_are_merged_into_the_report() {
    let parsed = bundle(vec![json!({"resourceType": "Observation", "subject": {"reference": "urn:uuid:nope"}})]);
    let report = engine().validate(&parsed, &rules(Vec::new())).await;
    assert_eq!(codes_of(&report.errors), vec![codes::REFERENCE_NOT_FOUND]);

    let mut config = EngineConfig::default();
    config.references.enabled = false;
    let quiet = RuleEngine::new(config).unwrap();
    assert!(quiet.validate(&parsed, &rules(Vec::new())).await.errors.is_empty());
}

#[tokio::test]
async fn cancelled_run_stops_before_rules() {
    let parsed = bundle(vec![json!({"resourceType": "Patient"})]);
    let set = rules(vec![RuleDefinition::new("gender", RuleType::Required, "Patient", "gender")]);
    let token = CancelToken::new();
    token.cancel();
    let report = engine().validate_with_cancel(&parsed, &set, &token).await;
    assert!(report.cancelled);
    assert_eq!(report.rules_evaluated, 0);
    assert!(report.errors.is_empty());
}

struct Panicking;

#[async_trait]
impl TerminologyService for Panicking {
    async fn get_code_system_by_url(&self, _project: &str, _url: &str) -> Result<Option<ConceptSet>, TerminologyError> {
        panic!("terminology backend exploded")
    }
}

#[tokio::test]
async fn panics_are_isolated() {
    let parsed = bundle(vec![json!({"resourceType": "Patient", "gender": "unknown"})]);
    let set = rules(vec![
        RuleDefinition::new("cs", RuleType::CodeSystem, "Patient", "gender")
            .with_params(Params::new().with("system", "http://hl7.org/fhir/administrative-gender")),
        RuleDefinition::new("birth", RuleType::Required, "Patient", "birthDate"),
    ]);
    let report = engine().with_terminology(Arc::new(Panicking)).validate(&parsed, &set).await;

    assert_eq!(
        codes_of(&report.errors),
        vec![codes::RULE_EXECUTION_ERROR, codes::FIELD_REQUIRED]
    );
    assert!(report.errors[0].message.contains("terminology backend exploded"));
}

#[tokio::test]
async fn warnings_do_not_count_as_errors() {
    let parsed = bundle(vec![json!({"resourceType": "Patient"})]);
    let set = rules(vec![
        RuleDefinition::new("gender", RuleType::Required, "Patient", "gender").with_severity(Severity::Warning)
    ]);
    let report = engine().validate(&parsed, &set).await;
    assert_eq!(report.errors.len(), 1);
    assert!(!report.has_errors());
    assert_eq!(report.warning_count(), 1);
}

#[tokio::test]
async fn broken_rules_surface_without_matching_records() {
    let parsed = bundle(vec![json!({"resourceType": "Observation", "status": "final"})]);
    let set = rules(vec![
        RuleDefinition::new("fixed", RuleType::FixedValue, "Patient", "gender"),
        RuleDefinition::new("path", RuleType::Required, "Patient", "name..family"),
        RuleDefinition::new("fine", RuleType::Required, "Patient", "gender"),
    ]);
    let report = engine().validate(&parsed, &set).await;

    assert_eq!(
        codes_of(&report.errors),
        vec![codes::RULE_CONFIGURATION_ERROR, codes::RULE_DEFINITION_ERROR]
    );
    assert_eq!(report.errors[0].rule_id, "fixed");
    assert_eq!(report.errors[1].rule_id, "path");
    assert!(report.errors.iter().all(|e| e.entry_index.is_none() && e.locator.is_none()));
    assert!(report.lanes.is_empty());
}

#[tokio::test]
async fn configured_error_code_does_not_replace_fixed_codes() {
    let parsed = bundle(vec![json!({"resourceType": "Patient", "gender": "x", "id": "p-1"})]);
    let set = rules(vec![
        RuleDefinition::new("birth", RuleType::Required, "Patient", "birthDate").with_error_code("MY_CODE"),
        RuleDefinition::new("gender", RuleType::AllowedValues, "Patient", "gender")
            .with_params(Params::new().with("values", json!(["male", "female"])))
            .with_error_code("MY_CODE"),
        RuleDefinition::new("id", RuleType::Regex, "Patient", "id")
            .with_params(Params::new().with("pattern", "^[0-9]+$"))
            .with_error_code("MY_CODE"),
    ]);
    let report = engine().validate(&parsed, &set).await;

    assert_eq!(
        codes_of(&report.errors),
        vec![codes::FIELD_REQUIRED, codes::VALUE_NOT_ALLOWED, codes::PATTERN_MISMATCH]
    );
    assert_eq!(report.with_code("MY_CODE").count(), 0);
}

#[tokio::test]
async fn emptied_repetitions_stay_on_the_strict_lane_and_agree() {
    let parsed = bundle(vec![json!({"resourceType": "Patient", "name": [{"given": []}, {"family": "Doe"}]})]);
    let set = rules(vec![
        RuleDefinition::new("name", RuleType::Required, "Patient", "name"),
        RuleDefinition::new("names", RuleType::ArrayLength, "Patient", "name")
            .with_params(Params::new().with("max", 1u64)),
    ]);
    let report = engine().validate(&parsed, &set).await;

    assert!(report.lanes.iter().all(|d| d.lane == Lane::Strict));
    assert_eq!(codes_of(&report.errors), vec![codes::ARRAY_LENGTH_VIOLATION]);
    assert_eq!(report.errors[0].detail("actual"), Some(&json!(2)));
    assert_eq!(report.errors[0].locator.as_deref(), Some("/entry/0/resource/name"));
}
