//! CodeSystem validator
//!
//! Closed-world check: a coding must name the configured system and carry a
//! code from the resolved concept set. Matches may be CodeableConcepts
//! (every `coding` is checked), Codings, or bare code strings.

use super::Target;
use crate::error::RuleFailure;
use crate::navigator::{child_locator, navigate_all, NavNode};
use crate::terminology::ConceptSetCache;
use bundlecheck_model::{codes, ConceptSet, RuleDefinition, ValidationError};
use serde_json::Value as JsonValue;
use std::sync::Arc;

pub struct CodeSystemCheck {
    system: String,
    concepts: Arc<ConceptSet>,
}

impl CodeSystemCheck {
    pub async fn prepare(rule: &RuleDefinition, concepts: &ConceptSetCache) -> Result<Self, RuleFailure> {
        let system = rule.params.require_str("system")?.trim().to_string();
        if let Some(inline) = rule.params.string_list("codes")? {
            return Ok(Self::with_concepts(system.clone(), ConceptSet::from_codes(system, inline)));
        }
        let code_set_id = rule.params.str("codeSetId")?.map(str::trim).filter(|s| !s.is_empty());
        let resolved = concepts.resolve(&system, code_set_id).await.map_err(|e| {
            tracing::warn!(rule = %rule.id, system = %system, error = %e, "concept set lookup failed");
            RuleFailure::configuration(format!("concept set for '{}' could not be resolved: {}", system, e))
        })?;
        Ok(Self {
            system,
            concepts: resolved,
        })
    }

    pub fn with_concepts(system: impl Into<String>, concepts: ConceptSet) -> Self {
        Self {
            system: system.into(),
            concepts: Arc::new(concepts),
        }
    }

    pub fn run<N: NavNode>(&self, root: &N, target: &Target<'_>, out: &mut Vec<ValidationError>) {
        for m in navigate_all(root, target.path, &target.prefix()) {
            if let Some(code) = m.node.scalar_text() {
                self.check_code(Some(&code), &m.locator, target, out);
                continue;
            }
            let codings = m.node.child_nodes("coding");
            if codings.is_empty() {
                self.check_coding(m.node, &m.locator, target, out);
                continue;
            }
            let count = codings.len();
            for (index, coding) in codings.into_iter().enumerate() {
                let locator = child_locator(&m.locator, "coding", index, count);
                self.check_coding(coding, &locator, target, out);
            }
        }
    }

    fn check_coding<N: NavNode>(&self, coding: &N, locator: &str, target: &Target<'_>, out: &mut Vec<ValidationError>) {
        let system = first_text(coding, "system");
        if system.as_deref() != Some(self.system.as_str()) {
            out.push(
                target
                    .error(
                        codes::CODESYSTEM_MISMATCH,
                        format!(
                            "coding system {} does not match expected '{}'",
                            system.as_deref().map_or("(none)".to_string(), |s| format!("'{}'", s)),
                            self.system
                        ),
                    )
                    .with_locator(locator)
                    .with_detail("expectedSystem", self.system.as_str())
                    .with_detail("actualSystem", system.map_or(JsonValue::Null, JsonValue::from)),
            );
            return;
        }
        let code = first_text(coding, "code");
        self.check_code(code.as_deref(), locator, target, out);
    }

    fn check_code(&self, code: Option<&str>, locator: &str, target: &Target<'_>, out: &mut Vec<ValidationError>) {
        let code = code.map(str::trim).filter(|c| !c.is_empty());
        if code.is_some_and(|c| self.concepts.contains(c)) {
            return;
        }
        let message = match code {
            Some(code) => format!("code '{}' is not in {}", code, self.concepts.url()),
            None => format!("a code from {} is required", self.concepts.url()),
        };
        out.push(
            target
                .error(codes::CODE_NOT_IN_VALUESET, message)
                .with_locator(locator)
                .with_detail("system", self.system.as_str())
                .with_detail("codeSet", self.concepts.url())
                .with_detail("code", code.map_or(JsonValue::Null, JsonValue::from)),
        );
    }
}

fn first_text<N: NavNode>(node: &N, name: &str) -> Option<String> {
    node.child_nodes(name)
        .first()
        .and_then(|child| child.scalar_text())
        .map(|text| text.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminology::InMemoryTerminology;
    use crate::validators::testing::run_both;
    use crate::validators::Check;
    use bundlecheck_model::{Params, RuleType};
    use serde_json::json;
    use std::time::Duration;

    const COLORS: &str = "http://example.org/cs/colors";

    fn rule(path: &str) -> RuleDefinition {
        RuleDefinition::new("color", RuleType::CodeSystem, "Observation", path)
            .with_params(Params::new().with("system", COLORS))
    }

    fn check() -> Check {
        Check::CodeSystem(CodeSystemCheck::with_concepts(
            COLORS,
            ConceptSet::from_codes(COLORS, ["red", "blue"]),
        ))
    }

    #[test]
    fn test_codeable_concept_codings() {
        let r = rule("code");
        let errors = run_both(
            &check(),
            &r,
            json!({"resourceType": "Observation", "code": {"coding": [
                {"system": COLORS, "code": "red"},
                {"system": COLORS, "code": "purple"},
                {"system": "http://other", "code": "red"}
            ]}}),
        );
        let found: Vec<_> = errors
            .iter()
            .map(|e| (e.error_code.as_str(), e.locator.as_deref().unwrap_or_default()))
            .collect();
        assert_eq!(
            found,
            vec![
                (codes::CODE_NOT_IN_VALUESET, "/entry/0/resource/code/coding/1"),
                (codes::CODESYSTEM_MISMATCH, "/entry/0/resource/code/coding/2"),
            ]
        );
    }

    #[test]
    fn test_single_coding_has_no_index() {
        let errors = run_both(
            &check(),
            &rule("code"),
            json!({"resourceType": "Observation", "code": {"coding": [{"system": COLORS, "code": "green"}]}}),
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].locator.as_deref(), Some("/entry/0/resource/code/coding"));
        assert_eq!(errors[0].detail("code"), Some(&json!("green")));
    }

    #[test]
    fn test_right_system_unknown_code_only_reports_membership() {
        let errors = run_both(
            &check(),
            &rule("code.coding"),
            json!({"resourceType": "Observation", "code": {"coding": [{"system": COLORS, "code": "zzz"}]}}),
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_code, codes::CODE_NOT_IN_VALUESET);
    }

    #[test]
    fn test_missing_system_and_missing_code() {
        let errors = run_both(
            &check(),
            &rule("code.coding"),
            json!({"resourceType": "Observation", "code": {"coding": [{"code": "red"}, {"system": COLORS}]}}),
        );
        let kinds: Vec<_> = errors.iter().map(|e| e.error_code.as_str()).collect();
        assert_eq!(kinds, vec![codes::CODESYSTEM_MISMATCH, codes::CODE_NOT_IN_VALUESET]);
        assert_eq!(errors[0].detail("actualSystem"), Some(&JsonValue::Null));
    }

    #[test]
    fn test_bare_code() {
        let r = RuleDefinition::new("status", RuleType::CodeSystem, "Observation", "status")
            .with_params(Params::new().with("system", COLORS));
        let errors = run_both(&check(), &r, json!({"resourceType": "Observation", "status": "blue"}));
        assert!(errors.is_empty());
        let errors = run_both(&check(), &r, json!({"resourceType": "Observation", "status": "final"}));
        assert_eq!(errors[0].error_code, codes::CODE_NOT_IN_VALUESET);
    }

    #[tokio::test]
    async fn test_prepare_resolves_and_reports_lookup_failure() {
        let mut terminology = InMemoryTerminology::new();
        terminology.add_concept_set(ConceptSet::from_codes(COLORS, ["red"]));
        let cache = ConceptSetCache::new(Arc::new(terminology), "p1", Duration::from_secs(1), 8);

        let prepared = CodeSystemCheck::prepare(&rule("code"), &cache).await.ok().unwrap();
        assert!(prepared.concepts.contains("red"));

        let unknown = RuleDefinition::new("x", RuleType::CodeSystem, "Observation", "code")
            .with_params(Params::new().with("system", "http://unknown"));
        let err = CodeSystemCheck::prepare(&unknown, &cache).await.err().unwrap();
        assert_eq!(err.error_code(), codes::RULE_CONFIGURATION_ERROR);

        let inline = RuleDefinition::new("x", RuleType::CodeSystem, "Observation", "code").with_params(
            Params::new()
                .with("system", "http://unknown")
                .with("codes", json!(["a"])),
        );
        assert!(CodeSystemCheck::prepare(&inline, &cache).await.is_ok());

        let missing = RuleDefinition::new("x", RuleType::CodeSystem, "Observation", "code");
        assert!(CodeSystemCheck::prepare(&missing, &cache).await.is_err());
    }
}
