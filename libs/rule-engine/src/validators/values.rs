//! Presence and value checks: Required, FixedValue, AllowedValues.

use super::{display_text, Target};
use crate::error::RuleFailure;
use crate::navigator::{navigate_all, navigate_one, nominal_locator, NavNode};
use bundlecheck_model::{codes, RuleDefinition, ValidationError};

/// Fails once when the path matches nothing or only blank values.
pub fn check_required<N: NavNode>(root: &N, target: &Target<'_>, out: &mut Vec<ValidationError>) {
    let prefix = target.prefix();
    let matches = navigate_all(root, target.path, &prefix);
    if matches.iter().any(|m| !m.node.is_blank()) {
        return;
    }

    let (reason, locator) = match matches.first() {
        Some(first) => ("blank", first.locator.clone()),
        None => ("absent", absent_locator(root, target, &prefix)),
    };
    out.push(
        target
            .error(
                codes::FIELD_REQUIRED,
                format!("{} is required", target.path),
            )
            .with_locator(locator)
            .with_detail("reason", reason),
    );
}

/// Where a missing field would sit: under the first existing parent when there
/// is one, otherwise spelled out from segment names.
fn absent_locator<N: NavNode>(root: &N, target: &Target<'_>, prefix: &str) -> String {
    let segments = target.path.segments();
    let Some(last) = target.path.last() else {
        return prefix.to_string();
    };
    match target.path.parent() {
        None => format!("{}/{}", prefix, last.name),
        Some(parent) => match navigate_one(root, &parent, prefix) {
            Some(found) => format!("{}/{}", found.locator, last.name),
            None => nominal_locator(prefix, segments),
        },
    }
}

#[derive(Debug, Clone)]
pub struct FixedValue {
    expected: String,
}

impl FixedValue {
    pub fn from_rule(rule: &RuleDefinition) -> Result<Self, RuleFailure> {
        Ok(Self {
            expected: rule.params.require_scalar_text("value")?,
        })
    }

    pub fn run<N: NavNode>(&self, root: &N, target: &Target<'_>, out: &mut Vec<ValidationError>) {
        for m in navigate_all(root, target.path, &target.prefix()) {
            if m.node.scalar_text().as_deref() == Some(self.expected.as_str()) {
                continue;
            }
            let actual = display_text(m.node);
            out.push(
                target
                    .error(
                        codes::FIXED_VALUE_MISMATCH,
                        format!("{} must be '{}' but was '{}'", target.path, self.expected, actual),
                    )
                    .with_locator(m.locator)
                    .with_detail("expected", self.expected.as_str())
                    .with_detail("actual", actual),
            );
        }
    }
}

#[derive(Debug, Clone)]
pub struct AllowedValues {
    values: Vec<String>,
}

impl AllowedValues {
    pub fn from_rule(rule: &RuleDefinition) -> Result<Self, RuleFailure> {
        let values = rule
            .params
            .string_list("values")?
            .ok_or_else(|| RuleFailure::configuration("parameter 'values' is required"))?;
        if values.is_empty() {
            return Err(RuleFailure::configuration("parameter 'values' must not be empty"));
        }
        Ok(Self { values })
    }

    pub fn run<N: NavNode>(&self, root: &N, target: &Target<'_>, out: &mut Vec<ValidationError>) {
        for m in navigate_all(root, target.path, &target.prefix()) {
            let allowed = m
                .node
                .scalar_text()
                .is_some_and(|text| self.values.iter().any(|v| *v == text));
            if allowed {
                continue;
            }
            let actual = display_text(m.node);
            out.push(
                target
                    .error(
                        codes::VALUE_NOT_ALLOWED,
                        format!("'{}' is not an allowed value for {}", actual, target.path),
                    )
                    .with_locator(m.locator)
                    .with_detail("actual", actual)
                    .with_detail("allowed", self.values.clone()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::testing::run_both;
    use crate::validators::Check;
    use bundlecheck_model::{Params, RuleType};
    use serde_json::json;

    fn required(path: &str) -> RuleDefinition {
        RuleDefinition::new("req", RuleType::Required, "Patient", path)
    }

    #[test]
    fn test_required_present() {
        let errors = run_both(
            &Check::Required,
            &required("name.family"),
            json!({"resourceType": "Patient", "name": [{"family": "Doe"}]}),
        );
        assert!(errors.is_empty());
    }

    #[test]
    fn test_required_absent_under_existing_parent() {
        let errors = run_both(
            &Check::Required,
            &required("name.family"),
            json!({"resourceType": "Patient", "name": [{"given": ["A"]}]}),
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_code, codes::FIELD_REQUIRED);
        assert_eq!(errors[0].locator.as_deref(), Some("/entry/0/resource/name/family"));
        assert_eq!(errors[0].detail("reason"), Some(&json!("absent")));
        assert_eq!(errors[0].entry_index, Some(0));
    }

    #[test]
    fn test_required_absent_parent() {
        let errors = run_both(
            &Check::Required,
            &required("contact.name.family"),
            json!({"resourceType": "Patient"}),
        );
        assert_eq!(errors[0].locator.as_deref(), Some("/entry/0/resource/contact/name/family"));
    }

    #[test]
    fn test_required_with_emptied_repetition() {
        let patient = json!({"resourceType": "Patient", "name": [{"given": []}, {"family": "Doe"}]});
        assert!(bundlecheck_model::typed::map_resource(&patient).is_ok());
        assert!(run_both(&Check::Required, &required("name"), patient).is_empty());

        let errors = run_both(&Check::Required, &required("name.family"), json!({
            "resourceType": "Patient",
            "name": [{"given": []}, {"given": ["A"]}]
        }));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].locator.as_deref(), Some("/entry/0/resource/name/0/family"));
    }

    #[test]
    fn test_required_blank() {
        let errors = run_both(
            &Check::Required,
            &required("gender"),
            json!({"resourceType": "Patient", "gender": "  "}),
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].detail("reason"), Some(&json!("blank")));
        assert_eq!(errors[0].locator.as_deref(), Some("/entry/0/resource/gender"));
    }

    #[test]
    fn test_fixed_value_reports_each_mismatch() {
        let rule = RuleDefinition::new("fixed", RuleType::FixedValue, "Patient", "identifier.system")
            .with_params(Params::new().with("value", "urn:mrn"));
        let check = Check::FixedValue(FixedValue::from_rule(&rule).unwrap());
        let errors = run_both(
            &check,
            &rule,
            json!({"resourceType": "Patient", "identifier": [
                {"system": "urn:mrn"}, {"system": "urn:other"}, {"system": "urn:x"}
            ]}),
        );
        let locators: Vec<_> = errors.iter().filter_map(|e| e.locator.as_deref()).collect();
        assert_eq!(
            locators,
            vec![
                "/entry/0/resource/identifier/1/system",
                "/entry/0/resource/identifier/2/system"
            ]
        );
        assert_eq!(errors[0].detail("actual"), Some(&json!("urn:other")));
    }

    #[test]
    fn test_fixed_value_compares_scalars_by_text() {
        let rule = RuleDefinition::new("fixed", RuleType::FixedValue, "Patient", "active")
            .with_params(Params::new().with("value", true));
        let check = Check::FixedValue(FixedValue::from_rule(&rule).unwrap());
        assert!(run_both(&check, &rule, json!({"resourceType": "Patient", "active": true})).is_empty());
        assert_eq!(
            run_both(&check, &rule, json!({"resourceType": "Patient", "active": false})).len(),
            1
        );
    }

    #[test]
    fn test_fixed_value_requires_value() {
        let rule = RuleDefinition::new("fixed", RuleType::FixedValue, "Patient", "active");
        let err = FixedValue::from_rule(&rule).unwrap_err();
        assert_eq!(err.error_code(), codes::RULE_CONFIGURATION_ERROR);
    }

    #[test]
    fn test_allowed_values() {
        let rule = RuleDefinition::new("allowed", RuleType::AllowedValues, "Patient", "gender")
            .with_params(Params::new().with("values", json!(["male", "female"])));
        let check = Check::AllowedValues(AllowedValues::from_rule(&rule).unwrap());
        assert!(run_both(&check, &rule, json!({"resourceType": "Patient", "gender": "male"})).is_empty());

        let errors = run_both(&check, &rule, json!({"resourceType": "Patient", "gender": "other"}));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_code, codes::VALUE_NOT_ALLOWED);
        assert_eq!(errors[0].locator.as_deref(), Some("/entry/0/resource/gender"));
    }

    #[test]
    fn test_allowed_values_rejects_empty_list() {
        let rule = RuleDefinition::new("allowed", RuleType::AllowedValues, "Patient", "gender")
            .with_params(Params::new().with("values", json!([])));
        assert!(matches!(
            AllowedValues::from_rule(&rule),
            Err(RuleFailure::Configuration { .. })
        ));
    }

    #[test]
    fn test_non_scalar_match_reports_json() {
        let rule = RuleDefinition::new("allowed", RuleType::AllowedValues, "Patient", "name")
            .with_params(Params::new().with("values", json!(["x"])));
        let check = Check::AllowedValues(AllowedValues::from_rule(&rule).unwrap());
        let errors = run_both(&check, &rule, json!({"resourceType": "Patient", "name": {"text": "A"}}));
        assert_eq!(errors[0].detail("actual"), Some(&json!("{\"text\":\"A\"}")));
    }
}
