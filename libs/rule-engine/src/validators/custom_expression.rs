//! CustomPathExpression validator
//!
//! The expression must yield a non-empty collection of `true`. Anything else,
//! empty included, is a single failure reported with the rule's own code.

use super::Target;
use crate::error::RuleFailure;
use bundlecheck_model::{RuleDefinition, ValidationError};
use bundlecheck_pathexpr::{CompiledExpr, Engine, Value};
use serde_json::Value as JsonValue;
use std::sync::Arc;

pub struct CustomExpression {
    expression: Arc<CompiledExpr>,
    error_code: String,
}

impl CustomExpression {
    pub fn from_rule(rule: &RuleDefinition, expressions: &Engine) -> Result<Self, RuleFailure> {
        let error_code = rule
            .configured_error_code()
            .ok_or_else(|| RuleFailure::configuration("custom expression rules must set 'errorCode'"))?
            .to_string();
        let source = expression_source(rule)
            .ok_or_else(|| RuleFailure::configuration("parameter 'expression' or a field path is required"))?;
        let expression = expressions.compile(source)?;
        Ok(Self {
            expression,
            error_code,
        })
    }

    pub fn run(
        &self,
        target: &Target<'_>,
        expressions: &Engine,
        out: &mut Vec<ValidationError>,
    ) -> Result<(), RuleFailure> {
        let result = expressions.evaluate(&self.expression, target.record.tree())?;
        let passed = !result.is_empty() && result.iter().all(|v| matches!(v, Value::Boolean(true)));
        if passed {
            return Ok(());
        }

        let outcome: Vec<JsonValue> = result.iter().map(Value::to_json).collect();
        out.push(
            target
                .error(
                    &self.error_code,
                    format!("expression '{}' did not evaluate to true", self.expression.source()),
                )
                .with_locator(target.prefix())
                .with_detail("expression", self.expression.source())
                .with_detail("result", outcome),
        );
        Ok(())
    }
}

/// `params.expression`, falling back to the rule's field path.
fn expression_source(rule: &RuleDefinition) -> Option<&str> {
    rule.params
        .get("expression")
        .and_then(|v| v.as_str())
        .or(Some(rule.field_path.as_str()))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DefinitionCategory;
    use crate::navigator::FieldPath;
    use bundlecheck_model::{codes, Params, Record, RuleType};
    use serde_json::json;

    fn rule(expression: &str) -> RuleDefinition {
        RuleDefinition::new("custom", RuleType::CustomPathExpression, "Patient", "")
            .with_params(Params::new().with("expression", expression))
            .with_error_code("PATIENT_NEEDS_NAME")
    }

    fn run(rule: &RuleDefinition, resource: JsonValue) -> Result<Vec<ValidationError>, RuleFailure> {
        let engine = Engine::new();
        let check = CustomExpression::from_rule(rule, &engine)?;
        let record = Record::new(3, None, resource);
        let path = FieldPath::root();
        let target = Target {
            rule,
            record: &record,
            path: &path,
        };
        let mut out = Vec::new();
        check.run(&target, &engine, &mut out)?;
        Ok(out)
    }

    #[test]
    fn test_true_passes() {
        let errors = run(&rule("name.exists()"), json!({"resourceType": "Patient", "name": [{"family": "A"}]})).unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn test_false_and_empty_fail_once() {
        let errors = run(&rule("name.exists()"), json!({"resourceType": "Patient"})).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_code, "PATIENT_NEEDS_NAME");
        assert_eq!(errors[0].locator.as_deref(), Some("/entry/3/resource"));

        let errors = run(&rule("name.family"), json!({"resourceType": "Patient"})).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].detail("result"), Some(&json!([])));
    }

    #[test]
    fn test_all_results_must_be_true() {
        let r = rule("telecom.select(system = 'phone')");
        let resource = json!({"resourceType": "Patient", "telecom": [{"system": "phone"}, {"system": "email"}]});
        assert_eq!(run(&r, resource).unwrap().len(), 1);
    }

    #[test]
    fn test_field_path_is_the_fallback_expression() {
        let r = RuleDefinition::new("custom", RuleType::CustomPathExpression, "Patient", "active = true")
            .with_error_code("MUST_BE_ACTIVE");
        assert!(run(&r, json!({"resourceType": "Patient", "active": true})).unwrap().is_empty());
    }

    #[test]
    fn test_missing_error_code() {
        let r = RuleDefinition::new("custom", RuleType::CustomPathExpression, "Patient", "active");
        let err = CustomExpression::from_rule(&r, &Engine::new()).err().unwrap();
        assert_eq!(err.error_code(), codes::RULE_CONFIGURATION_ERROR);
    }

    #[test]
    fn test_syntax_and_runtime_failures() {
        let err = run(&rule("name.where("), json!({"resourceType": "Patient"})).unwrap_err();
        assert!(matches!(
            err,
            RuleFailure::Definition {
                category: DefinitionCategory::Syntax,
                ..
            }
        ));

        let err = run(&rule("name.family.length() > 2"), json!({
            "resourceType": "Patient",
            "name": [{"family": "Abc"}, {"family": "Def"}]
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            RuleFailure::Definition {
                category: DefinitionCategory::Runtime,
                ..
            }
        ));
    }
}
