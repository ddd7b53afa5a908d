//! Instance scope
//!
//! Decides whether a record of the rule's target type takes part in a rule.
//! A predicate that cannot be evaluated keeps the record in scope: dropping a
//! record silently is worse than validating one too many.

use bundlecheck_model::{InstanceScope, Record};
use bundlecheck_pathexpr::{Engine, Value};

pub fn should_validate(record: &Record, scope: &InstanceScope, expressions: &Engine) -> bool {
    match scope {
        InstanceScope::AllInstances => true,
        // Not narrowed to the first entry of the type; see DESIGN.md.
        InstanceScope::FirstInstance => true,
        InstanceScope::FilteredInstances {
            predicate_expression,
        } => match evaluate_predicate(record, predicate_expression, expressions) {
            Ok(selected) => selected,
            Err(error) => {
                tracing::warn!(
                    entry = record.entry_index(),
                    predicate = %predicate_expression,
                    error = %error,
                    "scope predicate failed, keeping record in scope"
                );
                true
            }
        },
    }
}

fn evaluate_predicate(
    record: &Record,
    predicate: &str,
    expressions: &Engine,
) -> bundlecheck_pathexpr::Result<bool> {
    let compiled = expressions.compile(predicate)?;
    let result = expressions.evaluate(&compiled, record.tree())?;
    Ok(match result.as_slice() {
        [] => false,
        [Value::Boolean(b)] => *b,
        _ => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observation(status: &str) -> Record {
        Record::new(0, None, json!({"resourceType": "Observation", "status": status}))
    }

    fn filtered(predicate: &str) -> InstanceScope {
        InstanceScope::FilteredInstances {
            predicate_expression: predicate.to_string(),
        }
    }

    #[test]
    fn test_boolean_predicate() {
        let engine = Engine::new();
        assert!(should_validate(&observation("final"), &filtered("status = 'final'"), &engine));
        assert!(!should_validate(&observation("draft"), &filtered("status = 'final'"), &engine));
    }

    #[test]
    fn test_existence_semantics() {
        let engine = Engine::new();
        assert!(should_validate(&observation("final"), &filtered("status"), &engine));
        assert!(!should_validate(&observation("final"), &filtered("subject"), &engine));
    }

    #[test]
    fn test_failures_default_to_included() {
        let engine = Engine::new();
        assert!(should_validate(&observation("final"), &filtered("status = ("), &engine));
        assert!(should_validate(&observation("final"), &filtered("status.length() > 'x'"), &engine));
        assert!(should_validate(&observation("final"), &filtered(""), &engine));
    }

    #[test]
    fn test_first_and_all_instances() {
        let engine = Engine::new();
        let record = observation("final");
        assert!(should_validate(&record, &InstanceScope::AllInstances, &engine));
        assert!(should_validate(&record, &InstanceScope::FirstInstance, &engine));
    }
}
