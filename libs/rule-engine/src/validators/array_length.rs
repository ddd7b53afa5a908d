//! ArrayLength validator.

use super::Target;
use crate::error::RuleFailure;
use crate::navigator::{child_count, navigate_one, nominal_locator, NavNode};
use bundlecheck_model::{codes, RuleDefinition, ValidationError};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayLength {
    min: Option<u64>,
    max: Option<u64>,
}

impl ArrayLength {
    pub fn from_rule(rule: &RuleDefinition) -> Result<Self, RuleFailure> {
        let min = rule.params.count("min")?;
        let max = rule.params.count("max")?;
        match (min, max) {
            (None, None) => Err(RuleFailure::configuration(
                "at least one of 'min' or 'max' is required",
            )),
            (Some(min), Some(max)) if min > max => Err(RuleFailure::configuration(format!(
                "'min' ({}) is greater than 'max' ({})",
                min, max
            ))),
            _ => Ok(Self { min, max }),
        }
    }

    pub fn run<N: NavNode>(&self, root: &N, target: &Target<'_>, out: &mut Vec<ValidationError>) {
        let prefix = target.prefix();
        let Some(last) = target.path.last() else {
            return;
        };

        let (actual, locator) = match target.path.parent() {
            None => (child_count(root, last), format!("{}/{}", prefix, last.name)),
            Some(parent) => match navigate_one(root, &parent, &prefix) {
                Some(found) => (
                    child_count(found.node, last),
                    format!("{}/{}", found.locator, last.name),
                ),
                None => (0, nominal_locator(&prefix, target.path.segments())),
            },
        };
        let actual = actual as u64;

        let violations = [
            ("min", self.min.filter(|min| actual < *min)),
            ("max", self.max.filter(|max| actual > *max)),
        ];
        for (bound, limit) in violations {
            let Some(limit) = limit else { continue };
            let relation = if bound == "min" { "at least" } else { "at most" };
            out.push(
                target
                    .error(
                        codes::ARRAY_LENGTH_VIOLATION,
                        format!(
                            "{} has {} item(s), expected {} {}",
                            target.path, actual, relation, limit
                        ),
                    )
                    .with_locator(locator.clone())
                    .with_detail("actual", actual)
                    .with_detail("min", self.min.map_or(JsonValue::Null, JsonValue::from))
                    .with_detail("max", self.max.map_or(JsonValue::Null, JsonValue::from))
                    .with_detail("bound", bound),
            );
        }
    }
}
