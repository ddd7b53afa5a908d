//! Evaluation-lane planner
//!
//! Chooses, per rule and record, between the strict lane (typed graph) and the
//! best-effort lane (resilient tree). Every applicable fallback reason is
//! recorded, in decision order; the first one decides.

use crate::navigator::FieldPath;
use bundlecheck_model::{InstanceScope, RuleDefinition, RuleType};
use bundlecheck_pathexpr::FunctionCategory;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;

/// Path depth from which navigation falls back to the tree.
const DEEP_PATH_SEGMENTS: usize = 3;

const EXTENSION_SEGMENTS: &[&str] = &["extension", "modifierExtension"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Lane {
    Strict,
    BestEffort,
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Lane::Strict => "strict",
            Lane::BestEffort => "best-effort",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FallbackReason {
    TypedParseFailed,
    CustomExpression,
    ExtensionPath,
    DeepPath { depth: usize },
    NestedPredicate,
    UnparseablePredicate,
    EmptyObjectPlaceholder,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::TypedParseFailed => f.write_str("typed parse failed"),
            FallbackReason::CustomExpression => {
                f.write_str("custom expressions are always evaluated on the tree")
            }
            FallbackReason::ExtensionPath => f.write_str("field path touches an extension container"),
            FallbackReason::DeepPath { depth } => {
                write!(f, "field path depth {} is {} or more segments", depth, DEEP_PATH_SEGMENTS)
            }
            FallbackReason::NestedPredicate => {
                f.write_str("scope predicate uses nested filtering or existence operators")
            }
            FallbackReason::UnparseablePredicate => f.write_str("scope predicate does not parse"),
            FallbackReason::EmptyObjectPlaceholder => {
                f.write_str("record contains an empty-object placeholder")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanePlan {
    pub prefer_strict: bool,
    pub fallback_reasons: Vec<FallbackReason>,
}

impl LanePlan {
    pub fn lane(&self) -> Lane {
        if self.prefer_strict {
            Lane::Strict
        } else {
            Lane::BestEffort
        }
    }

    /// The reason that decided the fallback.
    pub fn deciding_reason(&self) -> Option<&FallbackReason> {
        self.fallback_reasons.first()
    }
}

/// Plan the lane for `rule` on one record. Pure: no I/O, no shared state.
pub fn plan(rule: &RuleDefinition, raw: &JsonValue, typed_parse_succeeded: bool) -> LanePlan {
    let mut reasons = Vec::new();

    if !typed_parse_succeeded {
        reasons.push(FallbackReason::TypedParseFailed);
    }
    if rule.rule_type == RuleType::CustomPathExpression {
        reasons.push(FallbackReason::CustomExpression);
    }

    reasons.extend(path_reasons(rule));

    if let InstanceScope::FilteredInstances {
        predicate_expression,
    } = &rule.instance_scope
    {
        match bundlecheck_pathexpr::compile(predicate_expression) {
            Ok(compiled) => {
                if compiled.uses_category(&[FunctionCategory::Filtering, FunctionCategory::Existence]) {
                    reasons.push(FallbackReason::NestedPredicate);
                }
            }
            Err(_) => reasons.push(FallbackReason::UnparseablePredicate),
        }
    }

    if has_empty_object(raw) {
        reasons.push(FallbackReason::EmptyObjectPlaceholder);
    }

    let plan = LanePlan {
        prefer_strict: reasons.is_empty(),
        fallback_reasons: reasons,
    };
    tracing::trace!(
        rule = %rule.id,
        lane = %plan.lane(),
        reasons = plan.fallback_reasons.len(),
        "planned evaluation lane"
    );
    plan
}

fn path_reasons(rule: &RuleDefinition) -> Vec<FallbackReason> {
    let segments: Vec<String> = match FieldPath::parse_relative(&rule.field_path, &rule.resource_type) {
        Ok(path) => path.segments().iter().map(|s| s.name.clone()).collect(),
        Err(_) => rule
            .field_path
            .split('.')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    };
    let mut reasons = Vec::new();
    if segments.iter().any(|s| EXTENSION_SEGMENTS.contains(&s.as_str())) {
        reasons.push(FallbackReason::ExtensionPath);
    }
    if segments.len() >= DEEP_PATH_SEGMENTS {
        reasons.push(FallbackReason::DeepPath {
            depth: segments.len(),
        });
    }
    reasons
}

/// An empty object anywhere in the tree, nested in arrays included.
fn has_empty_object(value: &JsonValue) -> bool {
    match value {
        JsonValue::Object(map) => map.is_empty() || map.values().any(has_empty_object),
        JsonValue::Array(items) => items.iter().any(has_empty_object),
        _ => false,
    }
}
