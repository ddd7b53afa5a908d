//! Rule-type validators
//!
//! Each rule is prepared once (parameters decoded, patterns compiled, concept
//! sets resolved) and then run against every in-scope record. Running is
//! generic over [`NavNode`], so the same check serves the typed graph and the
//! resilient tree.

pub mod array_length;
pub mod code_system;
pub mod custom_expression;
pub mod pattern;
pub mod required_resources;
pub mod values;

use crate::error::RuleFailure;
use crate::navigator::{FieldPath, NavNode};
use crate::terminology::ConceptSetCache;
use bundlecheck_model::{Record, RuleDefinition, RuleType, ValidationError};
use bundlecheck_pathexpr::Engine;

pub use pattern::PatternCache;

/// Shared services a rule may need while being prepared.
pub(crate) struct Services<'a> {
    pub expressions: &'a Engine,
    pub patterns: &'a PatternCache,
    pub concepts: &'a ConceptSetCache,
}

/// The record a check runs against and the path it inspects.
pub struct Target<'a> {
    pub rule: &'a RuleDefinition,
    pub record: &'a Record,
    pub path: &'a FieldPath,
}

impl<'a> Target<'a> {
    pub fn prefix(&self) -> String {
        self.record.locator_prefix()
    }

    /// An error for this rule, attached to the record.
    pub fn error(&self, code: &str, message: impl Into<String>) -> ValidationError {
        ValidationError::for_rule(self.rule, code, message)
            .with_entry(self.record.entry_index(), self.record.id())
    }
}

/// A prepared record-level rule.
pub enum Check {
    Required,
    FixedValue(values::FixedValue),
    AllowedValues(values::AllowedValues),
    Pattern(pattern::PatternCheck),
    ArrayLength(array_length::ArrayLength),
    CodeSystem(code_system::CodeSystemCheck),
    Custom(custom_expression::CustomExpression),
}

impl Check {
    pub(crate) async fn prepare(rule: &RuleDefinition, services: &Services<'_>) -> Result<Self, RuleFailure> {
        Ok(match rule.rule_type {
            RuleType::Required => Check::Required,
            RuleType::FixedValue => Check::FixedValue(values::FixedValue::from_rule(rule)?),
            RuleType::AllowedValues => Check::AllowedValues(values::AllowedValues::from_rule(rule)?),
            RuleType::Regex => Check::Pattern(pattern::PatternCheck::from_rule(rule, services.patterns)?),
            RuleType::ArrayLength => Check::ArrayLength(array_length::ArrayLength::from_rule(rule)?),
            RuleType::CodeSystem => {
                Check::CodeSystem(code_system::CodeSystemCheck::prepare(rule, services.concepts).await?)
            }
            RuleType::CustomPathExpression => {
                Check::Custom(custom_expression::CustomExpression::from_rule(rule, services.expressions)?)
            }
            RuleType::RequiredResources => {
                return Err(RuleFailure::execution(
                    "bundle-level rule dispatched as a record-level check",
                ))
            }
        })
    }

    /// Run against one record, navigating from `root`.
    pub fn run<N: NavNode>(
        &self,
        root: &N,
        target: &Target<'_>,
        expressions: &Engine,
        out: &mut Vec<ValidationError>,
    ) -> Result<(), RuleFailure> {
        match self {
            Check::Required => {
                values::check_required(root, target, out);
                Ok(())
            }
            Check::FixedValue(check) => {
                check.run(root, target, out);
                Ok(())
            }
            Check::AllowedValues(check) => {
                check.run(root, target, out);
                Ok(())
            }
            Check::Pattern(check) => {
                check.run(root, target, out);
                Ok(())
            }
            Check::ArrayLength(check) => {
                check.run(root, target, out);
                Ok(())
            }
            Check::CodeSystem(check) => {
                check.run(root, target, out);
                Ok(())
            }
            // Custom expressions always see the resilient tree.
            Check::Custom(check) => check.run(target, expressions, out),
        }
    }

    /// Whether the check navigates a field path.
    pub fn uses_field_path(rule_type: RuleType) -> bool {
        !matches!(
            rule_type,
            RuleType::CustomPathExpression | RuleType::RequiredResources
        )
    }
}

/// Text of a matched node for reporting: scalar text, or compact JSON.
pub(crate) fn display_text<N: NavNode + ?Sized>(node: &N) -> String {
    match node.scalar_text() {
        Some(text) => text.into_owned(),
        None => node.to_json().to_string(),
    }
}
