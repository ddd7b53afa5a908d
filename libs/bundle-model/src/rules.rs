//! Rule definitions
//!
//! Rules arrive as JSON authored elsewhere and are immutable for the length of
//! a validation run.

use crate::codes;
use crate::error::{Error, Result};
use crate::params::Params;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// Validator kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleType {
    Required,
    FixedValue,
    AllowedValues,
    #[serde(alias = "Pattern")]
    Regex,
    ArrayLength,
    CodeSystem,
    #[serde(alias = "CustomFhirPath", alias = "CustomFHIRPath")]
    CustomPathExpression,
    RequiredResources,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Required => "Required",
            RuleType::FixedValue => "FixedValue",
            RuleType::AllowedValues => "AllowedValues",
            RuleType::Regex => "Regex",
            RuleType::ArrayLength => "ArrayLength",
            RuleType::CodeSystem => "CodeSystem",
            RuleType::CustomPathExpression => "CustomPathExpression",
            RuleType::RequiredResources => "RequiredResources",
        }
    }

    /// Codes this rule type emits for data violations. Empty for custom
    /// expressions, whose code comes from the rule.
    pub fn fixed_error_codes(&self) -> &'static [&'static str] {
        match self {
            RuleType::Required => &[codes::FIELD_REQUIRED],
            RuleType::FixedValue => &[codes::FIXED_VALUE_MISMATCH],
            RuleType::AllowedValues => &[codes::VALUE_NOT_ALLOWED],
            RuleType::Regex => &[codes::PATTERN_MISMATCH],
            RuleType::ArrayLength => &[codes::ARRAY_LENGTH_VIOLATION],
            RuleType::CodeSystem => &[codes::CODESYSTEM_MISMATCH, codes::CODE_NOT_IN_VALUESET],
            RuleType::CustomPathExpression => &[],
            RuleType::RequiredResources => &[codes::RESOURCE_REQUIREMENT_VIOLATION],
        }
    }

    /// Bundle-level rules inspect the entry list rather than one record.
    pub fn is_bundle_level(&self) -> bool {
        matches!(self, RuleType::RequiredResources)
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which records of the target type a rule applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum InstanceScope {
    #[default]
    AllInstances,
    FirstInstance,
    FilteredInstances {
        #[serde(rename = "predicateExpression")]
        predicate_expression: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    #[serde(alias = "Error")]
    Error,
    #[serde(alias = "Warning")]
    Warning,
    #[serde(alias = "Information", alias = "info")]
    Information,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Information => "information",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefinition {
    pub id: String,

    #[serde(rename = "type")]
    pub rule_type: RuleType,

    /// Target record type; unused by bundle-level rules
    #[serde(default)]
    pub resource_type: String,

    #[serde(default)]
    pub instance_scope: InstanceScope,

    /// Dot-separated path relative to the record root
    #[serde(default)]
    pub field_path: String,

    #[serde(default)]
    pub params: Params,

    /// Author-supplied code; only honoured for custom expressions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    #[serde(default)]
    pub severity: Severity,
}

impl RuleDefinition {
    pub fn new(
        id: impl Into<String>,
        rule_type: RuleType,
        resource_type: impl Into<String>,
        field_path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            rule_type,
            resource_type: resource_type.into(),
            instance_scope: InstanceScope::AllInstances,
            field_path: field_path.into(),
            params: Params::default(),
            error_code: None,
            severity: Severity::Error,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_scope(mut self, scope: InstanceScope) -> Self {
        self.instance_scope = scope;
        self
    }

    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// The configured error code, if non-blank.
    pub fn configured_error_code(&self) -> Option<&str> {
        self.error_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }
}

/// Rules owned by one project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    #[serde(default)]
    pub project_id: String,

    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

impl RuleSet {
    pub fn new(project_id: impl Into<String>, rules: Vec<RuleDefinition>) -> Self {
        Self {
            project_id: project_id.into(),
            rules,
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let rule_set: Self = serde_json::from_value(value.clone())?;
        rule_set.check_ids()?;
        Ok(rule_set)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }

    fn check_ids(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if rule.id.trim().is_empty() {
                return Err(Error::InvalidRule("rule id must not be empty".into()));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(Error::InvalidRule(format!("duplicate rule id '{}'", rule.id)));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
