//! Validation errors
//!
//! The product output of a run. Errors are built once with the `with_*`
//! builders and never mutated afterwards.

use crate::rules::{RuleDefinition, Severity};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub rule_id: String,
    pub rule_type: String,
    pub severity: Severity,
    pub resource_type: String,
    pub field_path: String,
    pub error_code: String,
    pub message: String,
    /// Structured facts (actual, expected, allowed, min, max, pattern ...)
    #[serde(default)]
    pub details: Map<String, Value>,
    /// Absent for bundle-level errors
    pub entry_index: Option<usize>,
    pub resource_id: Option<String>,
    /// JSON-pointer shaped path to the offending element
    pub locator: Option<String>,
}

impl ValidationError {
    pub fn new(
        rule_id: impl Into<String>,
        rule_type: impl Into<String>,
        error_code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            rule_type: rule_type.into(),
            severity: Severity::Error,
            resource_type: String::new(),
            field_path: String::new(),
            error_code: error_code.into(),
            message: message.into(),
            details: Map::new(),
            entry_index: None,
            resource_id: None,
            locator: None,
        }
    }

    /// An error attributed to `rule`, inheriting its identity and severity.
    pub fn for_rule(
        rule: &RuleDefinition,
        error_code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: rule.severity,
            resource_type: rule.resource_type.clone(),
            field_path: rule.field_path.clone(),
            ..Self::new(rule.id.clone(), rule.rule_type.as_str(), error_code, message)
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self
    }

    pub fn with_field_path(mut self, field_path: impl Into<String>) -> Self {
        self.field_path = field_path.into();
        self
    }

    pub fn with_entry(mut self, entry_index: usize, resource_id: Option<&str>) -> Self {
        self.entry_index = Some(entry_index);
        self.resource_id = resource_id.map(str::to_string);
        self
    }

    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.locator = Some(locator.into());
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details.extend(details);
        self
    }

    pub fn is_bundle_level(&self) -> bool {
        self.entry_index.is_none()
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {}", self.severity, self.error_code, self.message)?;
        if let Some(locator) = &self.locator {
            write!(f, " at {}", locator)?;
        }
        Ok(())
    }
}
