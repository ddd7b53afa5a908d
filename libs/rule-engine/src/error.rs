//! Error types
//!
//! [`EngineError`] covers setup (configuration, loading code systems).
//! [`RuleFailure`] is what a single rule evaluation can fail with; the engine
//! turns it into a [`ValidationError`] and moves on to the next rule.

use bundlecheck_model::{codes, ParamError, Record, RuleDefinition, ValidationError};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Model(#[from] bundlecheck_model::Error),

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Whether a definition error comes from the rule text or from the data it
/// was evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionCategory {
    Syntax,
    Runtime,
}

impl DefinitionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefinitionCategory::Syntax => "syntax",
            DefinitionCategory::Runtime => "runtime",
        }
    }
}

impl fmt::Display for DefinitionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const SYNTAX_HINT: &str =
    "Check the expression: balanced parentheses, quoted strings and supported function names";
const RUNTIME_HINT: &str =
    "The expression is well formed but failed on this record; guard optional or repeating elements with exists(), first() or where()";
pub(crate) const PATTERN_HINT: &str =
    "Check the regular expression: balanced groups and brackets, escaped metacharacters";
pub(crate) const FIELD_PATH_HINT: &str =
    "Use dot-separated element names relative to the record root, e.g. name.family or value[x]";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleFailure {
    /// Missing or malformed rule parameters
    #[error("{message}")]
    Configuration { message: String },

    /// The rule's path or expression does not compile or evaluate
    #[error("{message}")]
    Definition {
        category: DefinitionCategory,
        message: String,
        hint: String,
    },

    /// An unexpected failure inside a validator
    #[error("{message}")]
    Execution { message: String },
}

impl RuleFailure {
    pub fn configuration(message: impl Into<String>) -> Self {
        RuleFailure::Configuration {
            message: message.into(),
        }
    }

    pub fn definition(
        category: DefinitionCategory,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        RuleFailure::Definition {
            category,
            message: message.into(),
            hint: hint.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        RuleFailure::Execution {
            message: message.into(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            RuleFailure::Configuration { .. } => codes::RULE_CONFIGURATION_ERROR,
            RuleFailure::Definition { .. } => codes::RULE_DEFINITION_ERROR,
            RuleFailure::Execution { .. } => codes::RULE_EXECUTION_ERROR,
        }
    }

    /// Convert into the reported error, attached to `record` when the failure
    /// is specific to one record.
    pub fn into_error(self, rule: &RuleDefinition, record: Option<&Record>) -> ValidationError {
        let code = self.error_code();
        let mut error = match self {
            RuleFailure::Configuration { message } => {
                ValidationError::for_rule(rule, code, format!("Rule '{}' is misconfigured: {}", rule.id, message))
                    .with_detail("params", rule.params.to_json())
            }
            RuleFailure::Definition {
                category,
                message,
                hint,
            } => ValidationError::for_rule(rule, code, format!("Rule '{}' could not be evaluated: {}", rule.id, message))
                .with_detail("category", category.as_str())
                .with_detail("cause", message)
                .with_detail("hint", hint),
            RuleFailure::Execution { message } => {
                ValidationError::for_rule(rule, code, format!("Rule '{}' failed unexpectedly: {}", rule.id, message))
                    .with_detail("cause", message)
            }
        };
        if let Some(record) = record {
            error = error
                .with_entry(record.entry_index(), record.id())
                .with_locator(record.locator_prefix());
        }
        error
    }
}

impl From<ParamError> for RuleFailure {
    fn from(error: ParamError) -> Self {
        RuleFailure::configuration(error.to_string())
    }
}

impl From<bundlecheck_pathexpr::Error> for RuleFailure {
    fn from(error: bundlecheck_pathexpr::Error) -> Self {
        if error.is_syntax() {
            RuleFailure::definition(DefinitionCategory::Syntax, error.to_string(), SYNTAX_HINT)
        } else {
            RuleFailure::definition(DefinitionCategory::Runtime, error.to_string(), RUNTIME_HINT)
        }
    }
}
