//! Error types for the path-expression engine

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Compilation and evaluation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Function {name} expects {expected} argument(s), got {got}")]
    InvalidArity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Evaluation error: {0}")]
    EvaluationError(String),

    #[error("Variable not found: {0}")]
    VariableNotFound(String),
}

impl Error {
    /// `true` when the expression itself is malformed (as opposed to failing
    /// against a particular document).
    pub fn is_syntax(&self) -> bool {
        matches!(
            self,
            Error::ParseError(_) | Error::FunctionNotFound(_) | Error::InvalidArity { .. }
        )
    }
}
