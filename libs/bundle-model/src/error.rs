//! Error types for bundle and rule models

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("Invalid rule definition: {0}")]
    InvalidRule(String),

    #[error("Invalid code system: {0}")]
    InvalidCodeSystem(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
