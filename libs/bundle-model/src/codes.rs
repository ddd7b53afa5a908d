//! Error codes
//!
//! Every code except a custom expression's is owned by the code that emits it
//! and never taken from rule configuration.

pub const FIELD_REQUIRED: &str = "FIELD_REQUIRED";
pub const FIXED_VALUE_MISMATCH: &str = "FIXED_VALUE_MISMATCH";
pub const VALUE_NOT_ALLOWED: &str = "VALUE_NOT_ALLOWED";
pub const PATTERN_MISMATCH: &str = "PATTERN_MISMATCH";
pub const ARRAY_LENGTH_VIOLATION: &str = "ARRAY_LENGTH_VIOLATION";
pub const CODESYSTEM_MISMATCH: &str = "CODESYSTEM_MISMATCH";
pub const CODE_NOT_IN_VALUESET: &str = "CODE_NOT_IN_VALUESET";
pub const RESOURCE_REQUIREMENT_VIOLATION: &str = "RESOURCE_REQUIREMENT_VIOLATION";

pub const RULE_CONFIGURATION_ERROR: &str = "RULE_CONFIGURATION_ERROR";
pub const RULE_DEFINITION_ERROR: &str = "RULE_DEFINITION_ERROR";
pub const RULE_EXECUTION_ERROR: &str = "RULE_EXECUTION_ERROR";

pub const REFERENCE_NOT_FOUND: &str = "REFERENCE_NOT_FOUND";
pub const REFERENCE_TYPE_MISMATCH: &str = "REFERENCE_TYPE_MISMATCH";
