//! Engine configuration
//!
//! Loaded from YAML; every field has a default so partial files work.
//!
//! ```yaml
//! max_concurrent_rules: 8
//! terminology_timeout_ms: 5000
//! terminology_cache_capacity: 1024
//! expression_cache_size: 512
//! references:
//!   enabled: true
//!   allow_external: true
//! ```

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rules evaluated concurrently within one run
    pub max_concurrent_rules: usize,
    /// Upper bound for a single concept-set lookup
    pub terminology_timeout_ms: u64,
    /// Concept sets cached per run
    pub terminology_cache_capacity: u64,
    /// Compiled path expressions kept across runs
    pub expression_cache_size: usize,
    pub references: ReferencesConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferencesConfig {
    pub enabled: bool,
    /// Permit references that point outside the bundle
    pub allow_external: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_rules: 8,
            terminology_timeout_ms: 5000,
            terminology_cache_capacity: 1024,
            expression_cache_size: 512,
            references: ReferencesConfig::default(),
        }
    }
}

impl Default for ReferencesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_external: true,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, EngineError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String, EngineError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_concurrent_rules == 0 {
            return Err(EngineError::InvalidConfig(
                "max_concurrent_rules must be at least 1".into(),
            ));
        }
        if self.terminology_cache_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "terminology_cache_capacity must be at least 1".into(),
            ));
        }
        if self.expression_cache_size == 0 {
            return Err(EngineError::InvalidConfig(
                "expression_cache_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn terminology_timeout(&self) -> Duration {
        Duration::from_millis(self.terminology_timeout_ms)
    }
}
