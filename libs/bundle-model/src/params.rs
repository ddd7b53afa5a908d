//! Rule parameters
//!
//! `params` is an open map whose values mix primitives, arrays and nested
//! objects. Values stay in a tagged enum and each validator decodes what it
//! needs through the typed accessors on [`Params`], which tell a missing
//! parameter apart from a malformed one.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<ParamValue>),
    Object(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ParamValue::Null => "null",
            ParamValue::Bool(_) => "boolean",
            ParamValue::Number(_) => "number",
            ParamValue::String(_) => "string",
            ParamValue::Array(_) => "array",
            ParamValue::Object(_) => "object",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[ParamValue]> {
        match self {
            ParamValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, ParamValue>> {
        match self {
            ParamValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Text of a scalar: strings verbatim, numbers in JSON form, booleans
    /// as `true`/`false`.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            ParamValue::String(s) => Some(s.clone()),
            ParamValue::Number(n) => Some(n.to_string()),
            ParamValue::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Non-negative integer, accepting numeric strings.
    pub fn as_count(&self) -> Option<u64> {
        match self {
            ParamValue::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
            ParamValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Null => Value::Null,
            ParamValue::Bool(b) => Value::Bool(*b),
            ParamValue::Number(n) => Value::Number(n.clone()),
            ParamValue::String(s) => Value::String(s.clone()),
            ParamValue::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            ParamValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::String(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<u64> for ParamValue {
    fn from(value: u64) -> Self {
        ParamValue::Number(value.into())
    }
}

impl From<Value> for ParamValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ParamValue::Null,
            Value::Bool(b) => ParamValue::Bool(b),
            Value::Number(n) => ParamValue::Number(n),
            Value::String(s) => ParamValue::String(s),
            Value::Array(items) => ParamValue::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                ParamValue::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("missing required parameter '{key}'")]
    Missing { key: String },

    #[error("parameter '{key}' must be {expected}, found {found}")]
    Malformed {
        key: String,
        expected: &'static str,
        found: String,
    },
}

impl ParamError {
    pub fn key(&self) -> &str {
        match self {
            ParamError::Missing { key } | ParamError::Malformed { key, .. } => key,
        }
    }

    fn malformed(key: &str, expected: &'static str, found: &ParamValue) -> Self {
        ParamError::Malformed {
            key: key.to_string(),
            expected,
            found: found.kind_name().to_string(),
        }
    }
}

/// Rule-type specific parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// A present, non-null value.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key).filter(|v| !matches!(v, ParamValue::Null))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn require(&self, key: &str) -> Result<&ParamValue, ParamError> {
        self.get(key).ok_or_else(|| ParamError::Missing {
            key: key.to_string(),
        })
    }

    pub fn str(&self, key: &str) -> Result<Option<&str>, ParamError> {
        self.get(key)
            .map(|v| v.as_str().ok_or_else(|| ParamError::malformed(key, "a string", v)))
            .transpose()
    }

    /// A required, non-blank string.
    pub fn require_str(&self, key: &str) -> Result<&str, ParamError> {
        let value = self.require(key)?;
        match value.as_str() {
            Some(s) if !s.trim().is_empty() => Ok(s),
            Some(_) => Err(ParamError::Missing {
                key: key.to_string(),
            }),
            None => Err(ParamError::malformed(key, "a string", value)),
        }
    }

    /// Scalar rendered as text.
    pub fn require_scalar_text(&self, key: &str) -> Result<String, ParamError> {
        let value = self.require(key)?;
        value
            .scalar_text()
            .ok_or_else(|| ParamError::malformed(key, "a string, number or boolean", value))
    }

    pub fn count(&self, key: &str) -> Result<Option<u64>, ParamError> {
        self.get(key)
            .map(|v| {
                v.as_count()
                    .ok_or_else(|| ParamError::malformed(key, "a non-negative integer", v))
            })
            .transpose()
    }

    pub fn bool(&self, key: &str) -> Result<Option<bool>, ParamError> {
        self.get(key)
            .map(|v| match v {
                ParamValue::Bool(b) => Ok(*b),
                ParamValue::String(s) if s == "true" || s == "false" => Ok(s == "true"),
                other => Err(ParamError::malformed(key, "a boolean", other)),
            })
            .transpose()
    }

    pub fn array(&self, key: &str) -> Result<Option<&[ParamValue]>, ParamError> {
        self.get(key)
            .map(|v| v.as_array().ok_or_else(|| ParamError::malformed(key, "an array", v)))
            .transpose()
    }

    /// Array of scalars rendered as text.
    pub fn string_list(&self, key: &str) -> Result<Option<Vec<String>>, ParamError> {
        let Some(items) = self.array(key)? else {
            return Ok(None);
        };
        items
            .iter()
            .map(|item| {
                item.scalar_text()
                    .ok_or_else(|| ParamError::malformed(key, "an array of scalars", item))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
    }
}

impl From<Value> for Params {
    /// Non-object values yield empty params.
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Params(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
            _ => Params::default(),
        }
    }
}
