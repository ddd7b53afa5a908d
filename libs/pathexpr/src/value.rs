//! Runtime values
//!
//! Evaluation borrows directly from the document tree: object nodes stay as
//! `&serde_json::Value` references and only primitives are materialized.

use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::str::FromStr;

/// A single item of an evaluation result
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    /// An object node of the document
    Node(&'a JsonValue),
    String(Cow<'a, str>),
    Number(Decimal),
    Boolean(bool),
}

/// Evaluation results are always collections
pub type Collection<'a> = SmallVec<[Value<'a>; 4]>;

/// Parse a JSON number into a decimal, accepting exponent notation.
pub fn decimal_from_json(number: &serde_json::Number) -> Option<Decimal> {
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

impl<'a> Value<'a> {
    /// Convert a non-array JSON node. `null` yields nothing.
    pub fn from_json(node: &'a JsonValue) -> Option<Self> {
        match node {
            JsonValue::Null => None,
            JsonValue::Bool(b) => Some(Value::Boolean(*b)),
            JsonValue::Number(n) => Some(
                decimal_from_json(n)
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::String(Cow::Owned(n.to_string()))),
            ),
            JsonValue::String(s) => Some(Value::String(Cow::Borrowed(s.as_str()))),
            JsonValue::Object(_) | JsonValue::Array(_) => Some(Value::Node(node)),
        }
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::String(Cow::Owned(s.into()))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Primitive values have a textual form; object nodes do not.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            Value::Node(_) => None,
        }
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(self, Value::Node(_))
    }

    /// Short type label used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Node(_) => "object",
            Value::String(_) => "string",
            Value::Number(n) if n.fract().is_zero() => "integer",
            Value::Number(_) => "decimal",
            Value::Boolean(_) => "boolean",
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Node(node) => (*node).clone(),
            Value::String(s) => JsonValue::String(s.to_string()),
            Value::Number(n) => serde_json::Number::from_str(&n.to_string())
                .map(JsonValue::Number)
                .unwrap_or_else(|_| JsonValue::String(n.to_string())),
            Value::Boolean(b) => JsonValue::Bool(*b),
        }
    }

    /// Equality as used by `=`, `in`, `contains` and `distinct()`.
    pub fn equals(&self, other: &Value<'_>) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a.normalize() == b.normalize(),
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Node(a), Value::Node(b)) => std::ptr::eq(*a, *b) || a == b,
            _ => false,
        }
    }
}
