//! Typed record view
//!
//! A best-effort mapping layer from the resilient JSON tree to a typed graph.
//! Each field maps independently: a field that cannot be typed is recorded as a
//! [`FieldIssue`] and mapping continues, so one call reports every problem in
//! the record. The typed graph is only handed out when no issue was recorded.
//!
//! Primitive datatypes are resolved by element name through a declarative
//! table ([`element_kind`]); elements not listed are inferred from their JSON
//! shape. Every primitive keeps the canonical text of its JSON scalar, which is
//! the same text the tree lane derives, so comparisons agree across views.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value as JsonValue};
use std::fmt;
use std::str::FromStr;

static ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9\-.]{1,64}$").expect("id pattern is valid")
});

static DATE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})(?:-(\d{2})(?:-(\d{2}))?)?$")
        .expect("date pattern is valid")
});

/// Primitive datatype of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    String,
    Code,
    Id,
    Uri,
    Boolean,
    Integer,
    Decimal,
    Date,
    DateTime,
    Instant,
    Time,
}

impl PrimitiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveKind::String => "string",
            PrimitiveKind::Code => "code",
            PrimitiveKind::Id => "id",
            PrimitiveKind::Uri => "uri",
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Integer => "integer",
            PrimitiveKind::Decimal => "decimal",
            PrimitiveKind::Date => "date",
            PrimitiveKind::DateTime => "dateTime",
            PrimitiveKind::Instant => "instant",
            PrimitiveKind::Time => "time",
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element name → datatype for elements whose JSON shape is ambiguous.
static ELEMENT_KINDS: phf::Map<&'static str, PrimitiveKind> = phf::phf_map! {
    "id" => PrimitiveKind::Id,
    "active" => PrimitiveKind::Boolean,
    "userSelected" => PrimitiveKind::Boolean,
    "deceasedBoolean" => PrimitiveKind::Boolean,
    "multipleBirthBoolean" => PrimitiveKind::Boolean,
    "valueBoolean" => PrimitiveKind::Boolean,
    "multipleBirthInteger" => PrimitiveKind::Integer,
    "valueInteger" => PrimitiveKind::Integer,
    "rank" => PrimitiveKind::Integer,
    "sequence" => PrimitiveKind::Integer,
    "valueDecimal" => PrimitiveKind::Decimal,
    "gender" => PrimitiveKind::Code,
    "status" => PrimitiveKind::Code,
    "intent" => PrimitiveKind::Code,
    "use" => PrimitiveKind::Code,
    "language" => PrimitiveKind::Code,
    "comparator" => PrimitiveKind::Code,
    "code" => PrimitiveKind::Code,
    "valueCode" => PrimitiveKind::Code,
    "system" => PrimitiveKind::Uri,
    "url" => PrimitiveKind::Uri,
    "fullUrl" => PrimitiveKind::Uri,
    "valueUri" => PrimitiveKind::Uri,
    "birthDate" => PrimitiveKind::Date,
    "expirationDate" => PrimitiveKind::Date,
    "valueDate" => PrimitiveKind::Date,
    "deceasedDateTime" => PrimitiveKind::DateTime,
    "effectiveDateTime" => PrimitiveKind::DateTime,
    "onsetDateTime" => PrimitiveKind::DateTime,
    "abatementDateTime" => PrimitiveKind::DateTime,
    "occurrenceDateTime" => PrimitiveKind::DateTime,
    "recordedDate" => PrimitiveKind::DateTime,
    "authoredOn" => PrimitiveKind::DateTime,
    "valueDateTime" => PrimitiveKind::DateTime,
    "date" => PrimitiveKind::DateTime,
    "start" => PrimitiveKind::DateTime,
    "end" => PrimitiveKind::DateTime,
    "issued" => PrimitiveKind::Instant,
    "lastUpdated" => PrimitiveKind::Instant,
    "recorded" => PrimitiveKind::Instant,
    "effectiveInstant" => PrimitiveKind::Instant,
    "valueInstant" => PrimitiveKind::Instant,
    "valueTime" => PrimitiveKind::Time,
};

/// Declared datatype for a primitive element, if the table knows it.
pub fn element_kind(name: &str) -> Option<PrimitiveKind> {
    ELEMENT_KINDS.get(name).copied()
}

/// A date with year, optional month and optional day precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialDate {
    pub year: i32,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl PartialDate {
    pub fn parse(text: &str) -> Option<Self> {
        let captures = DATE_PATTERN.captures(text)?;
        let year = captures.get(1)?.as_str().parse().ok()?;
        let month = captures.get(2).and_then(|m| m.as_str().parse().ok());
        let day = captures.get(3).and_then(|d| d.as_str().parse().ok());
        NaiveDate::from_ymd_opt(year, month.unwrap_or(1), day.unwrap_or(1))?;
        Some(Self { year, month, day })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialDateTime {
    Date(PartialDate),
    Full(DateTime<FixedOffset>),
}

impl PartialDateTime {
    pub fn parse(text: &str) -> Option<Self> {
        if text.contains('T') {
            DateTime::parse_from_rfc3339(text).ok().map(PartialDateTime::Full)
        } else {
            PartialDate::parse(text).map(PartialDateTime::Date)
        }
    }
}

/// Parsed value of a primitive; string-like kinds carry no extra payload.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveValue {
    Text,
    Boolean(bool),
    Integer(i64),
    Decimal(Decimal),
    Date(PartialDate),
    DateTime(PartialDateTime),
    Instant(DateTime<FixedOffset>),
    Time(NaiveTime),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedPrimitive {
    kind: PrimitiveKind,
    text: String,
    value: PrimitiveValue,
}

impl TypedPrimitive {
    pub fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    /// Canonical text, identical to the JSON scalar's text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn value(&self) -> &PrimitiveValue {
        &self.value
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypedNode {
    Object(TypedObject),
    Primitive(TypedPrimitive),
}

impl TypedNode {
    pub fn as_object(&self) -> Option<&TypedObject> {
        match self {
            TypedNode::Object(object) => Some(object),
            TypedNode::Primitive(_) => None,
        }
    }

    pub fn as_primitive(&self) -> Option<&TypedPrimitive> {
        match self {
            TypedNode::Primitive(primitive) => Some(primitive),
            TypedNode::Object(_) => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.as_primitive().map(TypedPrimitive::text)
    }

    pub fn get(&self, name: &str) -> Option<&TypedField> {
        self.as_object().and_then(|object| object.get(name))
    }
}

/// Object fields in document order. Empty objects and arrays are kept so the
/// graph has the same shape as the tree it was mapped from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypedObject {
    fields: Vec<(String, TypedField)>,
}

impl TypedObject {
    pub fn get(&self, name: &str) -> Option<&TypedField> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, field)| field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &TypedField)> {
        self.fields.iter().map(|(key, field)| (key.as_str(), field))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Cardinality follows the JSON shape: arrays map to `Many`.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedField {
    Single(TypedNode),
    Many(Vec<TypedNode>),
}

impl TypedField {
    pub fn nodes(&self) -> &[TypedNode] {
        match self {
            TypedField::Single(node) => std::slice::from_ref(node),
            TypedField::Many(nodes) => nodes,
        }
    }
}

/// A typed record root.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedResource {
    resource_type: String,
    root: TypedNode,
}

impl TypedResource {
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn root(&self) -> &TypedNode {
        &self.root
    }

    pub fn id(&self) -> Option<&str> {
        self.root.get("id").and_then(|f| f.nodes().first()).and_then(TypedNode::text)
    }
}

/// A field that could not be typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub path: String,
    pub message: String,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

pub type TypedParse = std::result::Result<TypedResource, Vec<FieldIssue>>;

/// Map a record tree to its typed view.
pub fn map_resource(tree: &JsonValue) -> TypedParse {
    let mut mapper = Mapper::default();
    let Some(object) = tree.as_object() else {
        return Err(vec![FieldIssue {
            path: "$".into(),
            message: "record is not a JSON object".into(),
        }]);
    };
    let resource_type = match object.get("resourceType") {
        Some(JsonValue::String(name)) if !name.is_empty() => name.clone(),
        Some(_) => {
            mapper.issue("resourceType", "resourceType must be a non-empty string");
            String::new()
        }
        None => {
            mapper.issue("resourceType", "resourceType is missing");
            String::new()
        }
    };
    let root_path = if resource_type.is_empty() {
        "Resource".to_string()
    } else {
        resource_type.clone()
    };
    let root = mapper.map_object(object, &root_path);
    if mapper.issues.is_empty() {
        Ok(TypedResource {
            resource_type,
            root: TypedNode::Object(root),
        })
    } else {
        Err(mapper.issues)
    }
}

#[derive(Default)]
struct Mapper {
    issues: Vec<FieldIssue>,
}

impl Mapper {
    fn issue(&mut self, path: &str, message: impl Into<String>) {
        self.issues.push(FieldIssue {
            path: path.to_string(),
            message: message.into(),
        });
    }

    fn map_object(&mut self, object: &Map<String, JsonValue>, path: &str) -> TypedObject {
        let mut fields = Vec::with_capacity(object.len());
        for (name, value) in object {
            let field_path = format!("{}.{}", path, name);
            if let Some(field) = self.map_field(name, value, &field_path) {
                fields.push((name.clone(), field));
            }
        }
        TypedObject { fields }
    }

    fn map_field(&mut self, name: &str, value: &JsonValue, path: &str) -> Option<TypedField> {
        match value {
            JsonValue::Array(items) => {
                let mut nodes = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{}[{}]", path, i);
                    if item.is_array() {
                        self.issue(&item_path, "nested arrays are not allowed");
                        continue;
                    }
                    if let Some(node) = self.map_value(name, item, &item_path) {
                        nodes.push(node);
                    }
                }
                Some(TypedField::Many(nodes))
            }
            other => self.map_value(name, other, path).map(TypedField::Single),
        }
    }

    fn map_value(&mut self, name: &str, value: &JsonValue, path: &str) -> Option<TypedNode> {
        match value {
            JsonValue::Null => {
                self.issue(path, "null is not a valid value");
                None
            }
            JsonValue::Object(object) => Some(TypedNode::Object(self.map_object(object, path))),
            JsonValue::Array(_) => {
                self.issue(path, "nested arrays are not allowed");
                None
            }
            scalar => match map_primitive(name, scalar) {
                Ok(primitive) => Some(TypedNode::Primitive(primitive)),
                Err(message) => {
                    self.issue(path, message);
                    None
                }
            },
        }
    }
}

fn map_primitive(name: &str, value: &JsonValue) -> Result<TypedPrimitive, String> {
    let kind = element_kind(name).unwrap_or(match value {
        JsonValue::Bool(_) => PrimitiveKind::Boolean,
        JsonValue::Number(n) if n.is_i64() || n.is_u64() => PrimitiveKind::Integer,
        JsonValue::Number(_) => PrimitiveKind::Decimal,
        _ => PrimitiveKind::String,
    });
    let mismatch = || format!("expected {} but found {}", kind, json_kind(value));

    let (text, parsed) = match (kind, value) {
        (PrimitiveKind::Boolean, JsonValue::Bool(b)) => (b.to_string(), PrimitiveValue::Boolean(*b)),
        (PrimitiveKind::Integer, JsonValue::Number(n)) => {
            let i = n.as_i64().ok_or_else(|| format!("'{}' is not a valid integer", n))?;
            (n.to_string(), PrimitiveValue::Integer(i))
        }
        (PrimitiveKind::Decimal, JsonValue::Number(n)) => {
            let d = decimal_from_json(n).ok_or_else(|| format!("'{}' is not a valid decimal", n))?;
            (n.to_string(), PrimitiveValue::Decimal(d))
        }
        (PrimitiveKind::Boolean | PrimitiveKind::Integer | PrimitiveKind::Decimal, _) => {
            return Err(mismatch())
        }
        (_, JsonValue::String(s)) => {
            if s.is_empty() {
                return Err("empty strings are not allowed".into());
            }
            (s.clone(), parse_text(kind, s)?)
        }
        _ => return Err(mismatch()),
    };
    Ok(TypedPrimitive {
        kind,
        text,
        value: parsed,
    })
}

fn parse_text(kind: PrimitiveKind, text: &str) -> Result<PrimitiveValue, String> {
    let invalid = || format!("'{}' is not a valid {}", text, kind);
    match kind {
        PrimitiveKind::Code => {
            let well_formed = text.trim() == text && !text.contains("  ");
            well_formed.then_some(PrimitiveValue::Text).ok_or_else(invalid)
        }
        PrimitiveKind::Id => ID_PATTERN
            .is_match(text)
            .then_some(PrimitiveValue::Text)
            .ok_or_else(invalid),
        PrimitiveKind::Uri => (!text.chars().any(char::is_whitespace))
            .then_some(PrimitiveValue::Text)
            .ok_or_else(invalid),
        PrimitiveKind::Date => PartialDate::parse(text)
            .map(PrimitiveValue::Date)
            .ok_or_else(invalid),
        PrimitiveKind::DateTime => PartialDateTime::parse(text)
            .map(PrimitiveValue::DateTime)
            .ok_or_else(invalid),
        PrimitiveKind::Instant => DateTime::parse_from_rfc3339(text)
            .map(PrimitiveValue::Instant)
            .map_err(|_| invalid()),
        PrimitiveKind::Time => NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
            .map(PrimitiveValue::Time)
            .map_err(|_| invalid()),
        _ => Ok(PrimitiveValue::Text),
    }
}

fn decimal_from_json(number: &Number) -> Option<Decimal> {
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
