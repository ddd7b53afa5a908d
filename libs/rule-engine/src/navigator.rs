//! Path navigation
//!
//! Walks a dotted [`FieldPath`] through a record and pairs every matched node
//! with a positional locator. The walk is generic over [`NavNode`] so the
//! resilient tree and the typed graph share one algorithm.
//!
//! Locator rule: a segment with exactly one child contributes `/name`; a
//! segment with two or more children contributes `/name/i` for each child.
//! A field that happens to occur once never gets an index, so its locator
//! stays valid when the element is later repeated.

use bundlecheck_model::TypedNode;
use serde_json::{Map, Number, Value as JsonValue};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A navigable document node.
pub trait NavNode {
    /// Children reached through field `name`; arrays contribute every item.
    fn child_nodes(&self, name: &str) -> Vec<&Self>;

    /// Field names of an object node in document order.
    fn field_names(&self) -> Vec<&str>;

    /// Text of a scalar node. Objects and arrays have none.
    fn scalar_text(&self) -> Option<Cow<'_, str>>;

    /// Null, whitespace-only text, or an empty container.
    fn is_blank(&self) -> bool;

    fn to_json(&self) -> JsonValue;
}

impl NavNode for JsonValue {
    fn child_nodes(&self, name: &str) -> Vec<&Self> {
        match self.get(name) {
            Some(JsonValue::Array(items)) => items.iter().collect(),
            Some(child) => vec![child],
            _ => Vec::new(),
        }
    }

    fn field_names(&self) -> Vec<&str> {
        self.as_object()
            .map(|object| object.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    fn scalar_text(&self) -> Option<Cow<'_, str>> {
        match self {
            JsonValue::String(s) => Some(Cow::Borrowed(s)),
            JsonValue::Number(n) => Some(Cow::Owned(n.to_string())),
            JsonValue::Bool(b) => Some(Cow::Owned(b.to_string())),
            _ => None,
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            JsonValue::Null => true,
            JsonValue::String(s) => s.trim().is_empty(),
            JsonValue::Array(items) => items.is_empty(),
            JsonValue::Object(object) => object.is_empty(),
            _ => false,
        }
    }

    fn to_json(&self) -> JsonValue {
        self.clone()
    }
}

impl NavNode for TypedNode {
    fn child_nodes(&self, name: &str) -> Vec<&Self> {
        self.get(name)
            .map(|field| field.nodes().iter().collect())
            .unwrap_or_default()
    }

    fn field_names(&self) -> Vec<&str> {
        self.as_object()
            .map(|object| object.fields().map(|(name, _)| name).collect())
            .unwrap_or_default()
    }

    fn scalar_text(&self) -> Option<Cow<'_, str>> {
        self.text().map(Cow::Borrowed)
    }

    fn is_blank(&self) -> bool {
        match self {
            TypedNode::Primitive(p) => p.text().trim().is_empty(),
            TypedNode::Object(object) => object.is_empty(),
        }
    }

    fn to_json(&self) -> JsonValue {
        use bundlecheck_model::typed::PrimitiveValue;
        match self {
            TypedNode::Primitive(p) => match p.value() {
                PrimitiveValue::Boolean(b) => JsonValue::Bool(*b),
                PrimitiveValue::Integer(_) | PrimitiveValue::Decimal(_) => Number::from_str(p.text())
                    .map(JsonValue::Number)
                    .unwrap_or_else(|_| JsonValue::String(p.text().to_string())),
                _ => JsonValue::String(p.text().to_string()),
            },
            TypedNode::Object(object) => {
                let mut map = Map::new();
                for (name, field) in object.fields() {
                    let value = match field {
                        bundlecheck_model::TypedField::Single(node) => node.to_json(),
                        bundlecheck_model::TypedField::Many(nodes) => {
                            JsonValue::Array(nodes.iter().map(NavNode::to_json).collect())
                        }
                    };
                    map.insert(name.to_string(), value);
                }
                JsonValue::Object(map)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldPathError {
    #[error("field path is empty")]
    Empty,

    #[error("field path '{path}' has an empty segment")]
    EmptySegment { path: String },

    #[error("'{segment}' in field path '{path}' is not an element name")]
    InvalidSegment { path: String, segment: String },
}

/// One path component. `choice` marks a polymorphic `name[x]` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub choice: bool,
}

impl Segment {
    fn parse(raw: &str, path: &str) -> Result<Self, FieldPathError> {
        if raw.is_empty() {
            return Err(FieldPathError::EmptySegment {
                path: path.to_string(),
            });
        }
        let (name, choice) = match raw.strip_suffix("[x]") {
            Some(stem) => (stem, true),
            None => (raw, false),
        };
        let mut chars = name.chars();
        let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(FieldPathError::InvalidSegment {
                path: path.to_string(),
                segment: raw.to_string(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            choice,
        })
    }

    /// Concrete field names of `node` this segment selects.
    fn field_names<'n, N: NavNode + ?Sized>(&self, node: &'n N) -> Vec<Cow<'n, str>> {
        if !self.choice {
            return vec![Cow::Owned(self.name.clone())];
        }
        node.field_names()
            .into_iter()
            .filter(|key| {
                key.strip_prefix(self.name.as_str())
                    .and_then(|suffix| suffix.chars().next())
                    .is_some_and(|c| c.is_ascii_uppercase())
            })
            .map(Cow::Borrowed)
            .collect()
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.choice {
            write!(f, "{}[x]", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// A parsed, dot-separated path relative to a record root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    /// The empty path: navigation yields the record root itself.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    pub fn parse(path: &str) -> Result<Self, FieldPathError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(FieldPathError::Empty);
        }
        let segments = trimmed
            .split('.')
            .map(|raw| Segment::parse(raw, trimmed))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    /// Parse `path`, dropping a leading segment equal to the record type
    /// (`Patient.name.family` on a Patient rule is `name.family`).
    pub fn parse_relative(path: &str, resource_type: &str) -> Result<Self, FieldPathError> {
        let mut parsed = Self::parse(path)?;
        if parsed.segments.len() > 1
            && !resource_type.is_empty()
            && parsed.segments[0].name == resource_type
            && !parsed.segments[0].choice
        {
            parsed.segments.remove(0);
        }
        Ok(parsed)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// Path without its last segment; `None` for single-segment paths.
    pub fn parent(&self) -> Option<FieldPath> {
        (self.segments.len() > 1).then(|| FieldPath {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn touches(&self, names: &[&str]) -> bool {
        self.segments
            .iter()
            .any(|segment| names.contains(&segment.name.as_str()))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

/// A matched node and where it sits in the document.
#[derive(Debug, Clone, PartialEq)]
pub struct Match<'a, N: ?Sized> {
    pub node: &'a N,
    pub locator: String,
}

/// Locator of child `index` out of `count` reached through field `name`.
pub fn child_locator(base: &str, name: &str, index: usize, count: usize) -> String {
    if count == 1 {
        format!("{}/{}", base, name)
    } else {
        format!("{}/{}/{}", base, name, index)
    }
}

/// All nodes reached by `path` from `root`, in document order.
pub fn navigate_all<'a, N: NavNode>(root: &'a N, path: &FieldPath, prefix: &str) -> Vec<Match<'a, N>> {
    let mut out = Vec::new();
    walk(root, path.segments(), prefix.to_string(), &mut out);
    out
}

fn walk<'a, N: NavNode>(node: &'a N, segments: &[Segment], locator: String, out: &mut Vec<Match<'a, N>>) {
    let Some((segment, rest)) = segments.split_first() else {
        out.push(Match { node, locator });
        return;
    };
    for name in segment.field_names(node) {
        let children = node.child_nodes(&name);
        let count = children.len();
        for (index, child) in children.into_iter().enumerate() {
            walk(child, rest, child_locator(&locator, &name, index, count), out);
        }
    }
}

/// The first node reached by `path`, taking the first child at every step.
pub fn navigate_one<'a, N: NavNode>(root: &'a N, path: &FieldPath, prefix: &str) -> Option<Match<'a, N>> {
    let mut node = root;
    let mut locator = prefix.to_string();
    for segment in path.segments() {
        let (name, children) = segment
            .field_names(node)
            .into_iter()
            .map(|name| {
                let children = node.child_nodes(&name);
                (name, children)
            })
            .find(|(_, children)| !children.is_empty())?;
        locator = child_locator(&locator, &name, 0, children.len());
        node = children[0];
    }
    Some(Match { node, locator })
}

/// Number of children `segment` selects directly under `node`.
pub fn child_count<N: NavNode>(node: &N, segment: &Segment) -> usize {
    segment
        .field_names(node)
        .iter()
        .map(|name| node.child_nodes(name).len())
        .sum()
}

/// Locator of a path whose nodes may not exist, built from segment names.
pub fn nominal_locator(prefix: &str, segments: &[Segment]) -> String {
    segments.iter().fold(prefix.to_string(), |mut acc, segment| {
        acc.push('/');
        acc.push_str(&segment.name);
        acc
    })
}
