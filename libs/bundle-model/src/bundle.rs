//! Bundle model
//!
//! [`Bundle`] is the wire shape. [`ParsedBundle`] is what a validation run works
//! on: every entry's record held as its resilient tree plus the outcome of the
//! typed mapping, built once and read-only afterwards.

use crate::error::{Error, Result};
use crate::typed::{self, FieldIssue, TypedParse, TypedResource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Bundle resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(default = "default_resource_type")]
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub bundle_type: Option<BundleType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Entries in document order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<Vec<BundleEntry>>,

    /// Additional content beyond core fields
    #[serde(flatten)]
    pub extensions: HashMap<String, Value>,
}

fn default_resource_type() -> String {
    "Bundle".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundleType {
    Document,
    Message,
    Transaction,
    TransactionResponse,
    Batch,
    BatchResponse,
    History,
    Searchset,
    Collection,
    #[serde(other)]
    Other,
}

/// Entry in the bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,

    /// The record, kept as an untyped tree
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,

    /// Additional content beyond core fields (request, response, search)
    #[serde(flatten)]
    pub extensions: HashMap<String, Value>,
}

impl Bundle {
    pub fn new(bundle_type: BundleType) -> Self {
        Self {
            resource_type: "Bundle".to_string(),
            id: None,
            bundle_type: Some(bundle_type),
            timestamp: None,
            entry: None,
            extensions: HashMap::new(),
        }
    }

    /// Parse from JSON Value
    pub fn from_value(value: &Value) -> Result<Self> {
        let bundle: Self = serde_json::from_value(value.clone())?;
        if bundle.resource_type != "Bundle" {
            return Err(Error::InvalidBundle(format!(
                "expected resourceType 'Bundle', found '{}'",
                bundle.resource_type
            )));
        }
        Ok(bundle)
    }

    pub fn entries(&self) -> &[BundleEntry] {
        self.entry.as_deref().unwrap_or(&[])
    }

    pub fn add_entry(&mut self, entry: BundleEntry) {
        self.entry.get_or_insert_with(Vec::new).push(entry);
    }

    /// Add a record with an optional full URL.
    pub fn add_resource(&mut self, full_url: Option<&str>, resource: Value) {
        self.add_entry(BundleEntry {
            full_url: full_url.map(str::to_string),
            resource: Some(resource),
            extensions: HashMap::new(),
        });
    }
}

/// One record of a parsed bundle in both representations.
#[derive(Debug, Clone)]
pub struct Record {
    entry_index: usize,
    full_url: Option<String>,
    resource_type: String,
    id: Option<String>,
    tree: Value,
    typed: TypedParse,
}

impl Record {
    pub fn new(entry_index: usize, full_url: Option<String>, tree: Value) -> Self {
        let resource_type = tree
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let id = tree.get("id").and_then(Value::as_str).map(str::to_string);
        let typed = typed::map_resource(&tree);
        if let Err(issues) = &typed {
            tracing::debug!(
                entry = entry_index,
                resource_type = %resource_type,
                issues = issues.len(),
                "typed mapping failed, record is tree-only"
            );
        }
        Self {
            entry_index,
            full_url,
            resource_type,
            id,
            tree,
            typed,
        }
    }

    pub fn entry_index(&self) -> usize {
        self.entry_index
    }

    pub fn full_url(&self) -> Option<&str> {
        self.full_url.as_deref()
    }

    /// Declared type name; empty when the tree has none.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The resilient tree, always available.
    pub fn tree(&self) -> &Value {
        &self.tree
    }

    /// The typed graph, present only if mapping fully succeeded.
    pub fn typed(&self) -> Option<&TypedResource> {
        self.typed.as_ref().ok()
    }

    pub fn typed_parse_succeeded(&self) -> bool {
        self.typed.is_ok()
    }

    pub fn typed_issues(&self) -> &[FieldIssue] {
        match &self.typed {
            Ok(_) => &[],
            Err(issues) => issues,
        }
    }

    /// Locator prefix for values inside this record.
    pub fn locator_prefix(&self) -> String {
        format!("/entry/{}/resource", self.entry_index)
    }
}

#[derive(Debug, Clone)]
pub struct ParsedEntry {
    pub full_url: Option<String>,
    pub record: Option<Record>,
}

/// A bundle parsed once per run. Entry order is preserved.
#[derive(Debug, Clone, Default)]
pub struct ParsedBundle {
    id: Option<String>,
    entries: Vec<ParsedEntry>,
}

impl ParsedBundle {
    pub fn from_bundle(bundle: Bundle) -> Self {
        let entries: Vec<ParsedEntry> = bundle
            .entry
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, entry)| ParsedEntry {
                record: entry
                    .resource
                    .map(|tree| Record::new(index, entry.full_url.clone(), tree)),
                full_url: entry.full_url,
            })
            .collect();
        let parsed = Self {
            id: bundle.id,
            entries,
        };
        tracing::debug!(
            entries = parsed.entries.len(),
            tree_only = parsed.records().filter(|r| !r.typed_parse_succeeded()).count(),
            "parsed bundle"
        );
        parsed
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        Bundle::from_value(value).map(Self::from_bundle)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn entries(&self) -> &[ParsedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records in entry order, skipping entries without one.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.entries.iter().filter_map(|e| e.record.as_ref())
    }

    /// Records of one type. The iterator borrows only the bundle.
    pub fn records_of_type<'a>(&'a self, resource_type: &str) -> impl Iterator<Item = &'a Record> + 'a {
        let resource_type = resource_type.to_owned();
        self.records()
            .filter(move |r| r.resource_type() == resource_type)
    }

    pub fn record(&self, entry_index: usize) -> Option<&Record> {
        self.entries.get(entry_index).and_then(|e| e.record.as_ref())
    }
}
