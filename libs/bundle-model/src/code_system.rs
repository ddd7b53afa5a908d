//! CodeSystem model
//!
//! Only the parts the closed-world code check needs: identity, status and the
//! concept hierarchy. Everything else is kept in `extensions`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// CodeSystem resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeSystem {
    #[serde(default = "default_resource_type")]
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Canonical identifier
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Publication status (draft | active | retired | unknown)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// not-present | example | fragment | complete | supplement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<Vec<CodeSystemConcept>>,

    /// Additional content
    #[serde(flatten)]
    pub extensions: HashMap<String, Value>,
}

fn default_resource_type() -> String {
    "CodeSystem".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeSystemConcept {
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,

    /// Child concepts (nested hierarchy)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<Vec<CodeSystemConcept>>,
}

/// A concept as returned by terminology lookups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Concept {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

/// Flat, closed set of concepts resolved for one system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConceptSet {
    url: String,
    concepts: Vec<Concept>,
    codes: HashSet<String>,
}

impl ConceptSet {
    pub fn new(url: impl Into<String>, concepts: Vec<Concept>) -> Self {
        let codes = concepts.iter().map(|c| c.code.clone()).collect();
        Self {
            url: url.into(),
            concepts,
            codes,
        }
    }

    /// A set built from bare codes, used for inline allow-lists.
    pub fn from_codes<I, S>(url: impl Into<String>, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let concepts = codes
            .into_iter()
            .map(|code| Concept {
                code: code.into(),
                display: None,
            })
            .collect();
        Self::new(url, concepts)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn concepts(&self) -> &[Concept] {
        &self.concepts
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }
}

impl CodeSystem {
    pub fn from_value(value: &Value) -> Result<Self> {
        let code_system: Self = serde_json::from_value(value.clone())?;
        if code_system.resource_type != "CodeSystem" {
            return Err(Error::InvalidCodeSystem(format!(
                "expected resourceType 'CodeSystem', found '{}'",
                code_system.resource_type
            )));
        }
        if code_system.url.trim().is_empty() {
            return Err(Error::InvalidCodeSystem("url must not be empty".into()));
        }
        Ok(code_system)
    }

    /// All concepts, depth first, with nested children flattened.
    pub fn flattened_concepts(&self) -> Vec<Concept> {
        fn walk(concepts: &[CodeSystemConcept], out: &mut Vec<Concept>) {
            for concept in concepts {
                out.push(Concept {
                    code: concept.code.clone(),
                    display: concept.display.clone(),
                });
                walk(concept.concept.as_deref().unwrap_or(&[]), out);
            }
        }
        let mut out = Vec::new();
        walk(self.concept.as_deref().unwrap_or(&[]), &mut out);
        out
    }

    pub fn to_concept_set(&self) -> ConceptSet {
        ConceptSet::new(self.url.clone(), self.flattened_concepts())
    }
}
