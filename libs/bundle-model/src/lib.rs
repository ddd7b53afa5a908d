//! Bundle and rule models
//!
//! - [`bundle`]: the bundle wire shape and the parsed, read-only form a run
//!   works on, holding every record as a resilient tree plus its typed view
//! - [`typed`]: the best-effort typed mapping with per-field issues
//! - [`rules`] and [`params`]: rule definitions and their open parameter maps
//! - [`issue`] and [`codes`]: validation errors and the codes they carry
//! - [`code_system`]: code systems and resolved concept sets
//!
//! # Example
//!
//! ```rust
//! use bundlecheck_model::ParsedBundle;
//! use serde_json::json;
//!
//! let bundle = ParsedBundle::from_value(&json!({
//!     "resourceType": "Bundle",
//!     "type": "collection",
//!     "entry": [{"resource": {"resourceType": "Patient", "id": "p1"}}]
//! }))
//! .unwrap();
//!
//! let patient = bundle.record(0).unwrap();
//! assert_eq!(patient.resource_type(), "Patient");
//! assert!(patient.typed_parse_succeeded());
//! ```

pub mod bundle;
pub mod code_system;
pub mod codes;
pub mod error;
pub mod issue;
pub mod params;
pub mod rules;
pub mod typed;

pub use bundle::{Bundle, BundleEntry, BundleType, ParsedBundle, ParsedEntry, Record};
pub use code_system::{CodeSystem, CodeSystemConcept, Concept, ConceptSet};
pub use error::{Error, Result};
pub use issue::ValidationError;
pub use params::{ParamError, ParamValue, Params};
pub use rules::{InstanceScope, RuleDefinition, RuleSet, RuleType, Severity};
pub use typed::{FieldIssue, TypedField, TypedNode, TypedPrimitive, TypedResource};
