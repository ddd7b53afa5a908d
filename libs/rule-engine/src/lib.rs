//! Rule evaluation engine for healthcare bundles
//!
//! Runs a rule set against a parsed bundle and reports every violation as a
//! [`ValidationError`](bundlecheck_model::ValidationError) with a positional
//! locator.
//!
//! ```text
//! RuleSet ──► per rule: scope ─► lane plan ─► validator ─► errors
//!                                    │
//!                 typed graph ◄──────┴──────► resilient tree
//! ```
//!
//! Every record is held twice: as a typed graph when typed mapping succeeded,
//! and always as the raw tree. The planner picks the typed graph only when it
//! is known to be safe for the rule; otherwise the tree is used. Both lanes
//! report the same violations.
//!
//! One failing rule never stops the run: configuration, definition and
//! execution failures become errors of their own and evaluation moves on.
//!
//! # Example
//!
//! ```rust
//! use bundlecheck_engine::{EngineConfig, RuleEngine};
//! use bundlecheck_model::{ParsedBundle, RuleDefinition, RuleSet, RuleType};
//! use serde_json::json;
//!
//! let bundle = ParsedBundle::from_value(&json!({
//!     "resourceType": "Bundle",
//!     "type": "collection",
//!     "entry": [{"resource": {"resourceType": "Patient", "id": "p1"}}]
//! }))
//! .unwrap();
//! let rules = RuleSet::new(
//!     "demo",
//!     vec![RuleDefinition::new("name-required", RuleType::Required, "Patient", "name.family")],
//! );
//!
//! let engine = RuleEngine::new(EngineConfig::default()).unwrap();
//! let report = futures::executor::block_on(engine.validate(&bundle, &rules));
//! assert_eq!(report.errors.len(), 1);
//! assert_eq!(report.errors[0].locator.as_deref(), Some("/entry/0/resource/name/family"));
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod navigator;
pub mod planner;
pub mod references;
pub mod review;
pub mod scope;
pub mod terminology;
pub mod validators;

pub use config::{EngineConfig, ReferencesConfig};
pub use engine::{CancelToken, LaneDecision, RuleEngine, ValidationReport};
pub use error::{DefinitionCategory, EngineError, RuleFailure};
pub use navigator::{FieldPath, FieldPathError, NavNode};
pub use planner::{FallbackReason, Lane, LanePlan};
pub use references::{ReferencePolicy, ReferenceResolver};
pub use review::{gate_rule_set, BaselineReview, GateResult, ReviewOutcome, ReviewStatus, RuleReview};
pub use terminology::{ConceptSetCache, InMemoryTerminology, TerminologyError, TerminologyService};
