//! Path-expression engine for bundle rules
//!
//! A deliberately small expression language covering what rule evaluation
//! needs: navigation, filtering predicates, cardinality, existence and
//! boolean logic.
//!
//! ```text
//! Expression String
//!      |
//!   Lexer -> Tokens
//!      |
//!   Parser -> AST
//!      |
//!   compile (function/arity checks) -> CompiledExpr (cached)
//!      |
//!   Evaluator over serde_json::Value -> Collection
//! ```
//!
//! # Example
//!
//! ```rust
//! use bundlecheck_pathexpr::Engine;
//! use serde_json::json;
//!
//! let engine = Engine::new();
//! let patient = json!({
//!     "resourceType": "Patient",
//!     "telecom": [{"system": "phone"}, {"system": "email"}]
//! });
//! let expr = engine.compile("telecom.where(system = 'phone').exists()").unwrap();
//! assert_eq!(engine.evaluate_boolean(&expr, &patient).unwrap(), Some(true));
//! ```

pub mod ast;
pub mod engine;
pub mod error;
mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod token;
pub mod value;

pub use engine::{compile, CompiledExpr, Engine};
pub use error::{Error, Result};
pub use functions::FunctionCategory;
pub use value::{Collection, Value};
