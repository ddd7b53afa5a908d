//! Expression engine
//!
//! Orchestrates the pipeline: Parse → AST → compile checks → evaluation,
//! caching compiled expressions by source text.

use crate::ast::AstNode;
use crate::error::Result;
use crate::eval::{self, Evaluator};
use crate::functions::{self, FunctionCategory};
use crate::parser;
use crate::value::Collection;
use lru::LruCache;
use serde_json::Value as JsonValue;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

const DEFAULT_CACHE_SIZE: usize = 512;

/// A parsed expression whose function calls have been resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpr {
    source: String,
    ast: AstNode,
}

impl CompiledExpr {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &AstNode {
        &self.ast
    }

    /// `true` if any invoked function belongs to one of `categories`.
    pub fn uses_category(&self, categories: &[FunctionCategory]) -> bool {
        self.ast
            .function_names()
            .into_iter()
            .filter_map(functions::lookup)
            .any(|spec| categories.contains(&spec.category))
    }
}

fn check_functions(ast: &AstNode) -> Result<()> {
    let mut failure = None;
    ast.for_each_function(&mut |name, arguments| {
        if failure.is_none() {
            if let Err(e) = functions::resolve(name, arguments.len()) {
                failure = Some(e);
            }
        }
    });
    failure.map_or(Ok(()), Err)
}

/// Compile without caching.
pub fn compile(source: &str) -> Result<CompiledExpr> {
    let ast = parser::parse(source)?;
    check_functions(&ast)?;
    Ok(CompiledExpr {
        source: source.to_string(),
        ast,
    })
}

/// Thread-safe engine with a bounded compiled-expression cache.
pub struct Engine {
    cache: Mutex<LruCache<String, Arc<CompiledExpr>>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_cache_size(DEFAULT_CACHE_SIZE)
    }

    pub fn with_cache_size(size: usize) -> Self {
        let capacity = NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Compile an expression, reusing a cached plan when available.
    pub fn compile(&self, source: &str) -> Result<Arc<CompiledExpr>> {
        let key = source.trim();
        if let Some(hit) = self.lock_cache().get(key) {
            return Ok(Arc::clone(hit));
        }
        let compiled = Arc::new(compile(key)?);
        self.lock_cache()
            .put(key.to_string(), Arc::clone(&compiled));
        tracing::trace!(expression = key, "compiled path expression");
        Ok(compiled)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, LruCache<String, Arc<CompiledExpr>>> {
        // Cached plans are immutable; a poisoned lock is still safe to read.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Evaluate against `resource` as both focus and `%resource`.
    pub fn evaluate<'a>(&self, expr: &CompiledExpr, resource: &'a JsonValue) -> Result<Collection<'a>> {
        let evaluator = Evaluator::new(resource);
        let focus = evaluator.root_collection();
        evaluator.evaluate(&expr.ast, &focus, None)
    }

    /// Compile and evaluate in one step.
    pub fn evaluate_str<'a>(&self, source: &str, resource: &'a JsonValue) -> Result<Collection<'a>> {
        let compiled = self.compile(source)?;
        self.evaluate(&compiled, resource)
    }

    /// Evaluate and convert the result with singleton boolean semantics:
    /// empty → `None`, one item → its boolean (non-booleans count as `true`),
    /// several items → type error.
    pub fn evaluate_boolean(&self, expr: &CompiledExpr, resource: &JsonValue) -> Result<Option<bool>> {
        let result = self.evaluate(expr, resource)?;
        eval::to_boolean(&result)
    }

    pub fn cached_len(&self) -> usize {
        self.lock_cache().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_reuses_plan() {
        let engine = Engine::with_cache_size(4);
        let a = engine.compile("name.exists()").unwrap();
        let b = engine.compile("  name.exists() ").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(engine.cached_len(), 1);
    }

    #[test]
    fn test_compile_rejects_unknown_function() {
        let err = compile("name.frobnicate()").unwrap_err();
        assert!(err.is_syntax());
    }

    #[test]
    fn test_uses_category() {
        let expr = compile("telecom.where(system = 'phone').count() > 0").unwrap();
        assert!(expr.uses_category(&[FunctionCategory::Filtering]));
        assert!(!expr.uses_category(&[FunctionCategory::Existence]));
    }

    #[test]
    fn test_evaluate_boolean() {
        let engine = Engine::new();
        let patient = json!({"resourceType": "Patient", "active": true});
        let expr = engine.compile("active").unwrap();
        assert_eq!(engine.evaluate_boolean(&expr, &patient).unwrap(), Some(true));
        let expr = engine.compile("deceased").unwrap();
        assert_eq!(engine.evaluate_boolean(&expr, &patient).unwrap(), None);
    }
}
