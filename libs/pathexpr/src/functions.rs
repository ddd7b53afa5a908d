//! Function registry
//!
//! Static metadata for every supported function: arity bounds and the
//! category used by callers that reason about an expression's shape.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionCategory {
    /// Narrows or projects a collection (`where`, `select`, `ofType`)
    Filtering,
    /// Tests presence or quantifies over a collection (`exists`, `empty`, `all`)
    Existence,
    Aggregate,
    Subsetting,
    String,
    Logic,
}

#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub category: FunctionCategory,
}

const fn signature(
    name: &'static str,
    min_args: usize,
    max_args: usize,
    category: FunctionCategory,
) -> FunctionSpec {
    FunctionSpec {
        name,
        min_args,
        max_args,
        category,
    }
}

static FUNCTIONS: &[FunctionSpec] = &[
    signature("where", 1, 1, FunctionCategory::Filtering),
    signature("select", 1, 1, FunctionCategory::Filtering),
    signature("ofType", 1, 1, FunctionCategory::Filtering),
    signature("exists", 0, 1, FunctionCategory::Existence),
    signature("empty", 0, 0, FunctionCategory::Existence),
    signature("all", 1, 1, FunctionCategory::Existence),
    signature("count", 0, 0, FunctionCategory::Aggregate),
    signature("distinct", 0, 0, FunctionCategory::Aggregate),
    signature("first", 0, 0, FunctionCategory::Subsetting),
    signature("last", 0, 0, FunctionCategory::Subsetting),
    signature("matches", 1, 1, FunctionCategory::String),
    signature("startsWith", 1, 1, FunctionCategory::String),
    signature("endsWith", 1, 1, FunctionCategory::String),
    signature("contains", 1, 1, FunctionCategory::String),
    signature("length", 0, 0, FunctionCategory::String),
    signature("not", 0, 0, FunctionCategory::Logic),
    signature("hasValue", 0, 0, FunctionCategory::Logic),
    signature("iif", 2, 3, FunctionCategory::Logic),
];

pub fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

/// Resolve a call site, checking the name and argument count.
pub fn resolve(name: &str, argument_count: usize) -> Result<&'static FunctionSpec> {
    let spec = lookup(name).ok_or_else(|| Error::FunctionNotFound(name.to_string()))?;
    if argument_count < spec.min_args || argument_count > spec.max_args {
        let expected = if spec.min_args == spec.max_args {
            spec.min_args.to_string()
        } else {
            format!("{}..{}", spec.min_args, spec.max_args)
        };
        return Err(Error::InvalidArity {
            name: name.to_string(),
            expected,
            got: argument_count,
        });
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_checks_arity() {
        assert!(resolve("exists", 0).is_ok());
        assert!(resolve("exists", 1).is_ok());
        assert!(matches!(
            resolve("where", 0),
            Err(Error::InvalidArity { .. })
        ));
        assert!(matches!(
            resolve("frobnicate", 0),
            Err(Error::FunctionNotFound(_))
        ));
    }

    #[test]
    fn test_categories() {
        assert_eq!(lookup("where").unwrap().category, FunctionCategory::Filtering);
        assert_eq!(lookup("all").unwrap().category, FunctionCategory::Existence);
    }
}
