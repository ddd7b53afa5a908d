//! Malformed input must produce errors, never panics

use bundlecheck_pathexpr::{compile, Engine};
use serde_json::json;

#[test]
fn test_malformed_expressions_no_panic() {
    let malformed = vec![
        "",         // Empty
        "(",        // Unclosed paren
        ")",        // Unmatched closing paren
        "[",        // Unclosed bracket
        "{",        // Unclosed brace
        "'",        // Unterminated string
        "1 +",      // Incomplete expression
        "+",        // Just operator
        "..",       // Double dot
        "1 2",      // Missing operator
        "name.",    // Trailing dot
        ".name",    // Leading dot
        "1 ** 2",   // Invalid operator
        "1 @ 2",    // Invalid character
        "name()()", // Double empty call
        "$",        // Incomplete variable
        "%",        // Incomplete external constant
        "`open",    // Unterminated delimited identifier
    ];

    for expr in malformed {
        let result = compile(expr);
        assert!(result.is_err(), "Expression '{}' should fail to compile", expr);
    }
}

#[test]
fn test_deep_nesting_is_rejected() {
    let depth = 250;
    let expr = format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
    assert!(compile(&expr).is_err());
}

#[test]
fn test_long_flat_expression() {
    let mut expr = "1".to_string();
    for _ in 0..200 {
        expr.push_str(" + 1");
    }
    let doc = json!({});
    let result = Engine::new().evaluate_str(&expr, &doc).unwrap();
    assert_eq!(result[0].to_text().as_deref(), Some("201"));
}

#[test]
fn test_type_mismatches_return_errors() {
    let doc = json!({"a": "x", "b": 1, "c": {"d": true}});
    let engine = Engine::new();
    for expr in ["a + b", "a < b", "-a", "c.d * 2", "b.length()", "a[a]"] {
        assert!(
            engine.evaluate_str(expr, &doc).is_err(),
            "Expression '{}' should fail at runtime",
            expr
        );
    }
}
