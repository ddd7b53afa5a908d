//! Regex validator and the compiled-pattern cache.

use super::{display_text, Target};
use crate::error::{DefinitionCategory, RuleFailure, PATTERN_HINT};
use crate::navigator::{navigate_all, NavNode};
use bundlecheck_model::{codes, RuleDefinition, ValidationError};
use lru::LruCache;
use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_CAPACITY: usize = 256;

/// Compiled patterns shared by every run of one engine.
pub struct PatternCache {
    cache: Mutex<LruCache<String, Arc<Regex>>>,
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl PatternCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get_or_compile(&self, pattern: &str) -> Result<Arc<Regex>, regex::Error> {
        if let Some(hit) = self.lock().get(pattern) {
            return Ok(Arc::clone(hit));
        }
        let compiled = Arc::new(Regex::new(pattern)?);
        self.lock().put(pattern.to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Arc<Regex>>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct PatternCheck {
    regex: Arc<Regex>,
}

impl PatternCheck {
    pub fn from_rule(rule: &RuleDefinition, cache: &PatternCache) -> Result<Self, RuleFailure> {
        let pattern = rule.params.require_str("pattern")?;
        let regex = cache
            .get_or_compile(pattern)
            .map_err(|e| {
                RuleFailure::definition(
                    DefinitionCategory::Syntax,
                    format!("invalid pattern '{}': {}", pattern, e),
                    PATTERN_HINT,
                )
            })?;
        Ok(Self { regex })
    }

    /// Search semantics: authors anchor with `^...$` when they need to.
    pub fn run<N: NavNode>(&self, root: &N, target: &Target<'_>, out: &mut Vec<ValidationError>) {
        for m in navigate_all(root, target.path, &target.prefix()) {
            if m.node.is_blank() {
                continue;
            }
            if m.node.scalar_text().is_some_and(|text| self.regex.is_match(&text)) {
                continue;
            }
            let actual = display_text(m.node);
            out.push(
                target
                    .error(
                        codes::PATTERN_MISMATCH,
                        format!("'{}' at {} does not match {}", actual, target.path, self.regex.as_str()),
                    )
                    .with_locator(m.locator)
                    .with_detail("pattern", self.regex.as_str())
                    .with_detail("actual", actual),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::testing::run_both;
    use crate::validators::Check;
    use bundlecheck_model::{Params, RuleType};
    use serde_json::json;

    fn rule(pattern: &str) -> RuleDefinition {
        RuleDefinition::new("zip", RuleType::Regex, "Patient", "address.postalCode")
            .with_params(Params::new().with("pattern", pattern))
    }

    #[test]
    fn test_search_semantics() {
        let cache = PatternCache::default();
        let unanchored = rule("[0-9]{5}");
        let check = Check::Pattern(PatternCheck::from_rule(&unanchored, &cache).unwrap());
        let patient = json!({"resourceType": "Patient", "address": [{"postalCode": "AB12345"}]});
        assert!(run_both(&check, &unanchored, patient.clone()).is_empty());

        let anchored = rule("^[0-9]{5}$");
        let check = Check::Pattern(PatternCheck::from_rule(&anchored, &cache).unwrap());
        let errors = run_both(&check, &anchored, patient);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_code, codes::PATTERN_MISMATCH);
        assert_eq!(errors[0].locator.as_deref(), Some("/entry/0/resource/address/postalCode"));
    }

    #[test]
    fn test_blank_values_are_skipped() {
        let cache = PatternCache::default();
        let r = rule("^[0-9]{5}$");
        let check = Check::Pattern(PatternCheck::from_rule(&r, &cache).unwrap());
        let patient = json!({"resourceType": "Patient", "address": [{"postalCode": ""}, {"postalCode": "12345"}]});
        assert!(run_both(&check, &r, patient).is_empty());
    }

    #[test]
    fn test_invalid_pattern_is_a_syntax_definition_error() {
        let err = PatternCheck::from_rule(&rule("(["), &PatternCache::default()).err().unwrap();
        assert_eq!(err.error_code(), codes::RULE_DEFINITION_ERROR);
        match err {
            RuleFailure::Definition { category, hint, .. } => {
                assert_eq!(category, DefinitionCategory::Syntax);
                assert_eq!(hint, PATTERN_HINT);
            }
            other => panic!("unexpected failure: {:?}", other),
        }
    }

    #[test]
    fn test_missing_pattern_is_configuration_error() {
        let r = RuleDefinition::new("zip", RuleType::Regex, "Patient", "address.postalCode");
        let err = PatternCheck::from_rule(&r, &PatternCache::default()).err().unwrap();
        assert_eq!(err.error_code(), codes::RULE_CONFIGURATION_ERROR);
    }

    #[test]
    fn test_cache_reuses_compiled_pattern() {
        let cache = PatternCache::new(2);
        let a = cache.get_or_compile("^a$").unwrap();
        let b = cache.get_or_compile("^a$").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }
}
