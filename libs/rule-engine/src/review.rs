//! Rule review
//!
//! Governance checks over rule metadata, run before a rule set reaches the
//! engine. A blocked rule is never evaluated; a warning is informational.

use bundlecheck_model::{RuleDefinition, RuleSet, RuleType};
use serde::Serialize;
use std::fmt;

pub const CUSTOM_ERROR_CODE_MISSING: &str = "CUSTOM_ERROR_CODE_MISSING";
pub const ERROR_CODE_IGNORED: &str = "ERROR_CODE_IGNORED";
pub const FIELD_PATH_MISSING: &str = "FIELD_PATH_MISSING";
pub const RESOURCE_TYPE_MISSING: &str = "RESOURCE_TYPE_MISSING";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReviewStatus {
    Ok,
    Warning,
    Blocked,
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReviewStatus::Ok => "OK",
            ReviewStatus::Warning => "WARNING",
            ReviewStatus::Blocked => "BLOCKED",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewIssue {
    pub code: &'static str,
    pub status: ReviewStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub rule_id: String,
    pub status: ReviewStatus,
    pub issues: Vec<ReviewIssue>,
}

impl ReviewOutcome {
    pub fn new(rule_id: impl Into<String>, issues: Vec<ReviewIssue>) -> Self {
        let status = issues
            .iter()
            .map(|issue| issue.status)
            .max()
            .unwrap_or(ReviewStatus::Ok);
        Self {
            rule_id: rule_id.into(),
            status,
            issues,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.status == ReviewStatus::Blocked
    }

    pub fn has_issue(&self, code: &str) -> bool {
        self.issues.iter().any(|issue| issue.code == code)
    }
}

pub trait RuleReview: Send + Sync {
    fn review(&self, rule: &RuleDefinition) -> ReviewOutcome;
}

/// The checks every rule set goes through.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineReview;

impl RuleReview for BaselineReview {
    fn review(&self, rule: &RuleDefinition) -> ReviewOutcome {
        let mut issues = Vec::new();
        let configured = rule.configured_error_code();

        if rule.rule_type == RuleType::CustomPathExpression {
            if configured.is_none() {
                issues.push(ReviewIssue {
                    code: CUSTOM_ERROR_CODE_MISSING,
                    status: ReviewStatus::Blocked,
                    message: "custom expression rules must declare an errorCode".into(),
                });
            }
        } else if let Some(code) = configured {
            if !rule.rule_type.fixed_error_codes().contains(&code) {
                issues.push(ReviewIssue {
                    code: ERROR_CODE_IGNORED,
                    status: ReviewStatus::Warning,
                    message: format!(
                        "{} rules always report {}; errorCode '{}' is ignored",
                        rule.rule_type,
                        rule.rule_type.fixed_error_codes().join(" / "),
                        code
                    ),
                });
            }
        }

        if !rule.rule_type.is_bundle_level() {
            if rule.resource_type.trim().is_empty() {
                issues.push(ReviewIssue {
                    code: RESOURCE_TYPE_MISSING,
                    status: ReviewStatus::Blocked,
                    message: "record-level rules must name a resourceType".into(),
                });
            }
            let has_expression = rule.rule_type == RuleType::CustomPathExpression
                && rule
                    .params
                    .get("expression")
                    .and_then(|v| v.as_str())
                    .is_some_and(|s| !s.trim().is_empty());
            if rule.field_path.trim().is_empty() && !has_expression {
                issues.push(ReviewIssue {
                    code: FIELD_PATH_MISSING,
                    status: ReviewStatus::Blocked,
                    message: "record-level rules must set a fieldPath".into(),
                });
            }
        }

        ReviewOutcome::new(rule.id.clone(), issues)
    }
}

/// Outcome of gating a rule set: what may run, and what was reviewed.
#[derive(Debug, Clone)]
pub struct GateResult {
    pub admitted: RuleSet,
    pub outcomes: Vec<ReviewOutcome>,
}

impl GateResult {
    pub fn blocked(&self) -> impl Iterator<Item = &ReviewOutcome> {
        self.outcomes.iter().filter(|o| o.is_blocked())
    }
}

/// Review every rule and drop the blocked ones.
pub fn gate_rule_set(review: &dyn RuleReview, rules: &RuleSet) -> GateResult {
    let outcomes: Vec<ReviewOutcome> = rules.rules.iter().map(|rule| review.review(rule)).collect();
    let admitted = rules
        .rules
        .iter()
        .zip(&outcomes)
        .filter(|(_, outcome)| !outcome.is_blocked())
        .map(|(rule, _)| rule.clone())
        .collect();
    let result = GateResult {
        admitted: RuleSet::new(rules.project_id.clone(), admitted),
        outcomes,
    };
    tracing::info!(
        project = %rules.project_id,
        admitted = result.admitted.len(),
        blocked = result.blocked().count(),
        "reviewed rule set"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use bundlecheck_model::{codes, Params};

    #[test]
    fn test_clean_rule_is_ok() {
        let rule = RuleDefinition::new("r1", RuleType::Required, "Patient", "name")
            .with_error_code(codes::FIELD_REQUIRED);
        let outcome = BaselineReview.review(&rule);
        assert_eq!(outcome.status, ReviewStatus::Ok);
        assert!(outcome.issues.is_empty());
    }

    #[test]
    fn test_custom_without_error_code_is_blocked() {
        let rule = RuleDefinition::new("r1", RuleType::CustomPathExpression, "Patient", "")
            .with_params(Params::new().with("expression", "name.exists()"));
        let outcome = BaselineReview.review(&rule);
        assert!(outcome.is_blocked());
        assert!(outcome.has_issue(CUSTOM_ERROR_CODE_MISSING));
        assert!(!outcome.has_issue(FIELD_PATH_MISSING));
    }

    #[test]
    fn test_foreign_error_code_is_a_warning() {
        let rule = RuleDefinition::new("r1", RuleType::Regex, "Patient", "gender").with_error_code("MY_CODE");
        let outcome = BaselineReview.review(&rule);
        assert_eq!(outcome.status, ReviewStatus::Warning);
        assert!(outcome.has_issue(ERROR_CODE_IGNORED));
    }

    #[test]
    fn test_missing_field_path() {
        let rule = RuleDefinition::new("r1", RuleType::Required, "Patient", " ");
        assert!(BaselineReview.review(&rule).has_issue(FIELD_PATH_MISSING));

        let bundle_rule = RuleDefinition::new("r2", RuleType::RequiredResources, "", "");
        assert_eq!(BaselineReview.review(&bundle_rule).status, ReviewStatus::Ok);
    }

    #[test]
    fn test_gate_drops_blocked_rules() {
        let rules = RuleSet::new(
            "p1",
            vec![
                RuleDefinition::new("ok", RuleType::Required, "Patient", "name"),
                RuleDefinition::new("blocked", RuleType::CustomPathExpression, "Patient", "active"),
                RuleDefinition::new("warned", RuleType::Required, "Patient", "gender").with_error_code("X"),
            ],
        );
        let gate = gate_rule_set(&BaselineReview, &rules);
        let admitted: Vec<_> = gate.admitted.rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(admitted, vec!["ok", "warned"]);
        assert_eq!(gate.blocked().count(), 1);
        assert_eq!(gate.admitted.project_id, "p1");
    }
}
