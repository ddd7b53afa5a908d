//! Rule engine
//!
//! [`RuleEngine`] is reusable and owns everything that outlives a run: the
//! configuration, the compiled-expression and pattern caches and the
//! terminology source. Each call to [`RuleEngine::validate`] builds a
//! short-lived [`ValidationRun`] with its own concept-set cache.

use crate::config::EngineConfig;
use crate::error::{DefinitionCategory, EngineError, RuleFailure, FIELD_PATH_HINT};
use crate::navigator::FieldPath;
use crate::planner::{self, FallbackReason, Lane, LanePlan};
use crate::references::{ReferencePolicy, ReferenceResolver};
use crate::scope;
use crate::terminology::{ConceptSetCache, InMemoryTerminology, TerminologyService};
use crate::validators::required_resources::RequiredResources;
use crate::validators::{Check, PatternCache, Services, Target};
use bundlecheck_model::{ParsedBundle, Record, RuleDefinition, RuleSet, Severity, ValidationError};
use bundlecheck_pathexpr::Engine as ExpressionEngine;
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation for a run: a shared flag plus an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also trips once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// The lane chosen for one rule on one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneDecision {
    pub rule_id: String,
    pub entry_index: usize,
    pub lane: Lane,
    pub reasons: Vec<FallbackReason>,
}

impl LaneDecision {
    fn new(rule: &RuleDefinition, record: &Record, plan: LanePlan) -> Self {
        Self {
            rule_id: rule.id.clone(),
            entry_index: record.entry_index(),
            lane: plan.lane(),
            reasons: plan.fallback_reasons,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub rules_evaluated: usize,
    pub cancelled: bool,
    pub lanes: Vec<LaneDecision>,
}

impl ValidationReport {
    pub fn has_errors(&self) -> bool {
        self.errors.iter().any(|e| e.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.errors.iter().filter(|e| e.severity == Severity::Error).count()
    }

    pub fn warning_count(&self) -> usize {
        self.errors.iter().filter(|e| e.severity == Severity::Warning).count()
    }

    pub fn with_code<'a>(&'a self, code: &'a str) -> impl Iterator<Item = &'a ValidationError> {
        self.errors.iter().filter(move |e| e.error_code == code)
    }
}

/// Reusable engine - owns configuration, caches and the terminology source
pub struct RuleEngine {
    config: EngineConfig,
    expressions: ExpressionEngine,
    patterns: PatternCache,
    terminology: Arc<dyn TerminologyService>,
    references: ReferenceResolver,
}

impl RuleEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            expressions: ExpressionEngine::with_cache_size(config.expression_cache_size),
            patterns: PatternCache::default(),
            terminology: Arc::new(InMemoryTerminology::new()),
            references: ReferenceResolver::new(ReferencePolicy::from(&config.references)),
            config,
        })
    }

    pub fn with_terminology(mut self, terminology: Arc<dyn TerminologyService>) -> Self {
        self.terminology = terminology;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn validate(&self, bundle: &ParsedBundle, rules: &RuleSet) -> ValidationReport {
        self.validate_with_cancel(bundle, rules, &CancelToken::new()).await
    }

    pub async fn validate_with_cancel(
        &self,
        bundle: &ParsedBundle,
        rules: &RuleSet,
        cancel: &CancelToken,
    ) -> ValidationReport {
        let started = Instant::now();
        let run = ValidationRun {
            engine: self,
            bundle,
            concepts: ConceptSetCache::new(
                Arc::clone(&self.terminology),
                rules.project_id.clone(),
                self.config.terminology_timeout(),
                self.config.terminology_cache_capacity,
            ),
        };
        let report = run.execute(&rules.rules, cancel).await;
        tracing::info!(
            project = %rules.project_id,
            entries = bundle.len(),
            rules = report.rules_evaluated,
            errors = report.errors.len(),
            cancelled = report.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "validation run finished"
        );
        report
    }

    /// Lane decisions for every record-level rule and in-scope record,
    /// without evaluating anything.
    pub fn plan(&self, bundle: &ParsedBundle, rules: &RuleSet) -> Vec<LaneDecision> {
        rules
            .rules
            .iter()
            .filter(|rule| !rule.rule_type.is_bundle_level())
            .flat_map(|rule| {
                self.records_in_scope(bundle, rule)
                    .into_iter()
                    .map(move |record| {
                        let plan = planner::plan(rule, record.tree(), record.typed_parse_succeeded());
                        LaneDecision::new(rule, record, plan)
                    })
            })
            .collect()
    }

    fn records_in_scope<'b>(&self, bundle: &'b ParsedBundle, rule: &RuleDefinition) -> Vec<&'b Record> {
        bundle
            .records_of_type(&rule.resource_type)
            .filter(|record| scope::should_validate(record, &rule.instance_scope, &self.expressions))
            .collect()
    }
}

/// Errors and lane decisions produced by one rule.
#[derive(Default)]
struct RuleOutput {
    index: usize,
    evaluated: bool,
    errors: Vec<ValidationError>,
    lanes: Vec<LaneDecision>,
}

/// Short-lived validation execution
struct ValidationRun<'a> {
    engine: &'a RuleEngine,
    bundle: &'a ParsedBundle,
    concepts: ConceptSetCache,
}

impl<'a> ValidationRun<'a> {
    async fn execute(&self, rules: &[RuleDefinition], cancel: &CancelToken) -> ValidationReport {
        let mut outputs: Vec<RuleOutput> = futures::stream::iter(rules.iter().enumerate())
            .map(|(index, rule)| self.guarded(index, rule, cancel))
            .buffer_unordered(self.engine.config.max_concurrent_rules)
            .collect()
            .await;
        outputs.sort_by_key(|output| output.index);

        let mut report = ValidationReport {
            cancelled: outputs.iter().any(|o| !o.evaluated),
            ..ValidationReport::default()
        };
        for output in outputs {
            report.rules_evaluated += usize::from(output.evaluated);
            report.errors.extend(output.errors);
            report.lanes.extend(output.lanes);
        }

        if self.engine.config.references.enabled && !report.cancelled {
            report.errors.extend(self.engine.references.validate(self.bundle));
        }
        report
    }

    /// Run one rule, isolating cancellation and panics.
    async fn guarded(&self, index: usize, rule: &RuleDefinition, cancel: &CancelToken) -> RuleOutput {
        if cancel.is_cancelled() {
            tracing::debug!(rule = %rule.id, "run cancelled, skipping rule");
            return RuleOutput {
                index,
                ..RuleOutput::default()
            };
        }
        let mut output = match AssertUnwindSafe(self.run_rule(rule)).catch_unwind().await {
            Ok(output) => output,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::warn!(rule = %rule.id, panic = %message, "rule panicked");
                RuleOutput {
                    errors: vec![RuleFailure::execution(message).into_error(rule, None)],
                    ..RuleOutput::default()
                }
            }
        };
        output.index = index;
        output.evaluated = true;
        output
    }

    async fn run_rule(&self, rule: &RuleDefinition) -> RuleOutput {
        let mut output = RuleOutput::default();

        if rule.rule_type.is_bundle_level() {
            output.errors = match RequiredResources::from_rule(rule) {
                Ok(check) => check.check(rule, self.bundle),
                Err(failure) => vec![failure.into_error(rule, None)],
            };
            return output;
        }

        // Path and parameters are checked even when no record is in scope.
        let path = match self.field_path(rule) {
            Ok(path) => path,
            Err(failure) => {
                output.errors.push(failure.into_error(rule, None));
                return output;
            }
        };

        let services = Services {
            expressions: &self.engine.expressions,
            patterns: &self.engine.patterns,
            concepts: &self.concepts,
        };
        let check = match Check::prepare(rule, &services).await {
            Ok(check) => check,
            Err(failure) => {
                output.errors.push(failure.into_error(rule, None));
                return output;
            }
        };

        let records = self.engine.records_in_scope(self.bundle, rule);
        if records.is_empty() {
            tracing::trace!(rule = %rule.id, "no records in scope");
            return output;
        }

        for record in records {
            let plan = planner::plan(rule, record.tree(), record.typed_parse_succeeded());
            tracing::debug!(
                rule = %rule.id,
                entry = record.entry_index(),
                lane = %plan.lane(),
                reason = ?plan.deciding_reason().map(ToString::to_string),
                "evaluating rule"
            );
            let target = Target {
                rule,
                record,
                path: &path,
            };
            let result = match (plan.lane(), record.typed()) {
                (Lane::Strict, Some(typed)) => {
                    check.run(typed.root(), &target, &self.engine.expressions, &mut output.errors)
                }
                _ => check.run(record.tree(), &target, &self.engine.expressions, &mut output.errors),
            };
            if let Err(failure) = result {
                output.errors.push(failure.into_error(rule, Some(record)));
            }
            output.lanes.push(LaneDecision::new(rule, record, plan));
        }
        output
    }

    /// The path record-level checks navigate. Custom expressions do not use
    /// one, so they get the record root.
    fn field_path(&self, rule: &RuleDefinition) -> Result<FieldPath, RuleFailure> {
        if !Check::uses_field_path(rule.rule_type) {
            return Ok(FieldPath::root());
        }
        FieldPath::parse_relative(&rule.field_path, &rule.resource_type)
            .map_err(|e| RuleFailure::definition(DefinitionCategory::Syntax, e.to_string(), FIELD_PATH_HINT))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "validator panicked".to_string()
    }
}
