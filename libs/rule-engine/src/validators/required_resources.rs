//! RequiredResources validator
//!
//! Bundle-level: counts records per type (optionally filtered), compares the
//! counts with the declared requirements and reports every deviation in one
//! consolidated error.

use crate::error::RuleFailure;
use crate::navigator::{navigate_all, FieldPath, NavNode};
use bundlecheck_model::{codes, ParamValue, ParsedBundle, Record, RuleDefinition, ValidationError};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equals,
    NotEquals,
    Contains,
    In,
}

impl FilterOp {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "=" | "==" | "equals" => Some(FilterOp::Equals),
            "!=" | "notEquals" => Some(FilterOp::NotEquals),
            "contains" => Some(FilterOp::Contains),
            "in" => Some(FilterOp::In),
            _ => None,
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FilterOp::Equals => "=",
            FilterOp::NotEquals => "!=",
            FilterOp::Contains => "contains",
            FilterOp::In => "in",
        })
    }
}

#[derive(Debug, Clone)]
pub struct Filter {
    path: FieldPath,
    op: FilterOp,
    values: Vec<String>,
}

impl Filter {
    fn matches(&self, record: &Record) -> bool {
        let texts: Vec<String> = navigate_all(record.tree(), &self.path, "")
            .into_iter()
            .filter_map(|m| m.node.scalar_text().map(|t| t.into_owned()))
            .collect();
        let expected = self.values.first().map(String::as_str).unwrap_or_default();
        match self.op {
            FilterOp::Equals => texts.iter().any(|t| t == expected),
            FilterOp::NotEquals => texts.iter().all(|t| t != expected),
            FilterOp::Contains => texts.iter().any(|t| t.contains(expected)),
            FilterOp::In => texts.iter().any(|t| self.values.contains(t)),
        }
    }

    fn to_json(&self) -> JsonValue {
        let value = match self.op {
            FilterOp::In => json!(self.values),
            _ => json!(self.values.first()),
        };
        json!({"path": self.path.to_string(), "op": self.op.to_string(), "value": value})
    }
}

#[derive(Debug, Clone)]
pub struct Requirement {
    pub resource_type: String,
    pub min: u64,
    pub max: Option<u64>,
    pub filters: Vec<Filter>,
}

impl Requirement {
    fn exact(&self) -> bool {
        self.max == Some(self.min)
    }

    fn to_json(&self) -> JsonValue {
        let mut out = Map::new();
        out.insert("resourceType".into(), json!(self.resource_type));
        out.insert("min".into(), json!(self.min));
        if let Some(max) = self.max {
            out.insert("max".into(), json!(max));
        }
        if !self.filters.is_empty() {
            out.insert(
                "where".into(),
                JsonValue::Array(self.filters.iter().map(Filter::to_json).collect()),
            );
        }
        JsonValue::Object(out)
    }
}

#[derive(Debug, Clone)]
pub struct RequiredResources {
    requirements: Vec<Requirement>,
    reject_undeclared: bool,
}

impl RequiredResources {
    pub fn from_rule(rule: &RuleDefinition) -> Result<Self, RuleFailure> {
        let items = rule
            .params
            .array("requirements")?
            .ok_or_else(|| RuleFailure::configuration("parameter 'requirements' is required"))?;
        let requirements = items
            .iter()
            .enumerate()
            .map(|(i, item)| parse_requirement(i, item))
            .collect::<Result<Vec<_>, _>>()?;
        let reject_undeclared = rule.params.bool("rejectUndeclaredResources")?.unwrap_or(true);
        Ok(Self {
            requirements,
            reject_undeclared,
        })
    }

    pub fn check(&self, rule: &RuleDefinition, bundle: &ParsedBundle) -> Vec<ValidationError> {
        let mut actual: BTreeMap<&str, u64> = BTreeMap::new();
        for record in bundle.records() {
            *actual.entry(record.resource_type()).or_default() += 1;
        }

        let mut missing = Vec::new();
        let mut count_mismatch = Vec::new();
        for requirement in &self.requirements {
            let count = bundle
                .records_of_type(&requirement.resource_type)
                .filter(|record| requirement.filters.iter().all(|f| f.matches(record)))
                .count() as u64;

            let below = count < requirement.min;
            let off_exact = requirement.exact() && count != requirement.min;
            let above = requirement.max.is_some_and(|max| count > max);
            if !(below || off_exact || above) {
                continue;
            }
            let entry = json!({
                "resourceType": requirement.resource_type,
                "min": requirement.min,
                "max": requirement.max,
                "actual": count,
            });
            if count == 0 {
                missing.push(entry);
            } else {
                count_mismatch.push(entry);
            }
        }

        let unexpected: Vec<&str> = if self.reject_undeclared {
            let declared: BTreeSet<&str> = self
                .requirements
                .iter()
                .map(|r| r.resource_type.as_str())
                .collect();
            actual
                .keys()
                .copied()
                .filter(|t| !declared.contains(t))
                .collect()
        } else {
            Vec::new()
        };

        if missing.is_empty() && count_mismatch.is_empty() && unexpected.is_empty() {
            return Vec::new();
        }

        let summary = summarize(&missing, &count_mismatch, &unexpected);
        let error = ValidationError::for_rule(
            rule,
            codes::RESOURCE_REQUIREMENT_VIOLATION,
            format!("bundle does not meet resource requirements: {}", summary),
        )
        .with_detail(
            "expected",
            JsonValue::Array(self.requirements.iter().map(Requirement::to_json).collect()),
        )
        .with_detail("actual", json!(actual))
        .with_detail(
            "diff",
            json!({
                "missing": missing,
                "countMismatch": count_mismatch,
                "unexpected": unexpected,
            }),
        );
        vec![error]
    }
}

fn summarize(missing: &[JsonValue], count_mismatch: &[JsonValue], unexpected: &[&str]) -> String {
    let names = |items: &[JsonValue]| {
        items
            .iter()
            .filter_map(|i| i["resourceType"].as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing {}", names(missing)));
    }
    if !count_mismatch.is_empty() {
        parts.push(format!("wrong count of {}", names(count_mismatch)));
    }
    if !unexpected.is_empty() {
        parts.push(format!("undeclared {}", unexpected.join(", ")));
    }
    parts.join("; ")
}

fn parse_requirement(index: usize, item: &ParamValue) -> Result<Requirement, RuleFailure> {
    let invalid = |what: &str| {
        RuleFailure::configuration(format!("requirements[{}]: {}", index, what))
    };
    let object = item.as_object().ok_or_else(|| invalid("expected an object"))?;

    let resource_type = object
        .get("resourceType")
        .and_then(ParamValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| invalid("'resourceType' is required"))?
        .to_string();
    let count = |key: &str| -> Result<Option<u64>, RuleFailure> {
        match object.get(key) {
            None | Some(ParamValue::Null) => Ok(None),
            Some(value) => value
                .as_count()
                .map(Some)
                .ok_or_else(|| invalid(&format!("'{}' must be a non-negative integer", key))),
        }
    };
    let min = count("min")?.unwrap_or(1);
    let max = count("max")?;
    if max.is_some_and(|max| max < min) {
        return Err(invalid("'max' is less than 'min'"));
    }

    let filters = match object.get("where") {
        None | Some(ParamValue::Null) => Vec::new(),
        Some(value) => value
            .as_array()
            .ok_or_else(|| invalid("'where' must be an array"))?
            .iter()
            .map(|f| parse_filter(f, &resource_type).map_err(|e| invalid(&e)))
            .collect::<Result<Vec<_>, _>>()?,
    };

    Ok(Requirement {
        resource_type,
        min,
        max,
        filters,
    })
}

fn parse_filter(item: &ParamValue, resource_type: &str) -> Result<Filter, String> {
    let object = item.as_object().ok_or("filter must be an object")?;
    let path = object
        .get("path")
        .and_then(ParamValue::as_str)
        .ok_or("filter 'path' is required")?;
    let path = FieldPath::parse_relative(path, resource_type).map_err(|e| e.to_string())?;
    let op_text = object
        .get("op")
        .or_else(|| object.get("operator"))
        .and_then(ParamValue::as_str)
        .unwrap_or("=");
    let op = FilterOp::parse(op_text).ok_or_else(|| format!("unsupported filter operator '{}'", op_text))?;
    let value = object.get("value").ok_or("filter 'value' is required")?;
    let values = match (op, value.as_array()) {
        (FilterOp::In, Some(items)) => items.iter().filter_map(ParamValue::scalar_text).collect(),
        (FilterOp::In, None) => return Err("'in' filter needs an array value".into()),
        (_, _) => vec![value
            .scalar_text()
            .ok_or("filter 'value' must be a scalar")?],
    };
    Ok(Filter { path, op, values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bundlecheck_model::{Params, RuleType};

    fn bundle(types: &[&str]) -> ParsedBundle {
        let entries: Vec<JsonValue> = types
            .iter()
            .enumerate()
            .map(|(i, t)| json!({"resource": {"resourceType": t, "id": format!("r{}", i)}}))
            .collect();
        ParsedBundle::from_value(&json!({"resourceType": "Bundle", "type": "collection", "entry": entries}))
            .unwrap()
    }

    fn rule(requirements: JsonValue, reject: bool) -> RuleDefinition {
        RuleDefinition::new("bundle-shape", RuleType::RequiredResources, "Bundle", "").with_params(
            Params::new()
                .with("requirements", requirements)
                .with("rejectUndeclaredResources", reject),
        )
    }

    fn run(rule: &RuleDefinition, bundle: &ParsedBundle) -> Vec<ValidationError> {
        RequiredResources::from_rule(rule).unwrap().check(rule, bundle)
    }

    #[test]
    fn test_exact_mode_count_mismatch() {
        let r = rule(json!([{"resourceType": "Patient", "min": 1, "max": 1}]), true);
        let errors = run(&r, &bundle(&["Patient", "Patient"]));
        assert_eq!(errors.len(), 1);
        let diff = errors[0].detail("diff").unwrap();
        assert_eq!(diff["missing"], json!([]));
        assert_eq!(diff["countMismatch"][0]["resourceType"], "Patient");
        assert_eq!(diff["countMismatch"][0]["actual"], 2);
        assert_eq!(errors[0].detail("actual").unwrap()["Patient"], 2);
        assert!(errors[0].is_bundle_level());
    }

    #[test]
    fn test_satisfied() {
        let r = rule(
            json!([{"resourceType": "Patient", "min": 1, "max": 1}, {"resourceType": "Observation", "min": 0}]),
            true,
        );
        assert!(run(&r, &bundle(&["Patient", "Observation", "Observation"])).is_empty());
    }

    #[test]
    fn test_missing_and_unexpected_merge_into_one_error() {
        let r = rule(json!([{"resourceType": "Patient", "min": 1}]), true);
        let errors = run(&r, &bundle(&["Observation", "Encounter"]));
        assert_eq!(errors.len(), 1);
        let diff = errors[0].detail("diff").unwrap();
        assert_eq!(diff["missing"][0]["resourceType"], "Patient");
        assert_eq!(diff["unexpected"], json!(["Encounter", "Observation"]));
    }

    #[test]
    fn test_undeclared_allowed_when_disabled() {
        let r = rule(json!([{"resourceType": "Patient", "min": 1}]), false);
        assert!(run(&r, &bundle(&["Patient", "Observation"])).is_empty());
    }

    #[test]
    fn test_max_bound() {
        let r = rule(json!([{"resourceType": "Observation", "min": 0, "max": 1}]), false);
        let errors = run(&r, &bundle(&["Observation", "Observation"]));
        assert_eq!(errors[0].detail("diff").unwrap()["countMismatch"][0]["actual"], 2);
    }

    #[test]
    fn test_filters() {
        let parsed = ParsedBundle::from_value(&json!({
            "resourceType": "Bundle",
            "entry": [
                {"resource": {"resourceType": "Observation", "status": "final", "code": {"text": "blood pressure"}}},
                {"resource": {"resourceType": "Observation", "status": "preliminary"}}
            ]
        }))
        .unwrap();
        let cases = [
            (json!({"path": "status", "op": "=", "value": "final"}), 1),
            (json!({"path": "status", "op": "!=", "value": "final"}), 1),
            (json!({"path": "code.text", "op": "contains", "value": "pressure"}), 1),
            (json!({"path": "Observation.status", "op": "in", "value": ["final", "preliminary"]}), 2),
        ];
        for (filter, expected) in cases {
            let r = rule(
                json!([{"resourceType": "Observation", "min": expected, "max": expected, "where": [filter.clone()]}]),
                true,
            );
            assert!(run(&r, &parsed).is_empty(), "filter {} should count {}", filter, expected);
        }
    }

    #[test]
    fn test_configuration_errors() {
        let missing = RuleDefinition::new("x", RuleType::RequiredResources, "Bundle", "");
        assert!(RequiredResources::from_rule(&missing).is_err());

        let bad_op = rule(
            json!([{"resourceType": "Patient", "where": [{"path": "gender", "op": "~", "value": "x"}]}]),
            true,
        );
        let err = RequiredResources::from_rule(&bad_op).unwrap_err();
        assert_eq!(err.error_code(), codes::RULE_CONFIGURATION_ERROR);

        let inverted = rule(json!([{"resourceType": "Patient", "min": 2, "max": 1}]), true);
        assert!(RequiredResources::from_rule(&inverted).is_err());
    }
}
