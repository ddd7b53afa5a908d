//! Tree-walking evaluator over JSON documents

use crate::ast::{AstNode, BinaryOperator, Literal};
use crate::error::{Error, Result};
use crate::functions;
use crate::value::{Collection, Value};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use smallvec::smallvec;
use std::borrow::Cow;
use std::cmp::Ordering;

/// Datatype suffixes of polymorphic elements (`value` matches `valueQuantity`).
static CHOICE_SUFFIXES: phf::Set<&'static str> = phf::phf_set! {
    "Address", "Age", "Annotation", "Attachment", "Base64Binary", "Boolean",
    "Canonical", "Code", "CodeableConcept", "Coding", "ContactPoint", "Count",
    "Date", "DateTime", "Decimal", "Distance", "Duration", "HumanName", "Id",
    "Identifier", "Instant", "Integer", "Integer64", "Markdown", "Money", "Oid",
    "Period", "PositiveInt", "Quantity", "Range", "Ratio", "Reference",
    "SampledData", "Signature", "String", "Time", "Timing", "UnsignedInt", "Uri",
    "Url", "Uuid",
};

pub(crate) struct Evaluator<'a> {
    root: &'a JsonValue,
}

fn push_json<'a>(node: &'a JsonValue, out: &mut Collection<'a>) {
    match node {
        JsonValue::Array(items) => out.extend(items.iter().filter_map(Value::from_json)),
        other => out.extend(Value::from_json(other)),
    }
}

/// Children of `node` reached through `name`, including choice elements and
/// the type-name root step (`Patient.name` evaluated on a Patient).
fn member_values<'a>(node: &'a JsonValue, name: &str, out: &mut Collection<'a>) {
    let Some(object) = node.as_object() else {
        return;
    };
    if let Some(child) = object.get(name) {
        push_json(child, out);
        return;
    }
    for (key, child) in object {
        if let Some(suffix) = key.strip_prefix(name) {
            if CHOICE_SUFFIXES.contains(suffix) {
                push_json(child, out);
            }
        }
    }
    if object.get("resourceType").and_then(JsonValue::as_str) == Some(name) {
        out.push(Value::Node(node));
    }
}

fn boolean<'a>(b: bool) -> Collection<'a> {
    smallvec![Value::Boolean(b)]
}

fn optional_boolean<'a>(b: Option<bool>) -> Collection<'a> {
    b.map(boolean).unwrap_or_default()
}

/// Singleton evaluation of a collection as a boolean.
pub(crate) fn to_boolean(collection: &Collection<'_>) -> Result<Option<bool>> {
    match collection.len() {
        0 => Ok(None),
        1 => Ok(Some(collection[0].as_bool().unwrap_or(true))),
        n => Err(Error::TypeError(format!(
            "Expected a single boolean, got a collection of {} items",
            n
        ))),
    }
}

fn singleton<'c, 'a>(collection: &'c Collection<'a>, what: &str) -> Result<Option<&'c Value<'a>>> {
    match collection.len() {
        0 => Ok(None),
        1 => Ok(Some(&collection[0])),
        n => Err(Error::TypeError(format!(
            "{} expects a single item, got {}",
            what, n
        ))),
    }
}

fn singleton_string<'c, 'a>(collection: &'c Collection<'a>, what: &str) -> Result<Option<&'c str>> {
    match singleton(collection, what)? {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_ref())),
        Some(other) => Err(Error::TypeError(format!(
            "{} expects a string, got {}",
            what,
            other.type_name()
        ))),
    }
}

fn distinct_into<'a>(items: impl IntoIterator<Item = Value<'a>>, out: &mut Collection<'a>) {
    for item in items {
        if !out.iter().any(|existing| existing.equals(&item)) {
            out.push(item);
        }
    }
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(root: &'a JsonValue) -> Self {
        Self { root }
    }

    pub(crate) fn root_collection(&self) -> Collection<'a> {
        Value::from_json(self.root).into_iter().collect()
    }

    pub(crate) fn evaluate(
        &self,
        node: &AstNode,
        focus: &Collection<'a>,
        this: Option<&Value<'a>>,
    ) -> Result<Collection<'a>> {
        match node {
            AstNode::Literal(literal) => Ok(smallvec![match literal {
                Literal::Boolean(b) => Value::Boolean(*b),
                Literal::String(s) => Value::String(Cow::Owned(s.clone())),
                Literal::Number(n) => Value::Number(*n),
            }]),
            AstNode::EmptyCollection => Ok(Collection::new()),
            AstNode::This => Ok(match this {
                Some(item) => smallvec![item.clone()],
                None => self.root_collection(),
            }),
            AstNode::ExternalConstant { name } => match name.as_str() {
                "resource" | "context" | "rootResource" => Ok(self.root_collection()),
                other => Err(Error::VariableNotFound(format!("%{}", other))),
            },
            AstNode::Member { name } => Ok(self.navigate(focus, name)),
            AstNode::Function { name, arguments } => {
                self.call_function(name, arguments, focus, this)
            }
            AstNode::Invocation {
                expression,
                invocation,
            } => {
                let input = self.evaluate(expression, focus, this)?;
                match invocation.as_ref() {
                    AstNode::Member { name } => Ok(self.navigate(&input, name)),
                    AstNode::Function { name, arguments } => {
                        self.call_function(name, arguments, &input, this)
                    }
                    other => Err(Error::EvaluationError(format!(
                        "Invalid invocation target: {:?}",
                        other
                    ))),
                }
            }
            AstNode::Indexer { collection, index } => {
                let items = self.evaluate(collection, focus, this)?;
                let index = self.evaluate(index, focus, this)?;
                match singleton(&index, "indexer")? {
                    None => Ok(Collection::new()),
                    Some(Value::Number(n)) if n.fract().is_zero() && !n.is_sign_negative() => {
                        let position = n.to_usize().unwrap_or(usize::MAX);
                        Ok(items.get(position).cloned().into_iter().collect())
                    }
                    Some(other) => Err(Error::TypeError(format!(
                        "Index must be a non-negative integer, got {}",
                        other.type_name()
                    ))),
                }
            }
            AstNode::Negate { expression } => {
                let operand = self.evaluate(expression, focus, this)?;
                match singleton(&operand, "unary '-'")? {
                    None => Ok(Collection::new()),
                    Some(Value::Number(n)) => Ok(smallvec![Value::Number(-*n)]),
                    Some(other) => Err(Error::TypeError(format!(
                        "Cannot negate a {}",
                        other.type_name()
                    ))),
                }
            }
            AstNode::Binary {
                left,
                operator,
                right,
            } => self.evaluate_binary(left, *operator, right, focus, this),
        }
    }

    fn navigate(&self, input: &Collection<'a>, name: &str) -> Collection<'a> {
        let mut out = Collection::new();
        for item in input {
            if let Value::Node(node) = item {
                member_values(node, name, &mut out);
            }
        }
        out
    }

    /// Evaluate `criteria` once per item with that item as focus and `$this`.
    fn per_item(&self, item: &Value<'a>, criteria: &AstNode) -> Result<Collection<'a>> {
        let focus: Collection<'a> = smallvec![item.clone()];
        self.evaluate(criteria, &focus, Some(item))
    }

    fn call_function(
        &self,
        name: &str,
        arguments: &[AstNode],
        input: &Collection<'a>,
        this: Option<&Value<'a>>,
    ) -> Result<Collection<'a>> {
        let spec = functions::resolve(name, arguments.len())?;
        let argument = |i: usize| -> Result<Collection<'a>> { self.evaluate(&arguments[i], input, this) };

        match spec.name {
            "where" => {
                let mut out = Collection::new();
                for item in input {
                    if to_boolean(&self.per_item(item, &arguments[0])?)? == Some(true) {
                        out.push(item.clone());
                    }
                }
                Ok(out)
            }
            "select" => {
                let mut out = Collection::new();
                for item in input {
                    out.extend(self.per_item(item, &arguments[0])?);
                }
                Ok(out)
            }
            "ofType" => {
                let AstNode::Member { name: type_name } = &arguments[0] else {
                    return Err(Error::TypeError("ofType() expects a type name".into()));
                };
                Ok(input
                    .iter()
                    .filter(|item| match item {
                        Value::Node(node) => {
                            node.get("resourceType").and_then(JsonValue::as_str)
                                == Some(type_name.as_str())
                        }
                        primitive => primitive.type_name().eq_ignore_ascii_case(type_name),
                    })
                    .cloned()
                    .collect())
            }
            "exists" => {
                if arguments.is_empty() {
                    return Ok(boolean(!input.is_empty()));
                }
                for item in input {
                    if to_boolean(&self.per_item(item, &arguments[0])?)? == Some(true) {
                        return Ok(boolean(true));
                    }
                }
                Ok(boolean(false))
            }
            "empty" => Ok(boolean(input.is_empty())),
            "all" => {
                for item in input {
                    if to_boolean(&self.per_item(item, &arguments[0])?)? != Some(true) {
                        return Ok(boolean(false));
                    }
                }
                Ok(boolean(true))
            }
            "count" => Ok(smallvec![Value::Number(Decimal::from(input.len()))]),
            "distinct" => {
                let mut out = Collection::new();
                distinct_into(input.iter().cloned(), &mut out);
                Ok(out)
            }
            "first" => Ok(input.first().cloned().into_iter().collect()),
            "last" => Ok(input.last().cloned().into_iter().collect()),
            "not" => Ok(optional_boolean(to_boolean(input)?.map(|b| !b))),
            "hasValue" => Ok(boolean(
                input.len() == 1 && input[0].is_primitive(),
            )),
            "iif" => {
                let condition = self.evaluate(&arguments[0], input, this)?;
                if to_boolean(&condition)? == Some(true) {
                    argument(1)
                } else if arguments.len() == 3 {
                    argument(2)
                } else {
                    Ok(Collection::new())
                }
            }
            "length" => Ok(match singleton_string(input, "length()")? {
                Some(s) => smallvec![Value::Number(Decimal::from(s.chars().count()))],
                None => Collection::new(),
            }),
            "matches" | "startsWith" | "endsWith" | "contains" => {
                let subject = singleton_string(input, name)?;
                let argument_value = argument(0)?;
                let needle = singleton_string(&argument_value, name)?;
                let (Some(subject), Some(needle)) = (subject, needle) else {
                    return Ok(Collection::new());
                };
                let result = match spec.name {
                    "matches" => regex::Regex::new(needle)
                        .map_err(|e| {
                            Error::EvaluationError(format!("Invalid regex '{}': {}", needle, e))
                        })?
                        .is_match(subject),
                    "startsWith" => subject.starts_with(needle),
                    "endsWith" => subject.ends_with(needle),
                    _ => subject.contains(needle),
                };
                Ok(boolean(result))
            }
            other => Err(Error::FunctionNotFound(other.to_string())),
        }
    }

    fn evaluate_binary(
        &self,
        left: &AstNode,
        operator: BinaryOperator,
        right: &AstNode,
        focus: &Collection<'a>,
        this: Option<&Value<'a>>,
    ) -> Result<Collection<'a>> {
        let lhs = self.evaluate(left, focus, this)?;

        // Short-circuit the boolean operators where the left side decides.
        match (operator, to_boolean_lenient(&lhs)) {
            (BinaryOperator::And, Some(false)) => return Ok(boolean(false)),
            (BinaryOperator::Or, Some(true)) => return Ok(boolean(true)),
            (BinaryOperator::Implies, Some(false)) => return Ok(boolean(true)),
            _ => {}
        }

        let rhs = self.evaluate(right, focus, this)?;

        match operator {
            BinaryOperator::And => {
                let (l, r) = (to_boolean(&lhs)?, to_boolean(&rhs)?);
                Ok(optional_boolean(match (l, r) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                }))
            }
            BinaryOperator::Or => {
                let (l, r) = (to_boolean(&lhs)?, to_boolean(&rhs)?);
                Ok(optional_boolean(match (l, r) {
                    (Some(true), _) | (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                }))
            }
            BinaryOperator::Xor => {
                let (l, r) = (to_boolean(&lhs)?, to_boolean(&rhs)?);
                Ok(optional_boolean(l.zip(r).map(|(a, b)| a != b)))
            }
            BinaryOperator::Implies => {
                let (l, r) = (to_boolean(&lhs)?, to_boolean(&rhs)?);
                Ok(optional_boolean(match (l, r) {
                    (Some(false), _) => Some(true),
                    (Some(true), r) => r,
                    (None, Some(true)) => Some(true),
                    (None, _) => None,
                }))
            }
            BinaryOperator::Equal | BinaryOperator::NotEqual => {
                if lhs.is_empty() || rhs.is_empty() {
                    return Ok(Collection::new());
                }
                let equal = lhs.len() == rhs.len()
                    && lhs.iter().zip(rhs.iter()).all(|(a, b)| a.equals(b));
                Ok(boolean(if operator == BinaryOperator::Equal {
                    equal
                } else {
                    !equal
                }))
            }
            BinaryOperator::LessThan
            | BinaryOperator::LessThanOrEqual
            | BinaryOperator::GreaterThan
            | BinaryOperator::GreaterThanOrEqual => {
                let (Some(l), Some(r)) = (singleton(&lhs, "comparison")?, singleton(&rhs, "comparison")?)
                else {
                    return Ok(Collection::new());
                };
                let ordering = compare(l, r)?;
                Ok(boolean(match operator {
                    BinaryOperator::LessThan => ordering == Ordering::Less,
                    BinaryOperator::LessThanOrEqual => ordering != Ordering::Greater,
                    BinaryOperator::GreaterThan => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }))
            }
            BinaryOperator::In | BinaryOperator::Contains => {
                let (element, container) = if operator == BinaryOperator::In {
                    (&lhs, &rhs)
                } else {
                    (&rhs, &lhs)
                };
                match singleton(element, "membership")? {
                    None => Ok(Collection::new()),
                    Some(item) => Ok(boolean(container.iter().any(|c| c.equals(item)))),
                }
            }
            BinaryOperator::Union => {
                let mut out = Collection::new();
                distinct_into(lhs.into_iter().chain(rhs), &mut out);
                Ok(out)
            }
            BinaryOperator::Concatenate => {
                let text = |c: &Collection<'a>| -> Result<String> {
                    Ok(singleton(c, "'&'")?
                        .and_then(Value::to_text)
                        .unwrap_or_default())
                };
                Ok(smallvec![Value::string(text(&lhs)? + &text(&rhs)?)])
            }
            BinaryOperator::Add
            | BinaryOperator::Subtract
            | BinaryOperator::Multiply
            | BinaryOperator::Divide => {
                let (Some(l), Some(r)) = (singleton(&lhs, "arithmetic")?, singleton(&rhs, "arithmetic")?)
                else {
                    return Ok(Collection::new());
                };
                arithmetic(l, operator, r)
            }
        }
    }
}

/// Boolean view used only for short-circuiting; errors defer to the full path.
fn to_boolean_lenient(collection: &Collection<'_>) -> Option<bool> {
    to_boolean(collection).ok().flatten()
}

fn compare(left: &Value<'_>, right: &Value<'_>) -> Result<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (a, b) => Err(Error::TypeError(format!(
            "Cannot compare {} with {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn arithmetic<'a>(left: &Value<'a>, operator: BinaryOperator, right: &Value<'a>) -> Result<Collection<'a>> {
    let overflow = || Error::EvaluationError("Arithmetic overflow".into());
    match (left, operator, right) {
        (Value::String(a), BinaryOperator::Add, Value::String(b)) => {
            Ok(smallvec![Value::string(format!("{}{}", a, b))])
        }
        (Value::Number(a), op, Value::Number(b)) => {
            let result = match op {
                BinaryOperator::Add => a.checked_add(*b).ok_or_else(overflow)?,
                BinaryOperator::Subtract => a.checked_sub(*b).ok_or_else(overflow)?,
                BinaryOperator::Multiply => a.checked_mul(*b).ok_or_else(overflow)?,
                _ => match a.checked_div(*b) {
                    Some(quotient) => quotient,
                    None if b.is_zero() => return Ok(Collection::new()),
                    None => return Err(overflow()),
                },
            };
            Ok(smallvec![Value::Number(result)])
        }
        (a, op, b) => Err(Error::TypeError(format!(
            "Operator {:?} is not defined for {} and {}",
            op,
            a.type_name(),
            b.type_name()
        ))),
    }
}
