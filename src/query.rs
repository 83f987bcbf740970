//! Translation of conditions into a declarative filter tree, the inverse of
//! [`Condition::eval`]: instead of testing one record it describes every
//! record a rule would match, for an external query engine to execute.
//!
//! The tree renders to the AQL-style JSON the storage layer understands:
//! `{"field": {"$op": value}}` leaves combined with `$and`/`$or`.
use std::cmp::Ordering;
use std::fmt;

use chrono::Days;
use regex::RegexBuilder;
use serde_json::{Map, Number, Value, json};
use tracing::debug;

use crate::condition::{APPROX_DAYS, Condition, ConditionDescriptor, ConditionValue};
use crate::datatype::{DateValue, NumberValue, approx_threshold, format_date};
use crate::error::TranslationError;
use crate::record::Record;
use crate::schema::{FieldType, Operator};

pub const DEFAULT_RECUR_DATE_BOUNDS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    Regexp,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "$eq",
            FilterOp::Ne => "$ne",
            FilterOp::Gt => "$gt",
            FilterOp::Gte => "$gte",
            FilterOp::Lt => "$lt",
            FilterOp::Lte => "$lte",
            FilterOp::Like => "$like",
            FilterOp::NotLike => "$notlike",
            FilterOp::Regexp => "$regexp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Lower,
    Neg,
}

impl Transform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transform::Lower => "$lower",
            Transform::Neg => "$neg",
        }
    }
}

// ------------- Filter -------------
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare {
        field: String,
        op: FilterOp,
        value: Value,
        transform: Option<Transform>,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    /// Matches no rows at all.
    Nothing,
}

impl Filter {
    pub fn compare(field: &str, op: FilterOp, value: Value) -> Self {
        Filter::Compare {
            field: field.to_string(),
            op,
            value,
            transform: None,
        }
    }
    pub fn transformed(field: &str, op: FilterOp, value: Value, transform: Transform) -> Self {
        Filter::Compare {
            field: field.to_string(),
            op,
            value,
            transform: Some(transform),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Filter::Compare {
                field,
                op,
                value,
                transform,
            } => {
                let mut inner = Map::new();
                if let Some(t) = transform {
                    inner.insert("$transform".to_string(), Value::from(t.as_str()));
                }
                inner.insert(op.as_str().to_string(), value.clone());
                let mut outer = Map::new();
                outer.insert(field.clone(), Value::Object(inner));
                Value::Object(outer)
            }
            Filter::And(filters) => {
                json!({ "$and": filters.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
            Filter::Or(filters) => {
                json!({ "$or": filters.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
            Filter::Nothing => json!({ "id": null }),
        }
    }

    /// Reference evaluation of the tree against one record, with SQL-like
    /// null handling: comparisons against a null or missing value fail
    /// unless they test for null.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.matches(record)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(record)),
            Filter::Nothing => false,
            Filter::Compare {
                field,
                op,
                value,
                transform,
            } => {
                let actual = record.get(field).cloned().unwrap_or(Value::Null);
                let actual = match (transform, actual) {
                    (Some(Transform::Lower), Value::String(s)) => Value::String(s.to_lowercase()),
                    (Some(Transform::Neg), Value::Number(n)) => {
                        n.as_f64().map(|f| number(-f)).unwrap_or(Value::Null)
                    }
                    (_, other) => other,
                };
                compare_values(&actual, *op, value)
            }
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

fn compare_values(actual: &Value, op: FilterOp, expected: &Value) -> bool {
    let order = match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    };
    match op {
        FilterOp::Eq => order == Some(Ordering::Equal),
        FilterOp::Ne => !actual.is_null() && order != Some(Ordering::Equal),
        FilterOp::Gt => !actual.is_null() && order == Some(Ordering::Greater),
        FilterOp::Gte => {
            !actual.is_null() && matches!(order, Some(Ordering::Greater | Ordering::Equal))
        }
        FilterOp::Lt => !actual.is_null() && order == Some(Ordering::Less),
        FilterOp::Lte => {
            !actual.is_null() && matches!(order, Some(Ordering::Less | Ordering::Equal))
        }
        FilterOp::Like | FilterOp::NotLike => {
            let (Some(text), Some(pattern)) = (actual.as_str(), expected.as_str()) else {
                return false;
            };
            like(text, pattern) == (op == FilterOp::Like)
        }
        FilterOp::Regexp => {
            let (Some(text), Some(pattern)) = (actual.as_str(), expected.as_str()) else {
                return false;
            };
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .is_ok_and(|re| re.is_match(text))
        }
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// SQL LIKE: `%` any run, `_` any one character, `\` escapes the next
// character, case-insensitive.
fn like(text: &str, pattern: &str) -> bool {
    let mut expr = String::from("^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => expr.push_str(".*"),
            '_' => expr.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    expr.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    RegexBuilder::new(&expr)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .is_ok_and(|re| re.is_match(text))
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

// ------------- Translation -------------
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Translation {
    pub filters: Vec<Filter>,
    pub errors: Vec<TranslationError>,
}

impl Translation {
    /// All filters as one conjunction.
    pub fn filter(&self) -> Filter {
        Filter::And(self.filters.clone())
    }
    pub fn to_json(&self) -> Value {
        self.filter().to_json()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTranslator {
    recur_date_bounds: usize,
    special_cases: bool,
}

impl Default for QueryTranslator {
    fn default() -> Self {
        Self::new(DEFAULT_RECUR_DATE_BOUNDS)
    }
}

impl QueryTranslator {
    pub fn new(recur_date_bounds: usize) -> Self {
        Self {
            recur_date_bounds,
            special_cases: true,
        }
    }
    /// Translate `transfer`, `parent` and `category is null` literally
    /// instead of through their storage-level meaning.
    pub fn without_special_cases(mut self) -> Self {
        self.special_cases = false;
        self
    }
    pub fn recur_date_bounds(&self) -> usize {
        self.recur_date_bounds
    }

    pub fn translate(&self, conditions: &[Condition]) -> Translation {
        let mut translation = Translation::default();
        for condition in conditions {
            match self.translate_condition(condition) {
                Ok(filter) => translation.filters.push(filter),
                Err(e) => {
                    debug!(error = %e, "condition dropped from translation");
                    translation.errors.push(e);
                }
            }
        }
        translation
    }
    /// Like [`translate`](Self::translate), but conditions that fail to
    /// construct are also collected as errors.
    pub fn translate_descriptors(&self, descriptors: &[ConditionDescriptor]) -> Translation {
        let mut conditions = Vec::with_capacity(descriptors.len());
        let mut errors = Vec::new();
        for descriptor in descriptors {
            match Condition::from_descriptor(descriptor) {
                Ok(condition) => conditions.push(condition),
                Err(e) => errors.push(TranslationError {
                    field: descriptor.field.clone(),
                    op: descriptor.op.clone(),
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }),
            }
        }
        let mut translation = self.translate(&conditions);
        errors.append(&mut translation.errors);
        translation.errors = errors;
        translation
    }

    pub fn translate_condition(&self, condition: &Condition) -> Result<Filter, TranslationError> {
        if self.special_cases {
            if let Some(filter) = special_case(condition) {
                return Ok(filter);
            }
        }
        match condition.field_type() {
            FieldType::Number => self.number(condition),
            FieldType::Date => self.date(condition),
            FieldType::Id | FieldType::String => text(condition),
            FieldType::Boolean => boolean(condition),
        }
    }

    fn number(&self, c: &Condition) -> Result<Filter, TranslationError> {
        let ConditionValue::Number(value) = c.value() else {
            return Err(error(c, "internal", "number condition without a number"));
        };
        let apply = |op: FilterOp, n: f64| -> Result<Filter, TranslationError> {
            if !n.is_finite() {
                return Err(error(c, "not-number", "value is not a finite number"));
            }
            let field = c.field();
            Ok(if c.outflow() {
                Filter::And(vec![
                    Filter::compare(field, FilterOp::Lte, Value::from(0)),
                    Filter::transformed(field, op, number(n), Transform::Neg),
                ])
            } else if c.inflow() {
                Filter::And(vec![
                    Filter::compare(field, FilterOp::Gte, Value::from(0)),
                    Filter::compare(field, op, number(n)),
                ])
            } else {
                Filter::compare(field, op, number(n))
            })
        };
        match (c.op(), value) {
            (Operator::Is, NumberValue::Literal(n)) => apply(FilterOp::Eq, *n),
            (Operator::IsApprox, NumberValue::Literal(n)) => {
                let threshold = approx_threshold(*n);
                Ok(Filter::And(vec![
                    apply(FilterOp::Gte, n - threshold)?,
                    apply(FilterOp::Lte, n + threshold)?,
                ]))
            }
            (Operator::IsBetween, between @ NumberValue::Between(..)) => {
                let (low, high) = between.bounds();
                Ok(Filter::And(vec![
                    apply(FilterOp::Gte, low)?,
                    apply(FilterOp::Lte, high)?,
                ]))
            }
            (Operator::Gt, NumberValue::Literal(n)) => apply(FilterOp::Gt, *n),
            (Operator::Gte, NumberValue::Literal(n)) => apply(FilterOp::Gte, *n),
            (Operator::Lt, NumberValue::Literal(n)) => apply(FilterOp::Lt, *n),
            (Operator::Lte, NumberValue::Literal(n)) => apply(FilterOp::Lte, *n),
            _ => Err(error(c, "internal", "unsupported number operator")),
        }
    }

    fn date(&self, c: &Condition) -> Result<Filter, TranslationError> {
        let ConditionValue::Date(value) = c.value() else {
            return Err(error(c, "internal", "date condition without a date"));
        };
        let field = c.field();
        let range = |low: String, high: String| {
            Filter::And(vec![
                Filter::compare(field, FilterOp::Gte, Value::String(low)),
                Filter::compare(field, FilterOp::Lte, Value::String(high)),
            ])
        };
        match c.op() {
            Operator::Is | Operator::IsApprox => {
                let approx = c.op() == Operator::IsApprox;
                match value {
                    DateValue::Exact(d) if approx => {
                        let (low, high) = crate::condition::approx_bounds(d)
                            .ok_or_else(|| error(c, "date-format", "date out of range"))?;
                        Ok(range(low, high))
                    }
                    DateValue::Exact(d) => Ok(Filter::compare(
                        field,
                        FilterOp::Eq,
                        Value::String(format_date(d)),
                    )),
                    DateValue::Month { .. } => {
                        Ok(range(format!("{value}-00"), format!("{value}-99")))
                    }
                    DateValue::Year(_) => {
                        Ok(range(format!("{value}-00-00"), format!("{value}-99-99")))
                    }
                    DateValue::Recurring(schedule) => {
                        let filters: Vec<Filter> = schedule
                            .occurrences()
                            .take(self.recur_date_bounds)
                            .filter_map(|d| {
                                if !approx {
                                    return Some(Filter::compare(
                                        field,
                                        FilterOp::Eq,
                                        Value::String(format_date(&d)),
                                    ));
                                }
                                let low = d.checked_sub_days(Days::new(APPROX_DAYS))?;
                                let high = d.checked_add_days(Days::new(APPROX_DAYS))?;
                                Some(range(format_date(&low), format_date(&high)))
                            })
                            .collect();
                        if filters.is_empty() {
                            Ok(Filter::Nothing)
                        } else {
                            Ok(Filter::Or(filters))
                        }
                    }
                }
            }
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                let exact = value
                    .exact()
                    .ok_or_else(|| error(c, "date-format", "comparison needs an exact date"))?;
                let op = match c.op() {
                    Operator::Gt => FilterOp::Gt,
                    Operator::Gte => FilterOp::Gte,
                    Operator::Lt => FilterOp::Lt,
                    _ => FilterOp::Lte,
                };
                Ok(Filter::compare(field, op, Value::String(format_date(exact))))
            }
            _ => Err(error(c, "internal", "unsupported date operator")),
        }
    }
}

fn error(c: &Condition, kind: &str, message: &str) -> TranslationError {
    TranslationError {
        field: c.field().to_string(),
        op: c.op().as_str().to_string(),
        kind: kind.to_string(),
        message: message.to_string(),
    }
}

fn text(c: &Condition) -> Result<Filter, TranslationError> {
    let field = c.field();
    let is_string = c.field_type() == FieldType::String;
    // strings compare lower-cased, ids compare as stored
    let leaf = |field: &str, op: FilterOp, value: Value| {
        if is_string {
            let value = match value {
                Value::String(s) => Value::String(s.to_lowercase()),
                other => other,
            };
            Filter::transformed(field, op, value, Transform::Lower)
        } else {
            Filter::compare(field, op, value)
        }
    };
    let current = c.current_value();
    match (c.op(), c.value()) {
        (Operator::Is, ConditionValue::Text(v)) if is_string && v.as_deref() == Some("") => {
            Ok(Filter::Or(vec![
                Filter::compare(field, FilterOp::Eq, Value::Null),
                Filter::compare(field, FilterOp::Eq, Value::from("")),
            ]))
        }
        (Operator::Is, ConditionValue::Text(_)) => Ok(leaf(field, FilterOp::Eq, current.clone())),
        // a null field is "not" any concrete value
        (Operator::IsNot, ConditionValue::Text(v)) => Ok(match v.as_deref() {
            None => Filter::compare(field, FilterOp::Ne, Value::Null),
            Some("") if is_string => Filter::And(vec![
                Filter::compare(field, FilterOp::Ne, Value::Null),
                Filter::compare(field, FilterOp::Ne, Value::from("")),
            ]),
            Some(_) => Filter::Or(vec![
                Filter::compare(field, FilterOp::Eq, Value::Null),
                leaf(field, FilterOp::Ne, current.clone()),
            ]),
        }),
        (Operator::Contains | Operator::DoesNotContain, ConditionValue::Text(Some(v))) => {
            let op = if c.op() == Operator::Contains {
                FilterOp::Like
            } else {
                FilterOp::NotLike
            };
            let target = if is_string {
                field.to_string()
            } else {
                format!("{field}.name")
            };
            Ok(Filter::transformed(
                &target,
                op,
                Value::String(format!("%{}%", escape_like(v))),
                Transform::Lower,
            ))
        }
        (Operator::OneOf | Operator::NotOneOf, ConditionValue::Set(_)) => {
            let values: Vec<Value> = match current {
                Value::Array(items) => items
                    .iter()
                    .filter(|v| v.as_str().is_some_and(|s| !s.is_empty()))
                    .cloned()
                    .collect(),
                _ => Vec::new(),
            };
            if values.is_empty() {
                return Ok(Filter::Nothing);
            }
            if c.op() == Operator::OneOf {
                Ok(Filter::Or(
                    values.into_iter().map(|v| leaf(field, FilterOp::Eq, v)).collect(),
                ))
            } else {
                Ok(Filter::And(
                    values.into_iter().map(|v| leaf(field, FilterOp::Ne, v)).collect(),
                ))
            }
        }
        (Operator::Matches, ConditionValue::Pattern(_)) => Ok(Filter::transformed(
            field,
            FilterOp::Regexp,
            current.clone(),
            Transform::Lower,
        )),
        _ => Err(error(c, "internal", "unsupported text operator")),
    }
}

fn boolean(c: &Condition) -> Result<Filter, TranslationError> {
    let value = boolean_value(c)
        .ok_or_else(|| error(c, "internal", "unsupported boolean operator"))?;
    Ok(Filter::compare(c.field(), FilterOp::Eq, Value::Bool(value)))
}

fn boolean_value(c: &Condition) -> Option<bool> {
    match (c.op(), c.value()) {
        (Operator::Is, ConditionValue::Boolean(b)) => Some(*b),
        (Operator::True, _) => Some(true),
        (Operator::False, _) => Some(false),
        _ => None,
    }
}

// Fields whose rule-level meaning differs from a plain column comparison.
fn special_case(c: &Condition) -> Option<Filter> {
    match c.field() {
        "transfer" => {
            let op = if boolean_value(c)? {
                FilterOp::Ne
            } else {
                FilterOp::Eq
            };
            Some(Filter::compare("transfer_id", op, Value::Null))
        }
        "parent" => Some(Filter::compare(
            "is_parent",
            FilterOp::Eq,
            Value::Bool(boolean_value(c)?),
        )),
        "category" if c.op() == Operator::Is && c.current_value().is_null() => {
            Some(Filter::And(vec![
                Filter::compare("category", FilterOp::Eq, Value::Null),
                Filter::compare("transfer_id", FilterOp::Eq, Value::Null),
                Filter::compare("is_parent", FilterOp::Eq, Value::Bool(false)),
            ]))
        }
        _ => None,
    }
}
