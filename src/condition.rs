//! A single typed predicate over one record field.
//!
//! Construction validates the field, the operator and the value against
//! [`crate::schema`] and resolves the value into a [`ConditionValue`]; `eval`
//! then only ever dispatches on the already parsed value.
use std::fmt;

use chrono::Days;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::datatype::{DateValue, NumberValue, approx_threshold, format_date, parse_date};
use crate::error::ConstructionError;
use crate::record::Record;
use crate::schedule::Schedule;
use crate::schema::{FieldType, Operator, field_type};

// days either side of a date accepted by `isapprox`
pub const APPROX_DAYS: u64 = 2;

fn is_false(b: &bool) -> bool {
    !*b
}

/// Sign filter for amount conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionOptions {
    #[serde(default, skip_serializing_if = "is_false")]
    pub inflow: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub outflow: bool,
}

/// The persisted shape of a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDescriptor {
    pub op: String,
    pub field: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ConditionOptions>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
}

impl ConditionDescriptor {
    pub fn new(op: &str, field: &str, value: Value) -> Self {
        Self {
            op: op.to_string(),
            field: field.to_string(),
            value,
            options: None,
            field_type: None,
        }
    }
    pub fn with_options(mut self, options: ConditionOptions) -> Self {
        self.options = Some(options);
        self
    }
}

// ------------- ConditionValue -------------
#[derive(Debug, Clone)]
pub enum ConditionValue {
    Date(DateValue),
    Number(NumberValue),
    /// Lower-cased scalar; `None` is an explicit null (id fields only).
    Text(Option<String>),
    /// Lower-cased members of a `oneOf`/`notOneOf` set.
    Set(Vec<String>),
    Pattern(Regex),
    Boolean(bool),
    /// `true`/`false` operators carry no value.
    Flag,
}

// ------------- Condition -------------
#[derive(Debug, Clone)]
pub struct Condition {
    field: String,
    field_type: FieldType,
    op: Operator,
    value: ConditionValue,
    // as authored, input to every id remapping
    raw_value: Value,
    // raw_value after the latest remapping, what serialize() writes
    effective: Value,
    options: Option<ConditionOptions>,
}

impl Condition {
    pub fn new(
        op: Operator,
        field: &str,
        value: Value,
        options: Option<ConditionOptions>,
    ) -> Result<Self, ConstructionError> {
        let field_type = field_type(field).ok_or_else(|| ConstructionError::UnknownField {
            field: field.to_string(),
        })?;
        if !field_type.allows(op) {
            return Err(ConstructionError::InvalidOperator {
                op: op.as_str().to_string(),
                field: field.to_string(),
                field_type,
            });
        }
        let parsed = parse_value(field, field_type, op, &value)?;
        Ok(Self {
            field: field.to_string(),
            field_type,
            op,
            value: parsed,
            effective: value.clone(),
            raw_value: value,
            options,
        })
    }
    pub fn from_descriptor(descriptor: &ConditionDescriptor) -> Result<Self, ConstructionError> {
        let op: Operator = match descriptor.op.parse() {
            Ok(op) => op,
            Err(op) => {
                let field_type = field_type(&descriptor.field).ok_or_else(|| {
                    ConstructionError::UnknownField {
                        field: descriptor.field.clone(),
                    }
                })?;
                return Err(ConstructionError::InvalidOperator {
                    op,
                    field: descriptor.field.clone(),
                    field_type,
                });
            }
        };
        Self::new(
            op,
            &descriptor.field,
            descriptor.value.clone(),
            descriptor.options,
        )
    }
    pub fn field(&self) -> &str {
        &self.field
    }
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }
    pub fn op(&self) -> Operator {
        self.op
    }
    pub fn value(&self) -> &ConditionValue {
        &self.value
    }
    pub fn raw_value(&self) -> &Value {
        &self.raw_value
    }
    /// The value as authored, with ids remapped. Case is preserved.
    pub fn current_value(&self) -> &Value {
        &self.effective
    }
    pub fn options(&self) -> Option<&ConditionOptions> {
        self.options.as_ref()
    }
    pub fn inflow(&self) -> bool {
        self.options.is_some_and(|o| o.inflow)
    }
    pub fn outflow(&self) -> bool {
        self.options.is_some_and(|o| o.outflow)
    }

    pub fn eval(&self, record: &Record) -> bool {
        let Some(field_value) = record.get(&self.field) else {
            return false;
        };
        match self.field_type {
            FieldType::Date => self.eval_date(field_value),
            FieldType::Number => self.eval_number(field_value),
            FieldType::Id | FieldType::String => self.eval_text(field_value),
            FieldType::Boolean => self.eval_boolean(field_value),
        }
    }

    fn eval_text(&self, field_value: &Value) -> bool {
        let text = match field_value {
            Value::Null => None,
            Value::String(s) => Some(s.to_lowercase()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => return false,
        };
        match (&self.op, &self.value) {
            (Operator::Is, ConditionValue::Text(v)) => self.text_equals(&text, v),
            (Operator::IsNot, ConditionValue::Text(v)) => !self.text_equals(&text, v),
            (Operator::Contains, ConditionValue::Text(Some(v))) => {
                text.is_some_and(|t| t.contains(v.as_str()))
            }
            (Operator::DoesNotContain, ConditionValue::Text(Some(v))) => {
                text.is_some_and(|t| !t.contains(v.as_str()))
            }
            (Operator::OneOf, ConditionValue::Set(set)) => text.is_some_and(|t| set.contains(&t)),
            (Operator::NotOneOf, ConditionValue::Set(set)) => {
                text.is_some_and(|t| !set.contains(&t))
            }
            (Operator::Matches, ConditionValue::Pattern(re)) => {
                text.is_some_and(|t| re.is_match(&t))
            }
            _ => false,
        }
    }
    // String fields compare null as the empty string, id fields keep null.
    fn text_equals(&self, text: &Option<String>, value: &Option<String>) -> bool {
        if self.field_type == FieldType::String {
            text.as_deref().unwrap_or("") == value.as_deref().unwrap_or("")
        } else {
            text == value
        }
    }

    fn eval_number(&self, field_value: &Value) -> bool {
        let Some(mut n) = field_value.as_f64() else {
            return false;
        };
        if self.outflow() {
            if n > 0.0 {
                return false;
            }
            n = -n;
        } else if self.inflow() && n < 0.0 {
            return false;
        }
        let ConditionValue::Number(number) = &self.value else {
            return false;
        };
        match (&self.op, number) {
            (Operator::Is, NumberValue::Literal(v)) => n == *v,
            (Operator::IsApprox, NumberValue::Literal(v)) => {
                let threshold = approx_threshold(*v);
                n >= v - threshold && n <= v + threshold
            }
            (Operator::IsBetween, between @ NumberValue::Between(..)) => {
                let (low, high) = between.bounds();
                n >= low && n <= high
            }
            (Operator::Gt, NumberValue::Literal(v)) => n > *v,
            (Operator::Gte, NumberValue::Literal(v)) => n >= *v,
            (Operator::Lt, NumberValue::Literal(v)) => n < *v,
            (Operator::Lte, NumberValue::Literal(v)) => n <= *v,
            _ => false,
        }
    }

    fn eval_date(&self, field_value: &Value) -> bool {
        let (Some(date), ConditionValue::Date(value)) = (field_value.as_str(), &self.value) else {
            return false;
        };
        match self.op {
            Operator::Is | Operator::IsApprox => {
                let approx = self.op == Operator::IsApprox;
                match value {
                    DateValue::Exact(d) if approx => match approx_bounds(d) {
                        Some((low, high)) => date >= low.as_str() && date <= high.as_str(),
                        None => false,
                    },
                    DateValue::Exact(d) => date == format_date(d),
                    DateValue::Month { .. } => date.get(0..7) == Some(value.to_string().as_str()),
                    DateValue::Year(_) => date.get(0..4) == Some(value.to_string().as_str()),
                    DateValue::Recurring(schedule) => {
                        let Some(d) = parse_date(date) else {
                            return false;
                        };
                        if !approx {
                            return schedule.occurs_on(d);
                        }
                        match (
                            d.checked_sub_days(Days::new(APPROX_DAYS)),
                            d.checked_add_days(Days::new(APPROX_DAYS)),
                        ) {
                            (Some(low), Some(high)) => schedule.occurs_between(low, high),
                            _ => false,
                        }
                    }
                }
            }
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                let Some(exact) = value.exact() else {
                    return false;
                };
                let exact = format_date(exact);
                match self.op {
                    Operator::Gt => date > exact.as_str(),
                    Operator::Gte => date >= exact.as_str(),
                    Operator::Lt => date < exact.as_str(),
                    _ => date <= exact.as_str(),
                }
            }
            _ => false,
        }
    }

    fn eval_boolean(&self, field_value: &Value) -> bool {
        let Some(b) = field_value.as_bool() else {
            return false;
        };
        match (&self.op, &self.value) {
            (Operator::Is, ConditionValue::Boolean(v)) => b == *v,
            (Operator::True, _) => b,
            (Operator::False, _) => !b,
            _ => false,
        }
    }

    /// Re-resolves id values through `lookup`, always starting from the value
    /// as authored so repeated remaps do not compound.
    pub fn remap(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        if self.field_type != FieldType::Id {
            return;
        }
        match (self.op, &self.raw_value) {
            (Operator::Is | Operator::IsNot, Value::String(raw)) => {
                let mapped = lookup(raw).unwrap_or_else(|| raw.clone());
                self.value = ConditionValue::Text(Some(mapped.to_lowercase()));
                self.effective = Value::String(mapped);
            }
            (Operator::OneOf | Operator::NotOneOf, Value::Array(items)) => {
                let mapped: Vec<Value> = items
                    .iter()
                    .map(|item| match item {
                        Value::String(raw) => {
                            Value::String(lookup(raw).unwrap_or_else(|| raw.clone()))
                        }
                        other => other.clone(),
                    })
                    .collect();
                self.value = ConditionValue::Set(
                    mapped
                        .iter()
                        .filter_map(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(str::to_lowercase)
                        .collect(),
                );
                self.effective = Value::Array(mapped);
            }
            _ => {}
        }
    }

    /// Id values this condition references, as currently remapped.
    pub fn ids(&self) -> Vec<&str> {
        if self.field_type != FieldType::Id {
            return Vec::new();
        }
        match &self.effective {
            Value::String(s) if matches!(self.op, Operator::Is | Operator::IsNot) => vec![s.as_str()],
            Value::Array(items) if self.op.is_set_op() => {
                items.iter().filter_map(Value::as_str).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn serialize(&self) -> ConditionDescriptor {
        ConditionDescriptor {
            op: self.op.as_str().to_string(),
            field: self.field.clone(),
            value: self.effective.clone(),
            options: self.options,
            field_type: Some(self.field_type.as_str().to_string()),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op, self.effective)
    }
}

pub(crate) fn approx_bounds(date: &chrono::NaiveDate) -> Option<(String, String)> {
    let low = date.checked_sub_days(Days::new(APPROX_DAYS))?;
    let high = date.checked_add_days(Days::new(APPROX_DAYS))?;
    Some((format_date(&low), format_date(&high)))
}

// ------------- Parsing -------------
fn parse_value(
    field: &str,
    field_type: FieldType,
    op: Operator,
    value: &Value,
) -> Result<ConditionValue, ConstructionError> {
    let field_name = || field.to_string();
    if value.is_null() && !field_type.nullable() && !matches!(op, Operator::True | Operator::False)
    {
        return Err(ConstructionError::EmptyValue { field: field_name() });
    }
    match field_type {
        FieldType::Date => {
            let parsed = match value {
                Value::String(s) => DateValue::parse(s).ok_or_else(|| {
                    ConstructionError::DateFormat {
                        field: field_name(),
                        value: s.clone(),
                    }
                })?,
                Value::Object(map) if map.contains_key("frequency") => {
                    let schedule = Schedule::from_value(value).map_err(|message| {
                        ConstructionError::RecurDate {
                            field: field_name(),
                            message,
                        }
                    })?;
                    DateValue::Recurring(schedule)
                }
                other => {
                    return Err(ConstructionError::DateFormat {
                        field: field_name(),
                        value: other.to_string(),
                    });
                }
            };
            let legal = match op {
                Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => parsed.is_exact(),
                _ => true,
            };
            if !legal {
                return Err(ConstructionError::DateFormat {
                    field: field_name(),
                    value: value.to_string(),
                });
            }
            Ok(ConditionValue::Date(parsed))
        }
        FieldType::Number => {
            let parsed = match value {
                Value::Number(n) => {
                    let n = n.as_f64().ok_or_else(|| ConstructionError::NotNumber {
                        field: field_name(),
                    })?;
                    NumberValue::Literal(n)
                }
                Value::Object(map) => {
                    let bound = |key: &str| map.get(key).and_then(Value::as_f64);
                    match (bound("num1"), bound("num2")) {
                        (Some(a), Some(b)) => NumberValue::Between(a, b),
                        _ => return Err(ConstructionError::NotNumber { field: field_name() }),
                    }
                }
                _ => return Err(ConstructionError::NotNumber { field: field_name() }),
            };
            let shape_ok = match parsed {
                NumberValue::Between(..) => op == Operator::IsBetween,
                NumberValue::Literal(_) => op != Operator::IsBetween,
            };
            if !shape_ok {
                return Err(ConstructionError::NumberFormat {
                    field: field_name(),
                    op: op.as_str().to_string(),
                });
            }
            Ok(ConditionValue::Number(parsed))
        }
        FieldType::Id | FieldType::String => parse_text(field, field_type, op, value),
        FieldType::Boolean => match op {
            Operator::True | Operator::False => Ok(ConditionValue::Flag),
            _ => value
                .as_bool()
                .map(ConditionValue::Boolean)
                .ok_or_else(|| ConstructionError::NotBoolean { field: field_name() }),
        },
    }
}

fn parse_text(
    field: &str,
    field_type: FieldType,
    op: Operator,
    value: &Value,
) -> Result<ConditionValue, ConstructionError> {
    let field_name = || field.to_string();
    match op {
        Operator::OneOf | Operator::NotOneOf => {
            let Value::Array(items) = value else {
                return Err(ConstructionError::EmptyArray { field: field_name() });
            };
            let mut set = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Null => {}
                    Value::String(s) if s.is_empty() => {}
                    Value::String(s) => set.push(s.to_lowercase()),
                    _ => return Err(ConstructionError::NotString { field: field_name() }),
                }
            }
            Ok(ConditionValue::Set(set))
        }
        Operator::Contains | Operator::DoesNotContain | Operator::Matches => {
            let s = match value {
                Value::String(s) if !s.is_empty() => s,
                Value::String(_) | Value::Null => {
                    return Err(ConstructionError::EmptyValue { field: field_name() });
                }
                _ => return Err(ConstructionError::NotString { field: field_name() }),
            };
            if op == Operator::Matches {
                let re = RegexBuilder::new(s)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| ConstructionError::InvalidPattern {
                        field: field_name(),
                        message: e.to_string(),
                    })?;
                return Ok(ConditionValue::Pattern(re));
            }
            Ok(ConditionValue::Text(Some(s.to_lowercase())))
        }
        _ => match value {
            Value::String(s) => Ok(ConditionValue::Text(Some(s.to_lowercase()))),
            Value::Null if field_type == FieldType::String => {
                Ok(ConditionValue::Text(Some(String::new())))
            }
            Value::Null => Ok(ConditionValue::Text(None)),
            _ => Err(ConstructionError::NotString { field: field_name() }),
        },
    }
}
