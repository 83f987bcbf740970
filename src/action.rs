use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::datatype::parse_date;
use crate::error::ConstructionError;
use crate::record::{Patch, Record};
use crate::schema::{FieldType, SCHEDULE_FIELD, field_type};
use crate::split::{ExecOptions, execute_actions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionOp {
    #[serde(rename = "set")]
    Set,
    #[serde(rename = "set-split-amount")]
    SetSplitAmount,
    #[serde(rename = "link-schedule")]
    LinkSchedule,
    #[serde(rename = "prepend-notes")]
    PrependNotes,
    #[serde(rename = "append-notes")]
    AppendNotes,
}

impl ActionOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionOp::Set => "set",
            ActionOp::SetSplitAmount => "set-split-amount",
            ActionOp::LinkSchedule => "link-schedule",
            ActionOp::PrependNotes => "prepend-notes",
            ActionOp::AppendNotes => "append-notes",
        }
    }
}
impl FromStr for ActionOp {
    type Err = ConstructionError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            ActionOp::Set,
            ActionOp::SetSplitAmount,
            ActionOp::LinkSchedule,
            ActionOp::PrependNotes,
            ActionOp::AppendNotes,
        ]
        .into_iter()
        .find(|op| op.as_str() == s)
        .ok_or_else(|| ConstructionError::InvalidAction {
            message: format!("unknown action operator {s}"),
        })
    }
}
impl fmt::Display for ActionOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SplitMethod {
    FixedAmount,
    FixedPercent,
    Remainder,
}

/// Highest split index an action may target.
pub const MAX_SPLIT_INDEX: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<SplitMethod>,
}

impl ActionOptions {
    pub fn split(split_index: usize, method: SplitMethod) -> Self {
        Self {
            split_index: Some(split_index),
            method: Some(method),
        }
    }
    pub fn at(split_index: usize) -> Self {
        Self {
            split_index: Some(split_index),
            method: None,
        }
    }
}

/// The persisted shape of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub op: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ActionOptions>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
}

impl ActionDescriptor {
    pub fn new(op: &str, field: Option<&str>, value: Value) -> Self {
        Self {
            op: op.to_string(),
            field: field.map(str::to_string),
            value,
            options: None,
            field_type: None,
        }
    }
    pub fn with_options(mut self, options: ActionOptions) -> Self {
        self.options = Some(options);
        self
    }
}

// ------------- Action -------------
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    op: ActionOp,
    field: Option<String>,
    field_type: FieldType,
    value: Value,
    raw_value: Value,
    options: Option<ActionOptions>,
}

impl Action {
    pub fn new(
        op: ActionOp,
        field: Option<&str>,
        value: Value,
        options: Option<ActionOptions>,
    ) -> Result<Self, ConstructionError> {
        if let Some(index) = options
            .and_then(|o| o.split_index)
            .filter(|index| *index > MAX_SPLIT_INDEX)
        {
            return Err(ConstructionError::InvalidAction {
                message: format!("split index {index} exceeds {MAX_SPLIT_INDEX}"),
            });
        }
        let (field, field_type) = match op {
            ActionOp::Set => {
                let field = field.ok_or_else(|| ConstructionError::InvalidAction {
                    message: "set requires a field".to_string(),
                })?;
                let field_type =
                    field_type(field).ok_or_else(|| ConstructionError::UnknownField {
                        field: field.to_string(),
                    })?;
                validate_set_value(field, field_type, &value)?;
                (Some(field.to_string()), field_type)
            }
            ActionOp::SetSplitAmount => {
                let method = options.and_then(|o| o.method).ok_or_else(|| {
                    ConstructionError::InvalidAction {
                        message: "set-split-amount requires a method".to_string(),
                    }
                })?;
                if method != SplitMethod::Remainder && !value.is_number() {
                    return Err(ConstructionError::NotNumber {
                        field: "amount".to_string(),
                    });
                }
                (None, FieldType::Number)
            }
            ActionOp::LinkSchedule => {
                match &value {
                    Value::String(s) if !s.is_empty() => {}
                    Value::String(_) | Value::Null => {
                        return Err(ConstructionError::EmptyValue {
                            field: SCHEDULE_FIELD.to_string(),
                        });
                    }
                    _ => {
                        return Err(ConstructionError::NotString {
                            field: SCHEDULE_FIELD.to_string(),
                        });
                    }
                }
                (None, FieldType::Id)
            }
            ActionOp::PrependNotes | ActionOp::AppendNotes => {
                if !value.is_string() {
                    return Err(ConstructionError::NotString {
                        field: "notes".to_string(),
                    });
                }
                (Some("notes".to_string()), FieldType::String)
            }
        };
        Ok(Self {
            op,
            field,
            field_type,
            raw_value: value.clone(),
            value,
            options,
        })
    }
    pub fn from_descriptor(descriptor: &ActionDescriptor) -> Result<Self, ConstructionError> {
        let op: ActionOp = descriptor.op.parse()?;
        Self::new(
            op,
            descriptor.field.as_deref(),
            descriptor.value.clone(),
            descriptor.options,
        )
    }
    pub fn op(&self) -> ActionOp {
        self.op
    }
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }
    pub fn value(&self) -> &Value {
        &self.value
    }
    pub fn raw_value(&self) -> &Value {
        &self.raw_value
    }
    pub fn options(&self) -> Option<&ActionOptions> {
        self.options.as_ref()
    }
    /// Split index for child-scope actions. Index 0 applies to the parent.
    pub fn split_index(&self) -> Option<usize> {
        self.options
            .and_then(|o| o.split_index)
            .filter(|index| *index > 0)
    }
    pub fn split_method(&self) -> Option<SplitMethod> {
        match self.op {
            ActionOp::SetSplitAmount => self.options.and_then(|o| o.method),
            _ => None,
        }
    }

    pub fn exec(&self, record: &mut Record) {
        match self.op {
            ActionOp::Set => {
                if let Some(field) = &self.field {
                    record.set(field, self.value.clone());
                }
            }
            ActionOp::SetSplitAmount => {
                if self.split_method() == Some(SplitMethod::FixedAmount) {
                    record.set("amount", self.value.clone());
                }
            }
            ActionOp::LinkSchedule => record.set(SCHEDULE_FIELD, self.value.clone()),
            ActionOp::PrependNotes | ActionOp::AppendNotes => {
                let addition = self.value.as_str().unwrap_or_default();
                let notes = record.str("notes").unwrap_or_default();
                let combined = if self.op == ActionOp::PrependNotes {
                    format!("{addition}{notes}")
                } else {
                    format!("{notes}{addition}")
                };
                record.set("notes", Value::String(combined));
            }
        }
    }

    pub fn remap(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        if self.op != ActionOp::Set || self.field_type != FieldType::Id {
            return;
        }
        if let Value::String(raw) = &self.raw_value {
            self.value = Value::String(lookup(raw).unwrap_or_else(|| raw.clone()));
        }
    }

    pub fn serialize(&self) -> ActionDescriptor {
        ActionDescriptor {
            op: self.op.as_str().to_string(),
            field: self.field.clone(),
            value: self.value.clone(),
            options: self.options,
            field_type: Some(self.field_type.as_str().to_string()),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{} {} {}", self.op, field, self.value),
            None => write!(f, "{} {}", self.op, self.value),
        }
    }
}

fn validate_set_value(
    field: &str,
    field_type: FieldType,
    value: &Value,
) -> Result<(), ConstructionError> {
    let field_name = || field.to_string();
    if field == "account" && value.as_str().is_none_or(str::is_empty) {
        return Err(ConstructionError::EmptyValue { field: field_name() });
    }
    match (field_type, value) {
        (FieldType::Id | FieldType::String, Value::String(_) | Value::Null) => Ok(()),
        (FieldType::Id | FieldType::String, _) => {
            Err(ConstructionError::NotString { field: field_name() })
        }
        (_, Value::Null) => Err(ConstructionError::EmptyValue { field: field_name() }),
        (FieldType::Number, v) if v.is_number() => Ok(()),
        (FieldType::Number, _) => Err(ConstructionError::NotNumber { field: field_name() }),
        (FieldType::Boolean, v) if v.is_boolean() => Ok(()),
        (FieldType::Boolean, _) => Err(ConstructionError::NotBoolean { field: field_name() }),
        (FieldType::Date, Value::String(s)) if parse_date(s).is_some() => Ok(()),
        (FieldType::Date, v) => Err(ConstructionError::DateFormat {
            field: field_name(),
            value: v.to_string(),
        }),
    }
}

/// Runs one list of actions over many records, returning the changed keys of
/// each. `None` when any descriptor fails to construct.
pub fn apply_actions(
    records: &[Record],
    descriptors: &[ActionDescriptor],
    options: &ExecOptions,
) -> Option<Vec<Patch>> {
    let actions: Vec<Action> = descriptors
        .iter()
        .map(Action::from_descriptor)
        .collect::<Result<_, _>>()
        .map_err(|e| tracing::warn!(error = %e, "invalid action in bulk apply"))
        .ok()?;
    Some(
        records
            .iter()
            .map(|record| execute_actions(&actions, record, options).diff(record))
            .collect(),
    )
}
