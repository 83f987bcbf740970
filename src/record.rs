use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::datatype::json_amount;

pub const SUBTRANSACTIONS: &str = "subtransactions";

/// A transaction as a flat JSON object keyed by public field names.
///
/// A key that is present with a `null` value is different from a missing
/// key: conditions never match a missing field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

/// The changed keys produced by running a rule.
pub type Patch = Map<String, Value>;

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }
    /// `None` unless the value is a JSON object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }
    pub fn set(&mut self, field: &str, value: Value) {
        self.0.insert(field.to_string(), value);
    }
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }
    pub fn str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }
    pub fn amount(&self) -> Option<i64> {
        self.0.get("amount").and_then(json_amount)
    }
    pub fn is_child(&self) -> bool {
        self.flag("is_child")
    }
    pub fn is_parent(&self) -> bool {
        self.flag("is_parent")
    }
    fn flag(&self, field: &str) -> bool {
        self.0.get(field).and_then(Value::as_bool).unwrap_or(false)
    }
    pub fn subtransactions(&self) -> Vec<Record> {
        match self.0.get(SUBTRANSACTIONS) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| Record::from_value(v.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
    /// Keys whose value differs from `before`, including newly added keys.
    pub fn diff(&self, before: &Record) -> Patch {
        self.0
            .iter()
            .filter(|(k, v)| before.0.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
    pub fn merge(&mut self, patch: &Patch) {
        for (k, v) in patch {
            self.0.insert(k.clone(), v.clone());
        }
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}
