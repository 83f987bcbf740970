//! Inverted indexes from a field value to the ids of rules that could match it.
use core::hash::{BuildHasher, BuildHasherDefault};
use std::collections::hash_map::RandomState;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;

use seahash::SeaHasher;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::ConditionValue;
use crate::record::Record;
use crate::rule::{ConditionsOp, Rule};
use crate::schema::Operator;

pub type OtherHasher = BuildHasherDefault<SeaHasher>;

/// Bucket of rules that cannot be pre-filtered on the indexed field.
pub const WILDCARD: &str = "*";

// ------------- Lookups -------------
#[derive(Debug, Clone)]
pub struct Lookup<K, V, H = RandomState> {
    index: HashMap<K, HashSet<V>, H>,
}
impl<K: Eq + Hash, V: Eq + Hash, H: BuildHasher + Default> Lookup<K, V, H> {
    pub fn new() -> Self {
        Self {
            index: HashMap::<K, HashSet<V>, H>::default(),
        }
    }
    pub fn insert(&mut self, key: K, value: V) {
        let set = self.index.entry(key).or_default();
        set.insert(value);
    }
    pub fn remove(&mut self, key: &K, value: &V) {
        if let Some(set) = self.index.get_mut(key) {
            set.remove(value);
            if set.is_empty() {
                self.index.remove(key);
            }
        }
    }
    pub fn lookup(&self, key: &K) -> Option<&HashSet<V>> {
        self.index.get(key)
    }
    pub fn len(&self) -> usize {
        self.index.len()
    }
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
impl<K: Eq + Hash, V: Eq + Hash, H: BuildHasher + Default> Default for Lookup<K, V, H> {
    fn default() -> Self {
        Self::new()
    }
}

// ------------- RuleIndex -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bucketing {
    Exact,
    FirstChar,
}

#[derive(Debug, Clone)]
pub struct RuleIndex {
    field: String,
    bucketing: Bucketing,
    buckets: Lookup<String, String, OtherHasher>,
}

impl RuleIndex {
    pub fn new(field: &str, bucketing: Bucketing) -> Self {
        Self {
            field: field.to_string(),
            bucketing,
            buckets: Lookup::new(),
        }
    }
    pub fn field(&self) -> &str {
        &self.field
    }
    pub fn bucketing(&self) -> Bucketing {
        self.bucketing
    }
    /// Bucket key of a value; `None` for anything but a non-empty string.
    pub fn key(&self, value: &str) -> Option<String> {
        if value.is_empty() {
            return None;
        }
        match self.bucketing {
            Bucketing::Exact => Some(value.to_lowercase()),
            Bucketing::FirstChar => value.chars().next().map(|c| c.to_lowercase().collect()),
        }
    }
    fn key_or_wildcard(&self, value: Option<&str>) -> String {
        value
            .and_then(|v| self.key(v))
            .unwrap_or_else(|| WILDCARD.to_string())
    }

    /// Buckets a rule belongs in, judged by its first condition on the field.
    pub fn keys_for(&self, rule: &Rule) -> Vec<String> {
        // any other condition of an `or` rule can match regardless of this field
        if rule.conditions_op() == ConditionsOp::Or && rule.conditions().len() > 1 {
            return vec![WILDCARD.to_string()];
        }
        let Some(condition) = rule.conditions_for_field(&self.field).next() else {
            return vec![WILDCARD.to_string()];
        };
        match (condition.op(), condition.value()) {
            (Operator::Is | Operator::IsNot, ConditionValue::Text(value)) => {
                vec![self.key_or_wildcard(value.as_deref())]
            }
            (Operator::OneOf | Operator::NotOneOf, ConditionValue::Set(values))
                if !values.is_empty() =>
            {
                let keys: BTreeSet<String> = values
                    .iter()
                    .map(|v| self.key_or_wildcard(Some(v)))
                    .collect();
                keys.into_iter().collect()
            }
            _ => vec![WILDCARD.to_string()],
        }
    }
    pub fn add(&mut self, rule: &Rule) {
        for key in self.keys_for(rule) {
            self.buckets.insert(key, rule.id().to_string());
        }
    }
    pub fn remove(&mut self, rule: &Rule) {
        let id = rule.id().to_string();
        for key in self.keys_for(rule) {
            self.buckets.remove(&key, &id);
        }
    }
    /// Ids of every rule that could match `record`: the bucket for the
    /// record's value together with the wildcard bucket.
    pub fn candidates(&self, record: &Record) -> BTreeSet<&str> {
        let mut ids = BTreeSet::new();
        let key = record
            .get(&self.field)
            .and_then(Value::as_str)
            .and_then(|v| self.key(v));
        if let Some(bucket) = key.and_then(|k| self.buckets.lookup(&k)) {
            ids.extend(bucket.iter().map(String::as_str));
        }
        if let Some(bucket) = self.buckets.lookup(&WILDCARD.to_string()) {
            ids.extend(bucket.iter().map(String::as_str));
        }
        ids
    }
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
