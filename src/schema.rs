//! The static field table: which fields a rule may reference, the value type
//! of each field and the operators that are legal for that type.
//!
//! This table is shared by condition construction and by the query
//! translator, so a (type, operator) pair is valid in both or in neither.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bimap::BiMap;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

// ------------- FieldType -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Date,
    Id,
    String,
    Number,
    Boolean,
}

impl FieldType {
    pub fn operators(&self) -> &'static [Operator] {
        use Operator::*;
        match self {
            FieldType::Date => &[Is, IsApprox, Gt, Gte, Lt, Lte],
            FieldType::Id | FieldType::String => &[
                Is,
                Contains,
                Matches,
                OneOf,
                IsNot,
                DoesNotContain,
                NotOneOf,
            ],
            FieldType::Number => &[Is, IsApprox, IsBetween, Gt, Gte, Lt, Lte],
            FieldType::Boolean => &[Is, True, False],
        }
    }
    pub fn allows(&self, op: Operator) -> bool {
        self.operators().contains(&op)
    }
    pub fn nullable(&self) -> bool {
        matches!(self, FieldType::Id | FieldType::String)
    }
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Date => "date",
            FieldType::Id => "id",
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
        }
    }
}
impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ------------- Operator -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "is")]
    Is,
    #[serde(rename = "isNot")]
    IsNot,
    #[serde(rename = "isapprox")]
    IsApprox,
    #[serde(rename = "isbetween")]
    IsBetween,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "doesNotContain")]
    DoesNotContain,
    #[serde(rename = "oneOf")]
    OneOf,
    #[serde(rename = "notOneOf")]
    NotOneOf,
    #[serde(rename = "matches")]
    Matches,
    #[serde(rename = "gt")]
    Gt,
    #[serde(rename = "gte")]
    Gte,
    #[serde(rename = "lt")]
    Lt,
    #[serde(rename = "lte")]
    Lte,
    #[serde(rename = "true")]
    True,
    #[serde(rename = "false")]
    False,
}

impl Operator {
    pub const ALL: [Operator; 15] = [
        Operator::Is,
        Operator::IsNot,
        Operator::IsApprox,
        Operator::IsBetween,
        Operator::Contains,
        Operator::DoesNotContain,
        Operator::OneOf,
        Operator::NotOneOf,
        Operator::Matches,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
        Operator::True,
        Operator::False,
    ];
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Is => "is",
            Operator::IsNot => "isNot",
            Operator::IsApprox => "isapprox",
            Operator::IsBetween => "isbetween",
            Operator::Contains => "contains",
            Operator::DoesNotContain => "doesNotContain",
            Operator::OneOf => "oneOf",
            Operator::NotOneOf => "notOneOf",
            Operator::Matches => "matches",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::True => "true",
            Operator::False => "false",
        }
    }
    /// Operators whose value is a set of strings.
    pub fn is_set_op(&self) -> bool {
        matches!(self, Operator::OneOf | Operator::NotOneOf)
    }
    /// Weight used when ranking rules; more specific operators weigh more.
    pub fn weight(&self) -> u32 {
        match self {
            Operator::Is | Operator::IsNot => 10,
            Operator::OneOf | Operator::NotOneOf => 9,
            Operator::IsApprox | Operator::IsBetween => 5,
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => 1,
            _ => 0,
        }
    }
    pub fn is_exact_like(&self) -> bool {
        matches!(
            self,
            Operator::Is
                | Operator::IsNot
                | Operator::IsApprox
                | Operator::OneOf
                | Operator::NotOneOf
        )
    }
}
impl FromStr for Operator {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .iter()
            .find(|op| op.as_str() == s)
            .copied()
            .ok_or_else(|| s.to_string())
    }
}
impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ------------- Field table -------------
/// Reserved record key written by the link-schedule action.
pub const SCHEDULE_FIELD: &str = "schedule";

lazy_static! {
    static ref FIELD_TYPES: HashMap<&'static str, FieldType> = {
        let mut m = HashMap::new();
        m.insert("imported_payee", FieldType::String);
        m.insert("payee", FieldType::Id);
        m.insert("payee_name", FieldType::String);
        m.insert("date", FieldType::Date);
        m.insert("notes", FieldType::String);
        m.insert("amount", FieldType::Number);
        m.insert("category", FieldType::Id);
        m.insert("account", FieldType::Id);
        m.insert("cleared", FieldType::Boolean);
        m.insert("reconciled", FieldType::Boolean);
        m.insert("transfer", FieldType::Boolean);
        m.insert("parent", FieldType::Boolean);
        m
    };
    // public name on the left, the query layer's internal name on the right
    static ref FIELD_NAMES: BiMap<&'static str, &'static str> = {
        let mut m = BiMap::new();
        m.insert("id", "id");
        m.insert("imported_payee", "imported_description");
        m.insert("payee", "description");
        m.insert("payee_name", "payee_name");
        m.insert("date", "date");
        m.insert("notes", "notes");
        m.insert("amount", "amount");
        m.insert("category", "category");
        m.insert("account", "acct");
        m.insert("cleared", "cleared");
        m.insert("reconciled", "reconciled");
        m.insert("transfer", "transfer");
        m.insert("parent", "parent");
        m.insert("is_parent", "isParent");
        m.insert("is_child", "isChild");
        m.insert("parent_id", "parent_id");
        m.insert("imported_id", "financial_id");
        m.insert("transfer_id", "transferred_id");
        m.insert(SCHEDULE_FIELD, SCHEDULE_FIELD);
        m
    };
}

/// Type of a rule-addressable field, `None` when the field is unknown.
pub fn field_type(field: &str) -> Option<FieldType> {
    FIELD_TYPES.get(field).copied()
}

pub fn fields() -> impl Iterator<Item = (&'static str, FieldType)> {
    FIELD_TYPES.iter().map(|(name, t)| (*name, *t))
}

pub fn is_valid_op(field: &str, op: Operator) -> bool {
    field_type(field).is_some_and(|t| t.allows(op))
}

/// Maps a public field name to the name used by the storage/query layer.
/// Names outside the table pass through unchanged.
pub fn to_internal_field(field: &str) -> String {
    FIELD_NAMES
        .get_by_left(field)
        .map(|s| s.to_string())
        .unwrap_or_else(|| field.to_string())
}

pub fn to_public_field(field: &str) -> String {
    FIELD_NAMES
        .get_by_right(field)
        .map(|s| s.to_string())
        .unwrap_or_else(|| field.to_string())
}
