
use thiserror::Error;

use crate::schema::FieldType;

// ------------- Construction -------------
// Raised while building a Condition or Action, never during eval.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConstructionError {
    #[error("Invalid field: {field}")]
    UnknownField { field: String },
    #[error("Invalid operator: {op} (field: {field}, type: {field_type})")]
    InvalidOperator {
        op: String,
        field: String,
        field_type: FieldType,
    },
    #[error("Invalid date format (field: {field}): {value}")]
    DateFormat { field: String, value: String },
    #[error("Invalid recurring date (field: {field}): {message}")]
    RecurDate { field: String, message: String },
    #[error("Value must be a number or range (field: {field})")]
    NotNumber { field: String },
    #[error("Invalid number format for {op} (field: {field})")]
    NumberFormat { field: String, op: String },
    #[error("Value must be a string (field: {field})")]
    NotString { field: String },
    #[error("Value must be a boolean (field: {field})")]
    NotBoolean { field: String },
    #[error("Value cannot be empty (field: {field})")]
    EmptyValue { field: String },
    #[error("Value must be an array (field: {field})")]
    EmptyArray { field: String },
    #[error("Invalid pattern (field: {field}): {message}")]
    InvalidPattern { field: String, message: String },
    #[error("Invalid action: {message}")]
    InvalidAction { message: String },
    #[error("Invalid stage: {0}")]
    InvalidStage(String),
    #[error("Invalid conditions operator: {0}")]
    InvalidConditionsOp(String),
}

impl ConstructionError {
    /// Stable identifier reported in translation error lists.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownField { .. } => "invalid-field",
            Self::InvalidOperator { .. } => "invalid-op",
            Self::DateFormat { .. } => "date-format",
            Self::RecurDate { .. } => "parse-recur-date",
            Self::NotNumber { .. } => "not-number",
            Self::NumberFormat { .. } => "number-format",
            Self::NotString { .. } => "not-string",
            Self::NotBoolean { .. } => "not-boolean",
            Self::EmptyValue { .. } => "no-null",
            Self::EmptyArray { .. } => "no-empty-array",
            Self::InvalidPattern { .. } => "invalid-pattern",
            Self::InvalidAction { .. } => "internal",
            Self::InvalidStage(_) => "invalid-stage",
            Self::InvalidConditionsOp(_) => "invalid-conditions-op",
        }
    }
}

// ------------- Split -------------
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SplitError {
    #[error("Fixed split amounts {allocated} do not add up to the parent amount {expected}")]
    Unreconciled { expected: i64, allocated: i64 },
    #[error("Split amounts overflow")]
    Overflow,
    #[error("Too many splits: {0}")]
    TooManySplits(usize),
}

// ------------- Crate -------------
#[derive(Error, Debug)]
pub enum RuleError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),
    #[error("Rule load error ({id}): {message}")]
    Load { id: String, message: String },
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, RuleError>;

// Helper conversions
impl From<rusqlite::Error> for RuleError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}
impl From<config::ConfigError> for RuleError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
impl From<serde_json::Error> for RuleError {
    fn from(e: serde_json::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

// ------------- Translation -------------
/// A condition that could not be turned into a filter. Collected, never raised.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message} (field: {field}, op: {op})")]
pub struct TranslationError {
    pub field: String,
    pub op: String,
    pub kind: String,
    pub message: String,
}
