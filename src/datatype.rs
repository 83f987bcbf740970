//! Parsed condition values. Date and number conditions are resolved into these
//! once, at construction, so evaluation never has to re-inspect raw JSON.
use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde_json::Value;

use crate::schedule::Schedule;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Rounds half up, towards positive infinity, so `-1198.5` becomes `-1198`.
/// Split allocation depends on this exact behaviour for its residuals.
pub fn js_round(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

/// Tolerance band for approximate amount matching: 7.5% of the value, rounded.
pub fn approx_threshold(value: f64) -> f64 {
    js_round(value.abs() * 0.075) as f64
}

/// Integer minor units from a JSON amount; fractional amounts are rounded.
pub fn json_amount(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(js_round))
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

// ------------- Dates -------------
#[derive(Debug, Clone, PartialEq)]
pub enum DateValue {
    Exact(NaiveDate),
    Month { year: i32, month: u32 },
    Year(i32),
    Recurring(Schedule),
}

impl DateValue {
    /// Parses a date string by its length: `YYYY-MM-DD`, `YYYY-MM` or `YYYY`.
    pub fn parse(s: &str) -> Option<DateValue> {
        match s.len() {
            10 => parse_date(s).map(DateValue::Exact),
            7 => NaiveDate::parse_from_str(&format!("{s}-01"), DATE_FORMAT)
                .ok()
                .map(|d| DateValue::Month {
                    year: d.year(),
                    month: d.month(),
                }),
            4 => NaiveDate::parse_from_str(&format!("{s}-01-01"), DATE_FORMAT)
                .ok()
                .map(|d| DateValue::Year(d.year())),
            _ => None,
        }
    }
    pub fn exact(&self) -> Option<&NaiveDate> {
        match self {
            DateValue::Exact(d) => Some(d),
            _ => None,
        }
    }
    pub fn is_exact(&self) -> bool {
        matches!(self, DateValue::Exact(_))
    }
}

impl fmt::Display for DateValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DateValue::Exact(d) => write!(f, "{}", format_date(d)),
            DateValue::Month { year, month } => write!(f, "{:04}-{:02}", year, month),
            DateValue::Year(y) => write!(f, "{:04}", y),
            DateValue::Recurring(s) => write!(f, "every {} from {}", s.frequency(), s.start()),
        }
    }
}

// ------------- Numbers -------------
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberValue {
    Literal(f64),
    Between(f64, f64),
}

impl NumberValue {
    pub fn literal(&self) -> Option<f64> {
        match self {
            NumberValue::Literal(n) => Some(*n),
            NumberValue::Between(..) => None,
        }
    }
    /// Bounds sorted low to high, whichever order they were given in.
    pub fn bounds(&self) -> (f64, f64) {
        match *self {
            NumberValue::Literal(n) => (n, n),
            NumberValue::Between(a, b) if a <= b => (a, b),
            NumberValue::Between(a, b) => (b, a),
        }
    }
}
