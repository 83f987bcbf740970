//! Recurring dates, as used by `date is <schedule>` conditions.
//!
//! A [`RecurConfig`] is the JSON shape stored in a rule; a [`Schedule`] is the
//! validated form that can enumerate occurrences in ascending order.
use std::collections::VecDeque;
use std::fmt;

use chrono::{Datelike, Days, Months, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::datatype::parse_date;

// stop enumerating after this many consecutive periods without an occurrence
const MAX_EMPTY_PERIODS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}
impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Frequency::Daily => "day",
            Frequency::Weekly => "week",
            Frequency::Monthly => "month",
            Frequency::Yearly => "year",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternKind {
    #[serde(rename = "day")]
    Day,
    #[serde(rename = "SU")]
    Sunday,
    #[serde(rename = "MO")]
    Monday,
    #[serde(rename = "TU")]
    Tuesday,
    #[serde(rename = "WE")]
    Wednesday,
    #[serde(rename = "TH")]
    Thursday,
    #[serde(rename = "FR")]
    Friday,
    #[serde(rename = "SA")]
    Saturday,
}
impl PatternKind {
    fn weekday(&self) -> Option<Weekday> {
        match self {
            PatternKind::Day => None,
            PatternKind::Sunday => Some(Weekday::Sun),
            PatternKind::Monday => Some(Weekday::Mon),
            PatternKind::Tuesday => Some(Weekday::Tue),
            PatternKind::Wednesday => Some(Weekday::Wed),
            PatternKind::Thursday => Some(Weekday::Thu),
            PatternKind::Friday => Some(Weekday::Fri),
            PatternKind::Saturday => Some(Weekday::Sat),
        }
    }
}

/// `day` patterns pick a day of the month (`-1` is the last day); weekday
/// patterns pick the n-th such weekday (`-1` is the last, `0` every one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurPattern {
    #[serde(rename = "type")]
    pub kind: PatternKind,
    #[serde(default)]
    pub value: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndMode {
    #[default]
    Never,
    AfterNOccurrences,
    OnDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurConfig {
    pub start: String,
    pub frequency: Frequency,
    #[serde(default)]
    pub interval: Option<u32>,
    #[serde(default)]
    pub patterns: Vec<RecurPattern>,
    #[serde(default)]
    pub end_mode: EndMode,
    #[serde(default)]
    pub end_occurrences: Option<usize>,
    #[serde(default)]
    pub end_date: Option<String>,
}

// ------------- Schedule -------------
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    config: RecurConfig,
    start: NaiveDate,
    interval: u32,
    until: Option<NaiveDate>,
    count: Option<usize>,
}

impl Schedule {
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let config: RecurConfig =
            serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        Self::from_config(config)
    }
    pub fn from_config(config: RecurConfig) -> Result<Self, String> {
        let start = parse_date(&config.start)
            .ok_or_else(|| format!("invalid start date: {}", config.start))?;
        let interval = config.interval.unwrap_or(1).max(1);
        let (until, count) = match config.end_mode {
            EndMode::Never => (None, None),
            EndMode::OnDate => {
                let end = config
                    .end_date
                    .as_deref()
                    .ok_or_else(|| "endDate is required for on_date".to_string())?;
                let until =
                    parse_date(end).ok_or_else(|| format!("invalid end date: {}", end))?;
                (Some(until), None)
            }
            EndMode::AfterNOccurrences => {
                let n = config.end_occurrences.ok_or_else(|| {
                    "endOccurrences is required for after_n_occurrences".to_string()
                })?;
                (None, Some(n))
            }
        };
        Ok(Self {
            config,
            start,
            interval,
            until,
            count,
        })
    }
    pub fn config(&self) -> &RecurConfig {
        &self.config
    }
    pub fn start(&self) -> NaiveDate {
        self.start
    }
    pub fn frequency(&self) -> Frequency {
        self.config.frequency
    }
    pub fn occurrences(&self) -> Occurrences<'_> {
        Occurrences {
            schedule: self,
            period: 0,
            buffer: VecDeque::new(),
            emitted: 0,
            empty_periods: 0,
            done: false,
        }
    }
    pub fn occurs_on(&self, date: NaiveDate) -> bool {
        for occurrence in self.occurrences() {
            if occurrence >= date {
                return occurrence == date;
            }
        }
        false
    }
    /// True when any occurrence lies within `[low, high]`.
    pub fn occurs_between(&self, low: NaiveDate, high: NaiveDate) -> bool {
        for occurrence in self.occurrences() {
            if occurrence > high {
                return false;
            }
            if occurrence >= low {
                return true;
            }
        }
        false
    }

    // Candidate dates for the k-th period, ascending. None once the
    // calendar runs out of range.
    fn period_dates(&self, k: u64) -> Option<Vec<NaiveDate>> {
        let step = k.checked_mul(self.interval as u64)?;
        let mut dates = match self.config.frequency {
            Frequency::Daily => vec![self.start.checked_add_days(Days::new(step))?],
            Frequency::Weekly => self.weekly(step)?,
            Frequency::Monthly => {
                let first = self.start.with_day(1)?;
                let month = first.checked_add_months(Months::new(u32::try_from(step).ok()?))?;
                self.monthly(month)
            }
            Frequency::Yearly => {
                let year = i32::try_from(step)
                    .ok()
                    .and_then(|s| self.start.year().checked_add(s))?;
                if year > 262_000 {
                    return None;
                }
                NaiveDate::from_ymd_opt(year, self.start.month(), self.start.day())
                    .into_iter()
                    .collect()
            }
        };
        dates.sort();
        dates.dedup();
        Some(dates)
    }
    fn weekly(&self, step: u64) -> Option<Vec<NaiveDate>> {
        let weekdays: Vec<Weekday> = self
            .config
            .patterns
            .iter()
            .filter_map(|p| p.kind.weekday())
            .collect();
        let offset = step.checked_mul(7)?;
        if weekdays.is_empty() {
            return Some(vec![self.start.checked_add_days(Days::new(offset))?]);
        }
        let monday = self
            .start
            .checked_sub_days(Days::new(self.start.weekday().num_days_from_monday() as u64))?;
        let base = monday.checked_add_days(Days::new(offset))?;
        weekdays
            .iter()
            .map(|w| base.checked_add_days(Days::new(w.num_days_from_monday() as u64)))
            .collect()
    }
    fn monthly(&self, first: NaiveDate) -> Vec<NaiveDate> {
        let (year, month) = (first.year(), first.month());
        if self.config.patterns.is_empty() {
            return NaiveDate::from_ymd_opt(year, month, self.start.day())
                .into_iter()
                .collect();
        }
        let last_day = days_in_month(first);
        let mut dates = Vec::new();
        for pattern in &self.config.patterns {
            match pattern.kind.weekday() {
                None => {
                    let day = match pattern.value {
                        v if v > 0 => v as u32,
                        v if v < 0 => {
                            let from_end = last_day as i32 + 1 + v;
                            if from_end < 1 {
                                continue;
                            }
                            from_end as u32
                        }
                        _ => continue,
                    };
                    if day <= last_day {
                        dates.extend(NaiveDate::from_ymd_opt(year, month, day));
                    }
                }
                Some(weekday) => {
                    let matching: Vec<NaiveDate> = (1..=last_day)
                        .filter_map(|d| NaiveDate::from_ymd_opt(year, month, d))
                        .filter(|d| d.weekday() == weekday)
                        .collect();
                    match pattern.value {
                        0 => dates.extend(matching),
                        v if v > 0 => dates.extend(matching.get(v as usize - 1)),
                        v => {
                            let back = (-v) as usize;
                            if back <= matching.len() {
                                dates.push(matching[matching.len() - back]);
                            }
                        }
                    }
                }
            }
        }
        dates
    }
}

fn days_in_month(first: NaiveDate) -> u32 {
    first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .map(|last| last.day())
        .unwrap_or(31)
}

// ------------- Occurrences -------------
pub struct Occurrences<'s> {
    schedule: &'s Schedule,
    period: u64,
    buffer: VecDeque<NaiveDate>,
    emitted: usize,
    empty_periods: u32,
    done: bool,
}

impl Iterator for Occurrences<'_> {
    type Item = NaiveDate;
    fn next(&mut self) -> Option<NaiveDate> {
        loop {
            if self.done {
                return None;
            }
            if let Some(date) = self.buffer.pop_front() {
                if date < self.schedule.start {
                    continue;
                }
                let past_end = self.schedule.until.is_some_and(|u| date > u)
                    || self.schedule.count.is_some_and(|c| self.emitted >= c);
                if past_end {
                    self.done = true;
                    return None;
                }
                self.emitted += 1;
                return Some(date);
            }
            match self.schedule.period_dates(self.period) {
                None => self.done = true,
                Some(dates) => {
                    self.period += 1;
                    if dates.is_empty() {
                        self.empty_periods += 1;
                        if self.empty_periods > MAX_EMPTY_PERIODS {
                            self.done = true;
                        }
                    } else {
                        self.empty_periods = 0;
                        self.buffer.extend(dates);
                    }
                }
            }
        }
    }
}
