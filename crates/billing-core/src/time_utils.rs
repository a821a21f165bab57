use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

// ── Calendar helpers ──────────────────────────────────────────────────────────

/// Number of days in the given month (28–31).
///
/// Returns 30 for an out-of-range month rather than failing.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(30)
}

/// The day whose usage a run reports on: the day before `execution_date`.
pub fn data_date_for(execution_date: NaiveDate) -> NaiveDate {
    execution_date.pred_opt().unwrap_or(execution_date)
}

// ── BillingPeriod ─────────────────────────────────────────────────────────────

/// A calendar-month billing period, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BillingPeriod {
    /// The calendar month containing `date`.
    pub fn containing(date: NaiveDate) -> Self {
        let start = date.with_day(1).unwrap_or(date);
        let last_day = days_in_month(date.year(), date.month());
        let end = date.with_day(last_day).unwrap_or(date);
        Self { start, end }
    }

    /// Total number of days in the period.
    pub fn days(&self) -> u32 {
        (self.end - self.start).num_days() as u32 + 1
    }

    /// Whether `date` falls inside the period.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

// ── Date parsing ──────────────────────────────────────────────────────────────

/// Parse a date cell from a billing CSV.
///
/// Accepts ISO dates, slash-separated dates (`2024/03/09`, `03/09/2024`),
/// compact `20240309` and timestamps whose first ten characters are an ISO
/// date. Returns `None` for anything else.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    const FMTS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%Y%m%d"];
    for fmt in FMTS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }

    // "2024-03-09T00:00:00Z", "2024-03-09 12:00:00"
    s.get(..10)
        .filter(|_| s.len() > 10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

fn embedded_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})-(\d{2})-(\d{2})").expect("regex is valid"))
}

/// Extract the export date embedded in an object name such as
/// `exports/billing_2024-03-09.csv`.
///
/// When several dates appear the last valid one wins, so a dated folder
/// prefix does not shadow the file's own date.
pub fn extract_export_date(name: &str) -> Option<NaiveDate> {
    embedded_date_regex()
        .captures_iter(name)
        .filter_map(|caps| {
            let year = caps[1].parse().ok()?;
            let month = caps[2].parse().ok()?;
            let day = caps[3].parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        })
        .last()
}
