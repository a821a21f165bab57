use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Decimal places kept on values sent to the customer-success platform.
pub const METRIC_DECIMAL_PLACES: u32 = 2;

/// Normalise a company / organisation identifier: trimmed and lower-cased.
pub fn normalize_company_id(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// One parsed CSV row: a company's CPU usage for a single day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Normalised company identifier.
    pub company_id: String,
    /// Calendar day the usage belongs to.
    pub date: NaiveDate,
    /// Billable CPU units consumed on `date` (never negative).
    pub cpu_count: Decimal,
}

impl UsageRecord {
    /// Build a record, normalising `company_id`.
    pub fn new(company_id: &str, date: NaiveDate, cpu_count: Decimal) -> Self {
        Self {
            company_id: normalize_company_id(company_id),
            date,
            cpu_count,
        }
    }
}

/// Cumulative and forecasted CPU usage for one company in the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyMetrics {
    pub company_id: String,
    pub cumulative_cpus: Decimal,
    pub forecasted_cpus: Decimal,
}

impl CompanyMetrics {
    /// Copy with both values rounded to [`METRIC_DECIMAL_PLACES`].
    pub fn rounded(&self) -> Self {
        Self {
            company_id: self.company_id.clone(),
            cumulative_cpus: self.cumulative_cpus.round_dp(METRIC_DECIMAL_PLACES),
            forecasted_cpus: self.forecasted_cpus.round_dp(METRIC_DECIMAL_PLACES),
        }
    }
}

/// Company id → metrics, ordered by id.
pub type MetricsMap = BTreeMap<String, CompanyMetrics>;

/// How the forecasted value is derived from a company's daily usage.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ForecastMethod {
    /// Least-squares trend over daily totals, evaluated at the horizon.
    #[default]
    Trend,
    /// Month-to-date total divided by days elapsed, scaled to the full month.
    MonthEnd,
}

impl fmt::Display for ForecastMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForecastMethod::Trend => write!(f, "trend"),
            ForecastMethod::MonthEnd => write!(f, "month-end"),
        }
    }
}

/// The date a trend forecast is evaluated at.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Horizon {
    /// Last day of the billing period.
    #[default]
    PeriodEnd,
    /// The company's most recent observed day.
    LastObserved,
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Horizon::PeriodEnd => write!(f, "period-end"),
            Horizon::LastObserved => write!(f, "last-observed"),
        }
    }
}
