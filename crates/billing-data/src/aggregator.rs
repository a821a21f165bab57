//! Per-company aggregation of usage records.

use std::collections::BTreeMap;

use billing_core::forecast::{ForecastContext, UsageForecaster};
use billing_core::models::{CompanyMetrics, MetricsMap, UsageRecord};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::warn;

// ── CompanyUsage ──────────────────────────────────────────────────────────────

/// Running totals for one company.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompanyUsage {
    /// Exact sum of every record's CPU count.
    pub cumulative: Decimal,
    /// Per-day totals; several rows for the same day are summed.
    pub daily: BTreeMap<NaiveDate, Decimal>,
    pub count: u32,
}

impl CompanyUsage {
    /// Add a single record's count to the running totals.
    ///
    /// Returns `false`, leaving the totals untouched, when the record would
    /// overflow them.
    pub fn add_record(&mut self, record: &UsageRecord) -> bool {
        let day_total = self.daily.get(&record.date).copied().unwrap_or(Decimal::ZERO);
        let (Some(cumulative), Some(day_total)) = (
            self.cumulative.checked_add(record.cpu_count),
            day_total.checked_add(record.cpu_count),
        ) else {
            return false;
        };

        self.cumulative = cumulative;
        self.daily.insert(record.date, day_total);
        self.count += 1;
        true
    }
}

// ── MetricsAggregator ─────────────────────────────────────────────────────────

/// Stateless helper that folds usage records into per-company metrics.
pub struct MetricsAggregator;

impl MetricsAggregator {
    /// Group `records` by company id. Input order does not matter.
    ///
    /// A record that would overflow its company's totals is skipped with a
    /// warning.
    pub fn group_by_company(records: &[UsageRecord]) -> BTreeMap<String, CompanyUsage> {
        let mut map: BTreeMap<String, CompanyUsage> = BTreeMap::new();
        for record in records {
            let usage = map.entry(record.company_id.clone()).or_default();
            if !usage.add_record(record) {
                warn!(
                    "Skipping {} CPUs for {} on {}: total would overflow",
                    record.cpu_count, record.company_id, record.date
                );
            }
        }
        map
    }

    /// One [`CompanyMetrics`] per distinct company present in `records`.
    ///
    /// `cumulative_cpus` is the exact sum of the company's counts;
    /// `forecasted_cpus` comes from [`UsageForecaster::forecast`] over the
    /// company's daily totals. Companies without records never appear.
    pub fn aggregate(records: &[UsageRecord], ctx: &ForecastContext) -> MetricsMap {
        Self::group_by_company(records)
            .into_iter()
            .map(|(company_id, usage)| {
                let metrics = CompanyMetrics {
                    company_id: company_id.clone(),
                    cumulative_cpus: usage.cumulative,
                    forecasted_cpus: UsageForecaster::forecast(&usage.daily, ctx),
                };
                (company_id, metrics)
            })
            .collect()
    }

    /// Sum of cumulative and forecasted CPUs over every company.
    pub fn calculate_totals(metrics: &MetricsMap) -> (Decimal, Decimal) {
        metrics.values().fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(cumulative, forecast), m| {
                (
                    cumulative.saturating_add(m.cumulative_cpus),
                    forecast.saturating_add(m.forecasted_cpus),
                )
            },
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
