//! Export discovery + parsing for one run.
//!
//! Exports come in two shapes. Files with a date column list usage per day
//! and are taken as is. Files without one (`OrganizationID,Total`) are
//! month-to-date snapshots: each holds the running total up to the day
//! before its export date, so consecutive snapshots are differenced into
//! daily usage.

use std::collections::BTreeMap;

use billing_core::error::{BillingError, Result};
use billing_core::models::{ForecastMethod, UsageRecord};
use billing_core::time_utils::{data_date_for, BillingPeriod};
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info, warn};

use crate::reader::parse_usage_csv;
use crate::store::BillingStore;

/// Which exports to read and which usage days to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadPlan {
    /// Inclusive range of export dates (the date in the object name).
    pub export_start: NaiveDate,
    pub export_end: NaiveDate,
    /// Inclusive range of usage dates kept after parsing.
    pub usage_start: NaiveDate,
    pub usage_end: NaiveDate,
}

impl LoadPlan {
    /// Plan for a run executing on `execution_date`.
    ///
    /// An export named with day N holds day N-1's usage. Trend forecasts need
    /// every export of the billing period; month-end forecasts read only the
    /// month-to-date snapshot exported on the execution date.
    pub fn for_run(method: ForecastMethod, execution_date: NaiveDate) -> Self {
        let data_date = data_date_for(execution_date);
        let period = BillingPeriod::containing(data_date);

        let export_start = match method {
            ForecastMethod::Trend => period.start.succ_opt().unwrap_or(period.start),
            ForecastMethod::MonthEnd => execution_date,
        };

        Self {
            export_start,
            export_end: execution_date,
            usage_start: period.start,
            usage_end: data_date,
        }
    }

    fn keeps(&self, date: NaiveDate) -> bool {
        date >= self.usage_start && date <= self.usage_end
    }
}

/// Everything read for one run.
#[derive(Debug, Clone, Default)]
pub struct LoadedUsage {
    pub records: Vec<UsageRecord>,
    /// Object names that were parsed, in read order.
    pub files: Vec<String>,
    pub rows_skipped: usize,
    /// Well-formed records dropped for falling outside the usage range.
    pub out_of_range: usize,
}

/// List, download and parse every export the plan covers.
///
/// Storage errors, undecodable files and files without the required columns
/// abort the load. Finding no export at all is an error too.
pub async fn load_usage(store: &BillingStore, plan: &LoadPlan) -> Result<LoadedUsage> {
    let exports = store
        .list_exports(plan.export_start, plan.export_end)
        .await?;
    if exports.is_empty() {
        return Err(BillingError::NoDataFiles {
            start: plan.export_start,
            end: plan.export_end,
        });
    }

    let mut loaded = LoadedUsage::default();
    let mut snapshots: BTreeMap<NaiveDate, Snapshot> = BTreeMap::new();

    for export in &exports {
        info!("Found file: {}", export);
        let content = store.fetch_text(export).await?;
        let default_date = export.export_date.pred_opt().unwrap_or(export.export_date);
        let parsed = parse_usage_csv(export.location.as_ref(), &content, default_date)?;
        loaded.rows_skipped += parsed.skipped.len();

        if !parsed.dated {
            if plan.keeps(default_date) {
                let snapshot = snapshots.entry(default_date).or_default();
                for record in parsed.records {
                    if !add_to_snapshot(snapshot, &record) {
                        warn!(
                            "Skipping {} CPUs for {} in {}: total would overflow",
                            record.cpu_count, record.company_id, export
                        );
                        loaded.rows_skipped += 1;
                    }
                }
            } else {
                debug!(
                    "Dropping snapshot {} for {}: outside {}..={}",
                    export, default_date, plan.usage_start, plan.usage_end
                );
                loaded.out_of_range += parsed.records.len();
            }
            loaded.files.push(export.location.to_string());
            continue;
        }

        for record in parsed.records {
            if plan.keeps(record.date) {
                loaded.records.push(record);
            } else {
                debug!(
                    "Dropping {} usage dated {} from {}: outside {}..={}",
                    record.company_id, record.date, export, plan.usage_start, plan.usage_end
                );
                loaded.out_of_range += 1;
            }
        }
        loaded.files.push(export.location.to_string());
    }

    if !snapshots.is_empty() {
        debug!("Differencing {} month-to-date snapshots", snapshots.len());
        loaded
            .records
            .extend(snapshot_records(&snapshots, plan.usage_start));
    }

    info!(
        "Loaded {} records from {} files ({} rows skipped, {} out of range)",
        loaded.records.len(),
        loaded.files.len(),
        loaded.rows_skipped,
        loaded.out_of_range
    );
    Ok(loaded)
}

// ── Month-to-date snapshots ───────────────────────────────────────────────────

/// Decimal places kept when a snapshot delta is split across several days.
const SPREAD_DECIMAL_PLACES: u32 = 6;

/// Month-to-date CPUs per company, as of one usage day.
pub type Snapshot = BTreeMap<String, Decimal>;

fn add_to_snapshot(snapshot: &mut Snapshot, record: &UsageRecord) -> bool {
    let total = snapshot.entry(record.company_id.clone()).or_default();
    match total.checked_add(record.cpu_count) {
        Some(sum) => {
            *total = sum;
            true
        }
        None => false,
    }
}

/// Turn month-to-date snapshots into daily usage records.
///
/// Each company's growth since the previous snapshot is spread evenly over
/// the days that snapshot did not cover yet, starting at `usage_start` for
/// the first one. The records of a company therefore sum to its highest
/// snapshot. A snapshot lower than an earlier one is logged and ignored.
pub fn snapshot_records(
    snapshots: &BTreeMap<NaiveDate, Snapshot>,
    usage_start: NaiveDate,
) -> Vec<UsageRecord> {
    let mut records = Vec::new();
    let mut seen: BTreeMap<&str, Decimal> = BTreeMap::new();
    let mut first_uncovered = usage_start;

    for (&day, snapshot) in snapshots {
        for (company, &total) in snapshot {
            let previous = seen.get(company.as_str()).copied().unwrap_or(Decimal::ZERO);
            if total < previous {
                warn!(
                    "Month-to-date usage of {} fell from {} to {} on {}; ignoring the drop",
                    company, previous, total, day
                );
                continue;
            }
            records.extend(spread(company, total - previous, first_uncovered, day));
            seen.insert(company, total);
        }
        first_uncovered = day.succ_opt().unwrap_or(day);
    }

    records
}

/// Split `amount` over `first..=last`; the last day takes the rounding
/// remainder so the records sum to `amount` exactly.
fn spread(company: &str, amount: Decimal, first: NaiveDate, last: NaiveDate) -> Vec<UsageRecord> {
    let days: Vec<NaiveDate> = first.iter_days().take_while(|day| *day <= last).collect();
    let Some((&final_day, earlier)) = days.split_last() else {
        return vec![UsageRecord::new(company, last, amount)];
    };

    let share = (amount / Decimal::from(days.len()))
        .round_dp_with_strategy(SPREAD_DECIMAL_PLACES, RoundingStrategy::ToZero);
    let mut remaining = amount;
    let mut records = Vec::with_capacity(days.len());
    for &day in earlier {
        records.push(UsageRecord::new(company, day, share));
        remaining -= share;
    }
    records.push(UsageRecord::new(company, final_day, remaining));
    records
}
