//! CSV parsing for billing exports.
//!
//! Turns the text of one export into [`UsageRecord`]s. Column names are
//! matched loosely so the job keeps working across export format tweaks;
//! malformed rows are reported and skipped, never fatal.

use std::str::FromStr;

use billing_core::error::{BillingError, Result};
use billing_core::models::{normalize_company_id, UsageRecord};
use billing_core::time_utils::parse_date;
use chrono::NaiveDate;
use csv::StringRecord;
use rust_decimal::Decimal;
use tracing::{debug, warn};

const COMPANY_COLUMNS: &[&str] = &["company_id", "organizationid", "organization_id", "org_id"];
const DATE_COLUMNS: &[&str] = &["date", "usage_date"];
const CPU_COLUMNS: &[&str] = &["cpu_count", "total", "cpus", "billable_cpus"];

/// A row that was dropped during parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowIssue {
    /// 1-based line number in the file (the header is line 1).
    pub line: u64,
    pub reason: String,
}

/// Result of parsing one export.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub records: Vec<UsageRecord>,
    pub skipped: Vec<RowIssue>,
    /// Whether the file has a date column. Files without one are
    /// month-to-date snapshots and every record carries `default_date`.
    pub dated: bool,
}

/// Column positions resolved from the header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnLayout {
    company: usize,
    cpu: usize,
    date: Option<usize>,
}

impl ColumnLayout {
    fn from_headers(source: &str, headers: &StringRecord) -> Result<Self> {
        let names: Vec<String> = headers.iter().map(normalize_header).collect();
        let find = |aliases: &[&str]| names.iter().position(|n| aliases.contains(&n.as_str()));

        let company = find(COMPANY_COLUMNS).ok_or_else(|| BillingError::CsvSchema {
            file: source.to_string(),
            reason: format!("no company column (expected one of {:?})", COMPANY_COLUMNS),
        })?;
        let cpu = find(CPU_COLUMNS).ok_or_else(|| BillingError::CsvSchema {
            file: source.to_string(),
            reason: format!("no CPU column (expected one of {:?})", CPU_COLUMNS),
        })?;

        Ok(Self {
            company,
            cpu,
            date: find(DATE_COLUMNS),
        })
    }
}

/// `" Organization ID "` → `"organization_id"`.
fn normalize_header(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// Parse the text of one export.
///
/// * `source` – object name, used in errors and log lines.
/// * `default_date` – date given to rows when the file has no date column.
///
/// Fails only when the header lacks a company or CPU column.
pub fn parse_usage_csv(source: &str, content: &str, default_date: NaiveDate) -> Result<ParsedFile> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| BillingError::Csv(e.to_string()))?
        .clone();
    let layout = ColumnLayout::from_headers(source, &headers)?;

    let mut parsed = ParsedFile {
        dated: layout.date.is_some(),
        ..ParsedFile::default()
    };

    for (index, result) in reader.records().enumerate() {
        // Header is line 1, so the first data row is line 2.
        let fallback_line = index as u64 + 2;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                parsed.skipped.push(RowIssue {
                    line: fallback_line,
                    reason: format!("unreadable row: {}", e),
                });
                continue;
            }
        };
        let line = record
            .position()
            .map(|p| p.line())
            .unwrap_or(fallback_line);

        if record.iter().all(|field| field.is_empty()) {
            continue;
        }

        match parse_row(&record, &layout, default_date) {
            Ok(usage) => parsed.records.push(usage),
            Err(reason) => parsed.skipped.push(RowIssue { line, reason }),
        }
    }

    for issue in &parsed.skipped {
        warn!("Skipping row {} of {}: {}", issue.line, source, issue.reason);
    }
    debug!(
        "File {}: {} records, {} rows skipped",
        source,
        parsed.records.len(),
        parsed.skipped.len()
    );

    Ok(parsed)
}

fn parse_row(
    record: &StringRecord,
    layout: &ColumnLayout,
    default_date: NaiveDate,
) -> std::result::Result<UsageRecord, String> {
    let company = record.get(layout.company).unwrap_or_default();
    let company_id = normalize_company_id(company);
    if company_id.is_empty() {
        return Err("missing company id".to_string());
    }

    let raw_cpu = record.get(layout.cpu).unwrap_or_default();
    if raw_cpu.is_empty() {
        return Err(format!("missing CPU count for {}", company_id));
    }
    let cpu_count = parse_cpu_count(raw_cpu)
        .ok_or_else(|| format!("non-numeric CPU count {:?} for {}", raw_cpu, company_id))?;
    if cpu_count.is_sign_negative() && !cpu_count.is_zero() {
        return Err(format!("negative CPU count {} for {}", cpu_count, company_id));
    }

    let date = match layout.date {
        Some(idx) => {
            let raw_date = record.get(idx).unwrap_or_default();
            if raw_date.is_empty() {
                default_date
            } else {
                parse_date(raw_date)
                    .ok_or_else(|| format!("invalid date {:?} for {}", raw_date, company_id))?
            }
        }
        None => default_date,
    };

    Ok(UsageRecord {
        company_id,
        date,
        cpu_count,
    })
}

/// Plain decimals plus scientific notation (`1.5e3`).
fn parse_cpu_count(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}
