//! The sync run: load exports → aggregate → fetch directory → upload.
//!
//! [`pull_and_update`] is the single entry point. It takes a trigger (the
//! local CLI builds one from `--date`, a cloud function would build one from
//! its request) and answers with an HTTP-style status.

use std::time::Duration;

use billing_core::error::{BillingError, Result};
use billing_core::forecast::ForecastContext;
use billing_core::groups::OrgGroups;
use billing_core::settings::Settings;
use billing_core::time_utils::data_date_for;
use billing_data::aggregator::MetricsAggregator;
use billing_data::loader::{load_usage, LoadPlan};
use billing_data::store::BillingStore;
use chrono::{NaiveDate, Utc};
use tracing::{error, info};

use crate::planhat::PlanhatClient;
use crate::uploader::{upload_metrics, UploadOptions, UploadReport};

// ── Trigger / response ────────────────────────────────────────────────────────

/// What started the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncTrigger {
    /// Day the job runs as; `None` means today in UTC.
    pub execution_date: Option<NaiveDate>,
}

impl SyncTrigger {
    pub fn for_date(execution_date: NaiveDate) -> Self {
        Self {
            execution_date: Some(execution_date),
        }
    }

    pub fn resolve_date(&self) -> NaiveDate {
        self.execution_date
            .unwrap_or_else(|| Utc::now().date_naive())
    }
}

/// Status handed back to whoever triggered the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResponse {
    pub status: u16,
    pub message: String,
}

impl SyncResponse {
    fn success() -> Self {
        Self {
            status: 200,
            message: "Success".to_string(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            status: 500,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub execution_date: NaiveDate,
    pub data_date: NaiveDate,
    pub files_read: usize,
    pub records: usize,
    pub rows_skipped: usize,
    /// Companies with metrics.
    pub companies: usize,
    pub upload: UploadReport,
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Run the whole job once.
///
/// Configuration, storage, parsing and directory failures abort with a 500.
/// Per-company upload failures do not: they are logged and the run still
/// reports success.
pub async fn pull_and_update(trigger: &SyncTrigger, settings: &Settings) -> SyncResponse {
    if let Err(e) = settings.validate() {
        error!("{}", e);
        return SyncResponse::failure("Env var configuration error");
    }

    let store = match BillingStore::from_settings(settings) {
        Ok(store) => store,
        Err(e) => {
            error!("Could not open billing storage: {}", e);
            return SyncResponse::failure(failure_message(&e));
        }
    };
    let client = match PlanhatClient::from_settings(settings) {
        Ok(client) => client,
        Err(e) => {
            error!("Could not build Planhat client: {}", e);
            return SyncResponse::failure(failure_message(&e));
        }
    };

    match run_sync(trigger, settings, &store, &client).await {
        Ok(report) => {
            info!(
                uploaded = report.upload.uploaded.len(),
                failed = report.upload.failed.len(),
                skipped = report.upload.skipped.len(),
                "Script completed successfully."
            );
            SyncResponse::success()
        }
        Err(e) => {
            error!("Sync run aborted: {}", e);
            SyncResponse::failure(failure_message(&e))
        }
    }
}

fn failure_message(err: &BillingError) -> &'static str {
    match err {
        BillingError::Config(_) => "Env var configuration error",
        BillingError::Storage(_)
        | BillingError::NoDataFiles { .. }
        | BillingError::CsvSchema { .. }
        | BillingError::Csv(_)
        | BillingError::Utf8 { .. }
        | BillingError::Io(_) => "CSV data not available",
        BillingError::Http(_) | BillingError::Api { .. } | BillingError::JsonParse(_) => {
            "Failed to fetch companies"
        }
        BillingError::Other(_) => "Sync failed",
    }
}

/// The linear pipeline against an explicit store and client.
pub async fn run_sync(
    trigger: &SyncTrigger,
    settings: &Settings,
    store: &BillingStore,
    client: &PlanhatClient,
) -> Result<RunReport> {
    let execution_date = trigger.resolve_date();
    let data_date = data_date_for(execution_date);
    let ctx = ForecastContext::new(settings.forecast_method, settings.horizon, data_date);
    let groups = OrgGroups::parse(&settings.org_groups);

    info!(
        "Execution date {}, reporting usage for {} (forecast: {}, horizon: {}, {} Org ID groups)",
        execution_date,
        data_date,
        settings.forecast_method,
        settings.horizon,
        groups.len()
    );

    let plan = LoadPlan::for_run(settings.forecast_method, execution_date);
    let loaded = load_usage(store, &plan).await?;
    let files_read = loaded.files.len();
    let rows_skipped = loaded.rows_skipped;
    let records = groups.canonicalize(loaded.records);

    let metrics = MetricsAggregator::aggregate(&records, &ctx);
    let (total_cumulative, total_forecast) = MetricsAggregator::calculate_totals(&metrics);
    info!(
        "Aggregated {} companies: {} cumulative CPUs, {} forecasted",
        metrics.len(),
        total_cumulative.round_dp(2),
        total_forecast.round_dp(2)
    );

    let companies = client.fetch_companies(settings.company_limit).await?;

    let options = UploadOptions {
        delay: Duration::from_millis(settings.upload_delay_ms),
        dry_run: settings.dry_run,
    };
    let upload = upload_metrics(client, &companies, &metrics, &groups, data_date, &options).await;

    if !upload.failed.is_empty() {
        error!(
            "{} of {} uploads failed",
            upload.failed.len(),
            upload.failed.len() + upload.uploaded.len()
        );
    }

    Ok(RunReport {
        execution_date,
        data_date,
        files_read,
        records: records.len(),
        rows_skipped,
        companies: metrics.len(),
        upload,
    })
}
