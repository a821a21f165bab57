use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, ValueEnum};

use crate::error::{BillingError, Result};
use crate::models::{ForecastMethod, Horizon};

pub const DEFAULT_API_BASE_URL: &str = "https://api.planhat.com";
pub const DEFAULT_ANALYTICS_BASE_URL: &str = "https://analytics.planhat.com";

pub const ENV_BUCKET: &str = "BILLING_BUCKET_NAME";
pub const ENV_SERVICE_ACCOUNT: &str = "GCP_SERVICE_ACCOUNT_JSON";
pub const ENV_API_TOKEN: &str = "PLANHAT_API_TOKEN";
pub const ENV_TENANT_TOKEN: &str = "PLANHAT_TENANT_TOKEN";

// ── Enums ─────────────────────────────────────────────────────────────────────

/// Where the billing exports are read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum StorageKind {
    /// Google Cloud Storage bucket.
    #[default]
    Gcs,
    /// A local directory laid out like the bucket.
    Local,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Gcs => write!(f, "gcs"),
            StorageKind::Local => write!(f, "local"),
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

// ── Settings (CLI + environment) ──────────────────────────────────────────────

/// Push daily CPU billing metrics from cloud storage to Planhat
#[derive(Parser, Debug, Clone)]
#[command(
    name = "billing-sync",
    about = "Push daily CPU billing metrics from cloud storage to Planhat",
    version
)]
pub struct Settings {
    /// Bucket holding the daily billing CSV exports
    #[arg(long, env = ENV_BUCKET)]
    pub bucket: Option<String>,

    /// Service-account key (JSON document) used to read the bucket
    #[arg(long, env = ENV_SERVICE_ACCOUNT, hide_env_values = true)]
    pub service_account_json: Option<String>,

    /// Planhat API token
    #[arg(long, env = ENV_API_TOKEN, hide_env_values = true)]
    pub api_token: Option<String>,

    /// Planhat tenant token scoping analytics uploads
    #[arg(long, env = ENV_TENANT_TOKEN, hide_env_values = true)]
    pub tenant_token: Option<String>,

    /// Storage backend
    #[arg(long, value_enum, default_value_t = StorageKind::Gcs)]
    pub storage: StorageKind,

    /// Root directory used with `--storage local`
    #[arg(long)]
    pub local_root: Option<PathBuf>,

    /// Execution date (YYYY-MM-DD); defaults to today in UTC
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// Forecast method
    #[arg(long, value_enum, default_value_t = ForecastMethod::Trend)]
    pub forecast_method: ForecastMethod,

    /// Date a trend forecast is evaluated at
    #[arg(long, value_enum, default_value_t = Horizon::PeriodEnd)]
    pub horizon: Horizon,

    /// Comma-separated Org IDs billed as one customer (repeatable)
    #[arg(long = "org-group", value_name = "IDS")]
    pub org_groups: Vec<String>,

    /// Maximum number of Planhat companies fetched
    #[arg(long, default_value = "500")]
    pub company_limit: u32,

    /// Pause between per-company uploads, in milliseconds
    #[arg(long, default_value = "1000")]
    pub upload_delay_ms: u64,

    /// Planhat REST API base URL
    #[arg(long, env = "PLANHAT_API_URL", default_value = DEFAULT_API_BASE_URL)]
    pub api_base_url: String,

    /// Planhat analytics base URL
    #[arg(long, env = "PLANHAT_ANALYTICS_URL", default_value = DEFAULT_ANALYTICS_BASE_URL)]
    pub analytics_base_url: String,

    /// Compute and log metrics without uploading them
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Settings {
    /// Check that every value the run needs is present.
    ///
    /// All missing values are reported together so one failed run is enough
    /// to fix the deployment.
    pub fn validate(&self) -> Result<()> {
        let mut missing: Vec<&str> = Vec::new();

        match self.storage {
            StorageKind::Gcs => {
                if is_blank(&self.bucket) {
                    missing.push(ENV_BUCKET);
                }
                if is_blank(&self.service_account_json) {
                    missing.push(ENV_SERVICE_ACCOUNT);
                }
            }
            StorageKind::Local => {
                if self.local_root.is_none() {
                    missing.push("--local-root");
                }
            }
        }
        if is_blank(&self.api_token) {
            missing.push(ENV_API_TOKEN);
        }
        if is_blank(&self.tenant_token) {
            missing.push(ENV_TENANT_TOKEN);
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(BillingError::Config(format!(
                "missing required values: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn bucket(&self) -> Result<&str> {
        required(&self.bucket, ENV_BUCKET)
    }

    pub fn service_account_json(&self) -> Result<&str> {
        required(&self.service_account_json, ENV_SERVICE_ACCOUNT)
    }

    pub fn api_token(&self) -> Result<&str> {
        required(&self.api_token, ENV_API_TOKEN)
    }

    pub fn tenant_token(&self) -> Result<&str> {
        required(&self.tenant_token, ENV_TENANT_TOKEN)
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(BillingError::Config(format!("{} is not set", name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Settings {
        let mut args = vec!["billing-sync"];
        args.extend_from_slice(extra);
        Settings::try_parse_from(args).expect("args should parse")
    }

    fn complete() -> Settings {
        parse(&[
            "--bucket",
            "billing-exports",
            "--service-account-json",
            "{}",
            "--api-token",
            "tok",
            "--tenant-token",
            "tenant",
        ])
    }

    #[test]
    fn test_defaults() {
        let s = complete();
        assert_eq!(s.storage, StorageKind::Gcs);
        assert_eq!(s.forecast_method, ForecastMethod::Trend);
        assert_eq!(s.horizon, Horizon::PeriodEnd);
        assert_eq!(s.company_limit, 500);
        assert_eq!(s.upload_delay_ms, 1000);
        assert_eq!(s.log_level, "INFO");
        assert_eq!(s.log_format, LogFormat::Text);
        assert!(!s.dry_run);
        assert!(s.org_groups.is_empty());
    }

    #[test]
    fn test_complete_settings_validate() {
        let s = complete();
        assert!(s.validate().is_ok());
        assert_eq!(s.bucket().unwrap(), "billing-exports");
        assert_eq!(s.tenant_token().unwrap(), "tenant");
    }

    #[test]
    fn test_validate_reports_every_missing_value() {
        let mut s = complete();
        s.bucket = None;
        s.api_token = Some("   ".to_string());
        s.tenant_token = None;

        let msg = s.validate().unwrap_err().to_string();
        assert!(msg.contains(ENV_BUCKET));
        assert!(msg.contains(ENV_API_TOKEN));
        assert!(msg.contains(ENV_TENANT_TOKEN));
        assert!(!msg.contains(ENV_SERVICE_ACCOUNT));
    }

    #[test]
    fn test_local_storage_needs_root_not_bucket() {
        let mut s = complete();
        s.storage = StorageKind::Local;
        s.bucket = None;
        s.service_account_json = None;
        let msg = s.validate().unwrap_err().to_string();
        assert!(msg.contains("--local-root"));

        s.local_root = Some(PathBuf::from("/tmp/exports"));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_parse_full_command_line() {
        let s = parse(&[
            "--storage",
            "local",
            "--local-root",
            "/data",
            "--date",
            "2024-03-10",
            "--forecast-method",
            "month-end",
            "--horizon",
            "last-observed",
            "--org-group",
            "a,b",
            "--org-group",
            "c,d",
            "--upload-delay-ms",
            "0",
            "--dry-run",
            "--log-level",
            "DEBUG",
            "--log-format",
            "json",
        ]);
        assert_eq!(s.storage, StorageKind::Local);
        assert_eq!(s.date, NaiveDate::from_ymd_opt(2024, 3, 10));
        assert_eq!(s.forecast_method, ForecastMethod::MonthEnd);
        assert_eq!(s.horizon, Horizon::LastObserved);
        assert_eq!(s.org_groups, vec!["a,b".to_string(), "c,d".to_string()]);
        assert_eq!(s.upload_delay_ms, 0);
        assert!(s.dry_run);
        assert_eq!(s.log_format, LogFormat::Json);
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let result = Settings::try_parse_from(["billing-sync", "--log-level", "TRACE"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_bad_date() {
        let result = Settings::try_parse_from(["billing-sync", "--date", "10/03/2024"]);
        assert!(result.is_err());
    }
}
