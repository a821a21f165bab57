//! Minimal Planhat REST client.
//!
//! Two calls: list companies (to learn which Org ID belongs to which
//! customer) and post dimension data points to the analytics endpoint.

use std::collections::HashMap;
use std::time::Duration;

use billing_core::error::{BillingError, Result};
use billing_core::models::CompanyMetrics;
use billing_core::settings::Settings;
use chrono::NaiveDate;
use reqwest::{Client, Response};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

pub const CUMULATIVE_DIMENSION: &str = "Cumulative Billable CPUs";
pub const FORECAST_DIMENSION: &str = "Forecasted Billable CPUs";
/// Planhat model the dimension data is attached to.
pub const DIMENSION_MODEL: &str = "Asset";
/// Custom field on a Planhat company holding the billing Org ID.
pub const ORG_ID_FIELD: &str = "Org ID";

const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Error bodies longer than this are truncated in logs and errors.
const MAX_ERROR_BODY: usize = 500;

// ── Wire types ────────────────────────────────────────────────────────────────

/// A company from the Planhat directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanhatCompany {
    /// Planhat `_id`.
    pub id: String,
    pub name: String,
    /// Value of the `Org ID` custom field, trimmed; `None` when absent or blank.
    pub org_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCompany {
    #[serde(rename = "_id")]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    custom: Option<HashMap<String, Value>>,
}

impl RawCompany {
    fn into_company(self) -> Option<PlanhatCompany> {
        let Some(id) = self.id else {
            warn!("Ignoring Planhat company without an _id");
            return None;
        };

        let org_id = self
            .custom
            .as_ref()
            .and_then(|custom| custom.get(ORG_ID_FIELD))
            .and_then(|value| match value {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty());

        Some(PlanhatCompany {
            name: self.name.unwrap_or_else(|| id.clone()),
            id,
            org_id,
        })
    }
}

/// One dimension data point as Planhat's analytics endpoint expects it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionPoint {
    pub dimension_id: String,
    pub value: f64,
    pub external_id: String,
    pub model: String,
    pub date: String,
}

/// The two data points uploaded per company, values rounded to two places.
pub fn dimension_points(org_id: &str, date: NaiveDate, metrics: &CompanyMetrics) -> Vec<DimensionPoint> {
    let rounded = metrics.rounded();
    let date = date.format("%Y-%m-%d").to_string();

    [
        (CUMULATIVE_DIMENSION, rounded.cumulative_cpus),
        (FORECAST_DIMENSION, rounded.forecasted_cpus),
    ]
    .into_iter()
    .map(|(dimension, value)| DimensionPoint {
        dimension_id: dimension.to_string(),
        value: value.to_f64().unwrap_or(0.0),
        external_id: org_id.to_string(),
        model: DIMENSION_MODEL.to_string(),
        date: date.clone(),
    })
    .collect()
}

// ── PlanhatClient ─────────────────────────────────────────────────────────────

/// Authenticated client for the Planhat REST and analytics APIs.
pub struct PlanhatClient {
    http: Client,
    api_base: String,
    analytics_base: String,
    api_token: String,
    tenant_token: String,
}

impl PlanhatClient {
    pub fn new(
        api_base: &str,
        analytics_base: &str,
        api_token: &str,
        tenant_token: &str,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(http_error)?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            analytics_base: analytics_base.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            tenant_token: tenant_token.to_string(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            &settings.api_base_url,
            &settings.analytics_base_url,
            settings.api_token()?,
            settings.tenant_token()?,
        )
    }

    /// Fetch a single batch of up to `limit` companies.
    pub async fn fetch_companies(&self, limit: u32) -> Result<Vec<PlanhatCompany>> {
        info!("Fetching a single batch of companies from Planhat...");

        let response = self
            .http
            .get(format!("{}/companies", self.api_base))
            .bearer_auth(&self.api_token)
            .query(&[("offset", 0), ("limit", limit)])
            .send()
            .await
            .map_err(http_error)?;
        let raw: Vec<RawCompany> = check_status(response)
            .await?
            .json()
            .await
            .map_err(http_error)?;

        let companies: Vec<PlanhatCompany> =
            raw.into_iter().filter_map(RawCompany::into_company).collect();
        info!("Successfully fetched {} companies.", companies.len());
        Ok(companies)
    }

    /// Upload cumulative and forecasted CPUs for one Org ID.
    pub async fn push_metrics(
        &self,
        org_id: &str,
        date: NaiveDate,
        metrics: &CompanyMetrics,
    ) -> Result<()> {
        let points = dimension_points(org_id, date, metrics);
        debug!(org_id, ?points, "posting dimension data");

        let response = self
            .http
            .post(format!(
                "{}/dimensiondata/{}",
                self.analytics_base, self.tenant_token
            ))
            .bearer_auth(&self.api_token)
            .json(&points)
            .send()
            .await
            .map_err(http_error)?;
        check_status(response).await?;
        Ok(())
    }
}

fn http_error(err: reqwest::Error) -> BillingError {
    BillingError::Http(err.to_string())
}

/// Turn a non-2xx response into [`BillingError::Api`].
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body: String = response
        .text()
        .await
        .unwrap_or_default()
        .chars()
        .take(MAX_ERROR_BODY)
        .collect();
    Err(BillingError::Api {
        status: status.as_u16(),
        body,
    })
}
