//! Object-store access for billing exports.
//!
//! Wraps an [`ObjectStore`] (Google Cloud Storage in production, a local
//! directory or in-memory store for development and tests) and exposes the
//! two operations the job needs: list the dated CSV exports inside a window
//! and download one as text.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use billing_core::error::{BillingError, Result};
use billing_core::settings::{Settings, StorageKind};
use billing_core::time_utils::extract_export_date;
use chrono::NaiveDate;
use futures::StreamExt;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tracing::{debug, info};

/// One dated CSV export found in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportObject {
    pub location: ObjectPath,
    /// Date embedded in the object name.
    pub export_date: NaiveDate,
    pub size: u64,
}

impl fmt::Display for ExportObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.location)
    }
}

/// Billing export storage.
pub struct BillingStore {
    store: Arc<dyn ObjectStore>,
    /// Human-readable origin, used in log lines.
    label: String,
}

impl BillingStore {
    /// Build the store selected by `settings.storage`.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        match settings.storage {
            StorageKind::Gcs => Self::gcs(settings.bucket()?, settings.service_account_json()?),
            StorageKind::Local => {
                let root = settings.local_root.as_deref().ok_or_else(|| {
                    BillingError::Config("--local-root is required for local storage".to_string())
                })?;
                Self::local(root)
            }
        }
    }

    /// Google Cloud Storage bucket authenticated with a service-account key.
    pub fn gcs(bucket: &str, service_account_json: &str) -> Result<Self> {
        let key: serde_json::Value = serde_json::from_str(service_account_json).map_err(|e| {
            BillingError::Config(format!("service account key is not valid JSON: {}", e))
        })?;
        if !key.is_object() {
            return Err(BillingError::Config(
                "service account key must be a JSON object".to_string(),
            ));
        }

        let store = GoogleCloudStorageBuilder::new()
            .with_bucket_name(bucket)
            .with_service_account_key(service_account_json)
            .build()
            .map_err(storage_error)?;

        Ok(Self::with_store(Arc::new(store), format!("gs://{}", bucket)))
    }

    /// A local directory laid out like the bucket.
    pub fn local(root: &Path) -> Result<Self> {
        let store = LocalFileSystem::new_with_prefix(root).map_err(storage_error)?;
        Ok(Self::with_store(
            Arc::new(store),
            format!("file://{}", root.display()),
        ))
    }

    /// Wrap an already-built store.
    pub fn with_store(store: Arc<dyn ObjectStore>, label: impl Into<String>) -> Self {
        Self {
            store,
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// List CSV exports whose embedded date lies in `[start, end]`.
    ///
    /// Sorted by (export date, path). Any listing error is returned as is:
    /// bad credentials and missing buckets surface here.
    pub async fn list_exports(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<ExportObject>> {
        info!(
            "Accessing {} for exports dated {} to {}",
            self.label, start, end
        );

        let mut exports = Vec::new();
        let mut listed = 0usize;
        let mut stream = self.store.list(None);

        while let Some(result) = stream.next().await {
            let meta = result.map_err(storage_error)?;
            listed += 1;

            let name = meta.location.as_ref();
            if !name.to_ascii_lowercase().ends_with(".csv") {
                continue;
            }
            let Some(export_date) = extract_export_date(name) else {
                debug!("Skipping {}: no date in object name", name);
                continue;
            };
            if export_date < start || export_date > end {
                continue;
            }

            exports.push(ExportObject {
                location: meta.location.clone(),
                export_date,
                size: meta.size as u64,
            });
        }

        exports.sort_by(|a, b| {
            a.export_date
                .cmp(&b.export_date)
                .then_with(|| a.location.as_ref().cmp(b.location.as_ref()))
        });

        debug!(
            "Listed {} objects in {}, {} exports in window",
            listed,
            self.label,
            exports.len()
        );
        Ok(exports)
    }

    /// Download an export as UTF-8 text, without a leading byte-order mark.
    pub async fn fetch_text(&self, export: &ExportObject) -> Result<String> {
        let bytes = self
            .store
            .get(&export.location)
            .await
            .map_err(storage_error)?
            .bytes()
            .await
            .map_err(storage_error)?;
        let text = String::from_utf8(bytes.to_vec()).map_err(|_| BillingError::Utf8 {
            file: export.location.to_string(),
        })?;

        match text.strip_prefix('\u{feff}') {
            Some(stripped) => Ok(stripped.to_string()),
            None => Ok(text),
        }
    }
}

fn storage_error(err: object_store::Error) -> BillingError {
    BillingError::Storage(err.to_string())
}
