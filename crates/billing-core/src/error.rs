use thiserror::Error;

/// All errors produced by the billing sync job.
#[derive(Error, Debug)]
pub enum BillingError {
    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The object store rejected a request (credentials, bucket, listing, download).
    #[error("Storage error: {0}")]
    Storage(String),

    /// No billing export matched the requested date window.
    #[error("No billing exports found between {start} and {end}")]
    NoDataFiles {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    /// A CSV file lacks a column the parser cannot do without.
    #[error("Unusable CSV header in {file}: {reason}")]
    CsvSchema { file: String, reason: String },

    /// The CSV reader failed on a whole file.
    #[error("Failed to read CSV: {0}")]
    Csv(String),

    /// A downloaded object is not valid UTF-8.
    #[error("Object {file} is not valid UTF-8")]
    Utf8 { file: String },

    /// Transport-level HTTP failure (connect, timeout, decode).
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The remote API answered with a non-success status.
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Pass-through for any raw I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias used throughout the billing crates.
pub type Result<T> = std::result::Result<T, BillingError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_error_display_config() {
        let err = BillingError::Config("missing PLANHAT_API_TOKEN".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: missing PLANHAT_API_TOKEN"
        );
    }

    #[test]
    fn test_error_display_no_data_files() {
        let err = BillingError::NoDataFiles {
            start: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "No billing exports found between 2024-03-02 and 2024-03-09"
        );
    }

    #[test]
    fn test_error_display_csv_schema() {
        let err = BillingError::CsvSchema {
            file: "billing-2024-03-09.csv".to_string(),
            reason: "no company column".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("billing-2024-03-09.csv"));
        assert!(msg.contains("no company column"));
    }

    #[test]
    fn test_error_display_api() {
        let err = BillingError::Api {
            status: 401,
            body: "unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "API returned 401: unauthorized");
    }

    #[test]
    fn test_error_display_storage() {
        let err = BillingError::Storage("bucket not found".to_string());
        assert_eq!(err.to_string(), "Storage error: bucket not found");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid}").unwrap_err();
        let err: BillingError = json_err.into();
        assert!(err.to_string().contains("Failed to parse JSON"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: BillingError = io_err.into();
        assert!(err.to_string().contains("denied"));
    }
}
