//! Domain layer for the billing sync job.
//!
//! Holds the usage and metrics models, the shared error type, settings,
//! billing-period date helpers, forecasting and organisation-id grouping.

pub mod error;
pub mod forecast;
pub mod groups;
pub mod models;
pub mod settings;
pub mod time_utils;
