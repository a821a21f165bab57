//! Data ingestion layer for the billing sync job.
//!
//! Lists and downloads billing exports from object storage, parses their CSV
//! rows into usage records and aggregates them into per-company metrics.

pub mod aggregator;
pub mod loader;
pub mod reader;
pub mod store;

pub use billing_core as core;
