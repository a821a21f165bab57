//! Runtime layer for the billing sync job.
//!
//! Talks to Planhat, uploads per-company metrics and runs the linear
//! load → aggregate → upload pipeline behind a single trigger entry point.

pub mod pipeline;
pub mod planhat;
pub mod uploader;

pub use billing_core as core;
pub use billing_data as data;
