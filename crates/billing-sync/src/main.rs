mod bootstrap;

use anyhow::{bail, Result};
use billing_core::settings::Settings;
use billing_runtime::pipeline::{pull_and_update, SyncTrigger};
use clap::Parser;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let settings = Settings::parse();

    bootstrap::setup_logging(&settings.log_level, settings.log_format)?;

    tracing::info!("billing-sync v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Storage: {:?}, forecast: {}, horizon: {}, dry run: {}",
        settings.storage,
        settings.forecast_method,
        settings.horizon,
        settings.dry_run
    );

    let trigger = SyncTrigger {
        execution_date: settings.date,
    };
    let response = pull_and_update(&trigger, &settings).await;

    if !response.is_success() {
        bail!("sync failed ({}): {}", response.status, response.message);
    }
    tracing::info!("{} {}", response.status, response.message);
    Ok(())
}
