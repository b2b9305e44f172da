//! HF Propagation Monitor - Main Entry Point

use api::{init_logging, run, Settings};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    init_logging(settings.logging.format)?;

    info!("=== HF Propagation Monitor v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        station = %settings.feeds.station_code,
        interval_secs = settings.scheduler.interval_secs,
        data_dir = %settings.storage.data_dir.display(),
        "Starting propagation monitor"
    );

    run(settings).await
}
