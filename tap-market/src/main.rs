//! TAP Market - Theme analysis service for the Korean exchange.
//!
//! Serves ranked themes, theme instruments, instrument details and news
//! over HTTP, and refreshes the rankings on a cron schedule.

use anyhow::Result;
use tap_common::config::Config;
use tap_common::logging::init_from_config;
use tap_market::TapService;

#[tokio::main]
async fn main() -> Result<()> {
    // Start timing immediately for cold-start measurement
    let startup_start = std::time::Instant::now();

    // Load configuration (file, then environment overrides)
    let config = Config::load_and_validate()?;

    init_from_config(&config.observability);

    tracing::info!("TAP Market v{}", env!("CARGO_PKG_VERSION"));

    let service = TapService::new(config)?;

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    service.start().await
}
