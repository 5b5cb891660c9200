mod runner;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use bos_retest_engine::config::Config;
use bos_retest_engine::feed::ReplayFeed;

use crate::runner::Runner;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let path = cfg
        .candle_file
        .clone()
        .context("CANDLE_FILE must point at a JSON-lines candle file")?;
    let mut feed = ReplayFeed::load(&path).await?;
    if let (Some(first), Some(last)) = (feed.earliest_time(), feed.latest_time()) {
        info!("Replaying {} candles from {} to {}", feed.len(), first, last);
    }
    if let Some(start) = cfg.replay_start {
        feed.seek_past(start);
        info!("Resuming after {}: {} candles left", start, feed.remaining());
    }
    let shared_config = cfg.shared();

    let mut runner = Runner::new(shared_config, Box::new(feed)).await?;
    runner.run().await?;

    Ok(())
}
