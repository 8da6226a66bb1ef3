//! gridlink agent entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Demo auto-aggregator for the energy-market simulation.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via GRIDLINK_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = gridlink_agent::AppConfig::load(args.config.as_deref())?;
    gridlink_telemetry::init_logging(&config.logging)?;

    info!("Starting gridlink agent v{}", env!("CARGO_PKG_VERSION"));
    info!(
        redis = %config.redis.url,
        aggregator = %config.aggregator.name,
        devices = config.devices.len(),
        "Configuration loaded"
    );

    let app = gridlink_agent::Application::new(config);
    app.run().await?;

    info!("Agent stopped");
    Ok(())
}
