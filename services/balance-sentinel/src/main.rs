//! Balance Sentinel CLI
//!
//! Command-line interface for the adaptive billing balance watcher.

use std::path::PathBuf;

use balance_sentinel::{load_config, BalanceSentinelBuilder, Config};
use clap::Parser;
use tracing::Level;

#[derive(Parser)]
#[command(name = "balance-sentinel")]
#[command(about = "Adaptive billing balance watcher with webhook alerts")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API port (overrides config file)
    #[arg(long)]
    api_port: Option<u16>,

    /// Path of the JSON state file (overrides config file)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    tracing::debug!(
        "Parsed command line arguments: config={:?}, api_port={:?}, store={:?}, log_level={:?}",
        args.config,
        args.api_port,
        args.store,
        args.log_level
    );

    let mut config = if let Some(config_path) = &args.config {
        tracing::debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        Config::default()
    };

    if let Some(api_port) = args.api_port {
        config.api.port = api_port;
    }
    if let Some(store) = args.store {
        config.store.path = Some(store);
    }

    tracing::info!("Starting balance sentinel");
    tracing::debug!(
        "Billing page: {}, default interval: {} minutes",
        config.billing_page.url,
        config.scheduler.default_interval_minutes
    );

    BalanceSentinelBuilder::new(config).build().await?.start().await?;

    Ok(())
}
