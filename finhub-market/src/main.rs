//! Market spoke binary.
//!
//! Wires the provider chain, the aggregator, and the market tools into a
//! spoke runtime registered against the hub.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use finhub_core::{AggregatorConfig, SpokeConfig};
use finhub_market::aggregator::DataAggregator;
use finhub_market::providers::build_providers;
use finhub_market::tools::register_market_tools;
use finhub_spoke::{Spoke, ToolRegistry};

#[derive(Parser, Debug)]
#[command(name = "finhub-market")]
#[command(about = "Fin-Hub market data spoke")]
struct Cli {
    /// Path to the spoke's TOML config.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the hub's registry address.
    #[arg(long)]
    hub_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MarketConfig {
    spoke: SpokeConfig,
    aggregator: AggregatorConfig,
}

async fn load_config(path: Option<&PathBuf>) -> Result<MarketConfig, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(MarketConfig::default());
    };
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(toml::from_str(&raw)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "finhub_market=info,finhub_spoke=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref()).await?;
    if let Some(hub_address) = cli.hub_address {
        config.spoke.hub_address = hub_address;
    }
    config
        .aggregator
        .apply_env_overrides(|key| std::env::var(key).ok());

    let providers = build_providers(&config.aggregator);
    let aggregator = Arc::new(DataAggregator::new(&config.aggregator, providers));

    let mut registry = ToolRegistry::new("market-spoke");
    register_market_tools(&mut registry, aggregator);

    let spoke = Spoke::new(config.spoke, registry)
        .with_tags(["market".to_string(), "finance".to_string()])
        .with_metadata("version", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    spoke.run(cancel).await?;
    Ok(())
}
