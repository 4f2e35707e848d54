//! Portfolio spoke binary.

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use finhub_core::SpokeConfig;
use finhub_portfolio::tools::register_portfolio_tools;
use finhub_spoke::{Spoke, ToolRegistry};

#[derive(Parser, Debug)]
#[command(name = "finhub-portfolio")]
#[command(about = "Fin-Hub portfolio analysis spoke")]
struct Cli {
    /// Path to the spoke's TOML config.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the hub's registry address.
    #[arg(long)]
    hub_address: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "finhub_portfolio=info,finhub_spoke=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = SpokeConfig::load(cli.config.as_deref()).await?;
    if let Some(hub_address) = cli.hub_address {
        config.hub_address = hub_address;
    }

    let mut registry = ToolRegistry::new("portfolio-spoke");
    register_portfolio_tools(&mut registry);

    let spoke = Spoke::new(config, registry)
        .with_tags(["portfolio".to_string(), "finance".to_string()])
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
