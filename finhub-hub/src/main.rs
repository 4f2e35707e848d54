//! Hub binary.
//!
//! Runs the three hub-side subsystems together: the registry HTTP API
//! (for spoke registration and heartbeats), the health sweeper, and the
//! MCP frontend on stdio. Shutdown order on EOF: frontend first, then
//! the sweeper, then the registry server.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use finhub_core::HubConfig;
use finhub_hub::HubFrontend;
use finhub_registry::{HealthMonitor, HttpHealthProbe, ServiceRegistry};
use finhub_router::{HttpSpokeInvoker, ToolRouter};

#[derive(Parser, Debug)]
#[command(name = "finhub-hub")]
#[command(about = "Fin-Hub hub: MCP frontend, service registry, tool router")]
struct Cli {
    /// Path to the hub's TOML config.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the registry API bind address.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries the JSON-RPC stream.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "finhub_hub=info,finhub_registry=info,finhub_router=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = HubConfig::load(cli.config.as_deref()).await?;
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }
    if config.bind_address.is_empty() {
        config.bind_address = "127.0.0.1:9100".to_string();
    }

    let registry = Arc::new(ServiceRegistry::new(config.registry.clone()));
    let router = Arc::new(ToolRouter::new(
        Arc::clone(&registry),
        Arc::new(HttpSpokeInvoker::new()),
        config.router.clone(),
    ));

    // Registry removals evict breaker state and permit pools.
    let mut removals = registry.subscribe_removals();
    let eviction_router = Arc::clone(&router);
    tokio::spawn(async move {
        while let Ok(instance_id) = removals.recv().await {
            eviction_router.evict_instance(&instance_id);
        }
    });

    // Registry HTTP API for the spokes.
    let api = finhub_registry::api::router(Arc::clone(&registry));
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "registry API listening");
    let api_task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, api).await {
            tracing::error!(error = %err, "registry API server failed");
        }
    });

    // Background health sweeper.
    let sweeper_cancel = CancellationToken::new();
    let sweeper = HealthMonitor::new(
        Arc::clone(&registry),
        Arc::new(HttpHealthProbe::new()),
        config.registry.clone(),
    )
    .spawn(sweeper_cancel.clone());

    // MCP frontend on stdio; EOF triggers the shutdown sequence.
    let frontend = Arc::new(HubFrontend::new(
        Arc::clone(&registry),
        router,
        config,
    ));
    let serve_result = finhub_hub::serve_stdio(frontend).await;

    sweeper_cancel.cancel();
    let _ = sweeper.await;
    api_task.abort();
    let _ = api_task.await;
    serve_result?;

    Ok(())
}
