//! # Webhook Provider Entry Point

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use webhook_provider::{
    catalog::{CatalogClient, MemoryConnection, PublishedCatalog},
    config::{AppConfig, ConfigLoader},
    credentials,
    provider::{ProviderOptions, Schedule, WebhookProvider},
    scheduler::{IntervalSchedule, IntervalTaskRunner},
    server::{AppState, run_server},
    telemetry::{self, LogFormat},
};

#[derive(Parser)]
#[command(name = "webhook-provider")]
#[command(version)]
#[command(about = "Reconciles GitHub organization webhooks into the software catalog")]
#[command(after_long_help = r#"CONFIGURATION
    Settings come from layered .env files (.env, .env.local, .env.<profile>,
    .env.<profile>.local) and MOONLIGHT_* environment variables, e.g.
    MOONLIGHT_GITHUB_ORG, MOONLIGHT_GITHUB_TOKEN, MOONLIGHT_CATALOG_BASE_URL.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule the provider and serve the ops API (default)
    Serve,
    /// Run one reconciliation pass and print the resulting entities
    RunOnce,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    let log_format: LogFormat = config.log_format.parse().context("parsing log format")?;
    telemetry::init_tracing(&config.log_level, log_format).context("initializing telemetry")?;

    if let Ok(redacted_json) = config.redacted_json() {
        info!(profile = %config.profile, "Loaded configuration: {}", redacted_json);
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::RunOnce => run_once(config).await,
    }
}

fn catalog_client(config: &AppConfig) -> Result<Arc<CatalogClient>> {
    let base_url = config
        .catalog_base_url
        .clone()
        .context("MOONLIGHT_CATALOG_BASE_URL is required")?;
    Ok(Arc::new(CatalogClient::new(
        base_url,
        config.catalog_token.clone(),
    )))
}

async fn serve(config: AppConfig) -> Result<()> {
    let shutdown = CancellationToken::new();
    let runner = Arc::new(IntervalTaskRunner::new(
        IntervalSchedule::from(&config.provider),
        shutdown.clone(),
    ));

    // Catalog reads include the webhooks published by this process.
    let connection = Arc::new(MemoryConnection::new());
    let catalog = Arc::new(PublishedCatalog::new(
        catalog_client(&config)?,
        connection.clone(),
    ));
    let provider = WebhookProvider::create(
        ProviderOptions::from(&config),
        credentials::provider_from_config(&config),
        catalog,
        Schedule::from_mode(config.provider.schedule, runner.clone()),
    );
    provider
        .connect(connection.clone())
        .await
        .context("connecting provider")?;

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for shutdown signal");
            return;
        }
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    let state = AppState {
        config: Arc::new(config),
        provider,
        connection,
    };
    let served = run_server(state, shutdown.clone()).await;
    runner.shutdown().await;
    served.map_err(|err| anyhow::anyhow!("server error: {}", err))
}

async fn run_once(config: AppConfig) -> Result<()> {
    let provider = WebhookProvider::create(
        ProviderOptions::from(&config),
        credentials::provider_from_config(&config),
        catalog_client(&config)?,
        Schedule::Manual,
    );
    let connection = Arc::new(MemoryConnection::new());
    provider
        .connect(connection.clone())
        .await
        .context("connecting provider")?;
    provider.run().await.context("running provider")?;

    let entities = connection.entities().await;
    println!("{}", serde_json::to_string_pretty(&entities)?);
    Ok(())
}
