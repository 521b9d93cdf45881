//! Engine commands: the long-running loops and one-shot scans.
//!
//! Both run against the `SQLite` store and the paper exchange. The paper
//! book is seeded from the store at startup so the reconciler starts in sync.

use std::path::Path;
use std::sync::Arc;

use anchor_risk_core::{
    ConfigLoader, EngineConfig, ExchangePosition, ExecutionMode, PositionStore, RetryPolicy,
};
use anchor_risk_data::Database;
use anchor_risk_engine::{Component, EngineContext, PaperOrderExecutor, StaticPriceFeed};
use anyhow::{Context, Result};
use clap::Args;
use tokio::sync::watch;
use tracing::{info, warn};

/// Arguments shared by commands that only need the config file.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Engine.toml")]
    pub config: String,
}

/// Arguments for the scan command.
#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// Component to run once (e.g. "position_cycle", "reconciler")
    pub component: Component,

    /// Place orders and write the store instead of simulating
    #[arg(long)]
    pub live: bool,

    /// Config file path
    #[arg(short, long, default_value = "config/Engine.toml")]
    pub config: String,
}

/// Creates the directory holding a file-backed `SQLite` database.
pub(crate) fn ensure_database_dir(url: &str) -> Result<()> {
    let Some(file_path) = url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    if let Some(parent) = Path::new(file_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create database directory {}", parent.display()))?;
        }
    }
    Ok(())
}

pub(crate) async fn open_database(config: &EngineConfig) -> Result<Database> {
    ensure_database_dir(&config.database.url)?;
    Database::connect(&config.database.url, config.database.max_connections).await
}

async fn build_context(config: &EngineConfig) -> Result<(Database, EngineContext)> {
    let db = open_database(config).await?;
    let store = Arc::new(db.position_store());

    let orders = Arc::new(PaperOrderExecutor::default());
    let open = store.get_open_positions().await?;
    for position in &open {
        orders.seed_position(ExchangePosition {
            instrument: position.instrument.clone(),
            side: position.side,
            size: position.size,
            margin_mode: position.margin_mode,
            leverage: position.leverage,
        });
    }
    info!(positions = open.len(), "Paper exchange seeded from store");

    let ctx = EngineContext::new(
        Arc::new(db.config_provider()),
        Arc::new(StaticPriceFeed::from_simulation(&config.simulation)),
        orders,
        store,
    )
    .with_retry(RetryPolicy::from(&config.retry));
    Ok((db, ctx))
}

/// Runs every loop until Ctrl+C.
///
/// # Errors
/// Returns an error if the config or database cannot be opened, or a loop
/// task panics.
pub async fn run_engine(args: ConfigArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.config)?;
    info!(config = %args.config, mode = %config.mode, "Starting anchor risk engine");
    let (_db, ctx) = build_context(&config).await?;

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
        }
        // Receivers also stop once the sender is dropped.
        let _ = tx.send(true);
    });

    anchor_risk_engine::run(ctx, &config, rx).await
}

/// Runs one cycle of a component and prints the decisions as JSON.
///
/// # Errors
/// Returns an error if the cycle is skipped (e.g. missing market config).
pub async fn run_scan(args: ScanArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.config)?;
    let mode = if args.live {
        ExecutionMode::Live
    } else {
        ExecutionMode::DryRun
    };
    let (_db, ctx) = build_context(&config).await?;

    let records = anchor_risk_engine::run_once(args.component, ctx, &config, mode).await?;
    info!(component = %args.component, %mode, decisions = records.len(), "Scan complete");
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

/// Prints the merged engine configuration as JSON.
///
/// # Errors
/// Returns an error if the config cannot be parsed.
pub fn show_config(args: &ConfigArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.config)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
