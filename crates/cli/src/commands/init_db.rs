//! Database initialization command.
//!
//! Applies migrations and writes the market config row the policies read
//! every cycle. Running it again overwrites the row.

use anchor_risk_core::{ConfigLoader, MarketConfig};
use anyhow::Result;
use clap::Args;
use rust_decimal::Decimal;
use tracing::info;

use super::engine::open_database;

/// Arguments for the init-db command.
#[derive(Args, Debug, Clone)]
pub struct InitDbArgs {
    /// Config file path
    #[arg(short, long, default_value = "config/Engine.toml")]
    pub config: String,

    /// Total account capital in USDT
    #[arg(long)]
    pub total_capital: Option<Decimal>,

    /// Enable the long-friendly profit ladders
    #[arg(long)]
    pub allow_long: bool,

    /// Disable automatic anchor opens
    #[arg(long)]
    pub no_anchor: bool,

    /// Allow super maintenance actions on shorts
    #[arg(long)]
    pub super_short: bool,

    /// Allow super maintenance actions on longs
    #[arg(long)]
    pub super_long: bool,
}

impl InitDbArgs {
    fn market_config(&self) -> MarketConfig {
        let defaults = MarketConfig::default();
        MarketConfig {
            allow_long: self.allow_long,
            allow_anchor: !self.no_anchor,
            total_capital: self.total_capital.unwrap_or(defaults.total_capital),
            super_maintain_long: self.super_long,
            super_maintain_short: self.super_short,
            ..defaults
        }
    }
}

/// Runs the init-db command.
///
/// # Errors
/// Returns an error if the database cannot be opened or written.
pub async fn run_init_db(args: InitDbArgs) -> Result<()> {
    let config = ConfigLoader::load_from(&args.config)?;
    let db = open_database(&config).await?;

    let market = args.market_config();
    db.config_provider().save(&market).await?;
    info!(
        url = %config.database.url,
        total_capital = %market.total_capital,
        allow_long = market.allow_long,
        allow_anchor = market.allow_anchor,
        "Market config written"
    );
    Ok(())
}
