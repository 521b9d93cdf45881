use anchor_risk_core::{ConfigProvider, EngineError, EngineResult, MarketConfig};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;

use crate::codec::{decimal, flag, store_err};

/// Reads the single `market_config` row on every call.
#[derive(Clone)]
pub struct SqliteConfigProvider {
    pool: SqlitePool,
}

impl SqliteConfigProvider {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts or replaces the market config row.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the write fails.
    pub async fn save(&self, config: &MarketConfig) -> EngineResult<()> {
        sqlx::query(
            r"
            INSERT INTO market_config
                (id, allow_long, allow_short, allow_anchor, enabled, total_capital,
                 position_limit_percent, max_single_coin_percent, loss_threshold,
                 margin_min, margin_max, super_maintain_long, super_maintain_short, updated_at)
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT (id) DO UPDATE SET
                allow_long = excluded.allow_long,
                allow_short = excluded.allow_short,
                allow_anchor = excluded.allow_anchor,
                enabled = excluded.enabled,
                total_capital = excluded.total_capital,
                position_limit_percent = excluded.position_limit_percent,
                max_single_coin_percent = excluded.max_single_coin_percent,
                loss_threshold = excluded.loss_threshold,
                margin_min = excluded.margin_min,
                margin_max = excluded.margin_max,
                super_maintain_long = excluded.super_maintain_long,
                super_maintain_short = excluded.super_maintain_short,
                updated_at = excluded.updated_at
            ",
        )
        .bind(i64::from(config.allow_long))
        .bind(i64::from(config.allow_short))
        .bind(i64::from(config.allow_anchor))
        .bind(i64::from(config.enabled))
        .bind(config.total_capital.to_string())
        .bind(config.position_limit_percent.to_string())
        .bind(config.max_single_coin_percent.to_string())
        .bind(config.loss_threshold.to_string())
        .bind(config.margin_min.to_string())
        .bind(config.margin_max.to_string())
        .bind(i64::from(config.super_maintain_long))
        .bind(i64::from(config.super_maintain_short))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl ConfigProvider for SqliteConfigProvider {
    async fn get_market_config(&self) -> EngineResult<MarketConfig> {
        let row = sqlx::query("SELECT * FROM market_config WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::ConfigUnavailable(e.to_string()))?
            .ok_or_else(|| EngineError::ConfigUnavailable("market_config row missing".to_string()))?;

        let decode = |e: EngineError| EngineError::ConfigUnavailable(e.to_string());
        Ok(MarketConfig {
            allow_long: flag(&row, "allow_long").map_err(decode)?,
            allow_short: flag(&row, "allow_short").map_err(decode)?,
            allow_anchor: flag(&row, "allow_anchor").map_err(decode)?,
            enabled: flag(&row, "enabled").map_err(decode)?,
            total_capital: decimal(&row, "total_capital").map_err(decode)?,
            position_limit_percent: decimal(&row, "position_limit_percent").map_err(decode)?,
            max_single_coin_percent: decimal(&row, "max_single_coin_percent").map_err(decode)?,
            loss_threshold: decimal(&row, "loss_threshold").map_err(decode)?,
            margin_min: decimal(&row, "margin_min").map_err(decode)?,
            margin_max: decimal(&row, "margin_max").map_err(decode)?,
            super_maintain_long: flag(&row, "super_maintain_long").map_err(decode)?,
            super_maintain_short: flag(&row, "super_maintain_short").map_err(decode)?,
        })
    }
}
