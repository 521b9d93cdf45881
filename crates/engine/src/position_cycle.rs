//! Per-position pass: stop loss, then profit tiers, then adds.
//!
//! All three policies see the same price read, and the first one that does
//! anything ends the pass for that position. A stopped-out position is never
//! also added to in the same cycle.

use anchor_risk_core::{
    DecisionLog, DecisionRecord, EngineResult, ExecutionMode, MarketConfig, Outcome, Position,
};
use tracing::warn;

use crate::add_policy::AddPositionPolicy;
use crate::context::EngineContext;
use crate::loss_stop::LossStopEngine;
use crate::profit_tiers::ProfitTierEngine;

pub const COMPONENT: &str = "position_cycle";

pub struct PositionCycle {
    ctx: EngineContext,
    loss_stop: LossStopEngine,
    profit_tiers: ProfitTierEngine,
    adds: AddPositionPolicy,
}

impl PositionCycle {
    #[must_use]
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            loss_stop: LossStopEngine::new(ctx.clone()),
            profit_tiers: ProfitTierEngine::new(ctx.clone()),
            adds: AddPositionPolicy::new(ctx.clone()),
            ctx,
        }
    }

    /// Runs the three policies on one position, stopping at the first that
    /// acts. Returns one record per policy evaluated.
    ///
    /// # Errors
    ///
    /// Returns the first policy error; later policies are not run.
    pub async fn evaluate(
        &self,
        config: &MarketConfig,
        position: &Position,
        mode: ExecutionMode,
    ) -> EngineResult<Vec<DecisionRecord>> {
        let price = self.ctx.prices.get_current_price(&position.instrument).await?;
        let mut records = Vec::with_capacity(3);

        let stop = self.loss_stop.evaluate(position, price, mode).await?;
        let acted = stop.outcome != Outcome::NoAction;
        records.push(stop);
        if acted {
            return Ok(records);
        }

        let tier = self.profit_tiers.evaluate(config, position, price, mode).await?;
        let acted = tier.outcome != Outcome::NoAction;
        records.push(tier);
        if acted {
            return Ok(records);
        }

        records.push(self.adds.evaluate(config, position, price, mode).await?);
        Ok(records)
    }

    /// One full pass over every open position.
    ///
    /// # Errors
    ///
    /// Returns an error when the config or the position list cannot be read.
    pub async fn run_cycle(&self, mode: ExecutionMode) -> EngineResult<Vec<DecisionRecord>> {
        let config = self.ctx.config.get_market_config().await?;
        let positions = self.ctx.store.get_open_positions().await?;
        let mut records = Vec::new();

        for position in positions {
            let batch = self.evaluate(&config, &position, mode).await.unwrap_or_else(|e| {
                warn!(instrument = %position.instrument, side = %position.side, error = %e, "Position pass failed");
                let mut log = DecisionLog::new(COMPONENT, &position.instrument, Some(position.side), mode);
                log.step(format!("error: {e}"));
                vec![log.finish("evaluate", Outcome::Failed, e.kind())]
            });
            for record in batch {
                self.ctx.journal(&record).await;
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use anchor_risk_core::{GranularityTier, PositionStore, Side};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn stopped_position_is_not_added_to() {
        let h = Harness::new();
        h.open("SOL-USDT-SWAP", Side::Long, dec!(100), dec!(100), dec!(10), GranularityTier::Large)
            .await;
        h.prices.set_price("SOL-USDT-SWAP", dec!(97));

        let records = PositionCycle::new(h.ctx()).run_cycle(ExecutionMode::Live).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].component, "loss_stop");
        assert_eq!(records[0].outcome, Outcome::Executed);
        assert_eq!(h.size_of("SOL-USDT-SWAP", Side::Long).await, None);
        assert!(h.store.get_add_records("SOL-USDT-SWAP", Side::Long).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn falls_through_to_add_when_nothing_else_fires() {
        let h = Harness::new();
        h.open("SOL-USDT-SWAP", Side::Long, dec!(100), dec!(100), dec!(10), GranularityTier::Small)
            .await;
        // -0.1% x 10 = -1: stage 0 of the small ladder
        h.prices.set_price("SOL-USDT-SWAP", dec!(99.9));

        let records = PositionCycle::new(h.ctx()).run_cycle(ExecutionMode::DryRun).await.unwrap();
        let components: Vec<&str> = records.iter().map(|r| r.component.as_str()).collect();
        assert_eq!(components, vec!["loss_stop", "profit_tiers", "add_policy"]);
        assert_eq!(records[2].outcome, Outcome::Simulated);
    }

    #[tokio::test]
    async fn missing_price_fails_only_that_position() {
        let h = Harness::new();
        h.open("SOL-USDT-SWAP", Side::Long, dec!(100), dec!(100), dec!(10), GranularityTier::Small)
            .await;
        h.open("ADA-USDT-SWAP", Side::Short, dec!(100), dec!(100), dec!(1), GranularityTier::Small)
            .await;
        h.prices.set_price("ADA-USDT-SWAP", dec!(85));

        let records = PositionCycle::new(h.ctx()).run_cycle(ExecutionMode::Live).await.unwrap();
        assert!(records
            .iter()
            .any(|r| r.instrument == "SOL-USDT-SWAP" && r.outcome == Outcome::Failed));
        assert_eq!(h.size_of("ADA-USDT-SWAP", Side::Short).await, Some(dec!(70)));
        assert!(!h.store.decisions().is_empty());
    }
}
