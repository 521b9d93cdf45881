//! Hard stop-loss. A breach closes the whole position, whatever the profit
//! ladder has fired so far.

use anchor_risk_core::{
    DecisionLog, DecisionRecord, EngineResult, ExecutionMode, Outcome, Position,
};
use rust_decimal::Decimal;
use tracing::warn;

use crate::context::EngineContext;
use crate::executor;
use crate::rules::loss_stop_threshold;
use crate::types::{CloseReason, StopAction};

pub const COMPONENT: &str = "loss_stop";

/// Stop action for `position` at leveraged `profit_rate`, if breached.
#[must_use]
pub fn check(position: &Position, profit_rate: Decimal) -> Option<StopAction> {
    if position.is_anchor {
        return None;
    }
    (profit_rate <= loss_stop_threshold(position.side)).then_some(StopAction::CloseAll {
        reason: CloseReason::LossStop,
    })
}

pub struct LossStopEngine {
    ctx: EngineContext,
}

impl LossStopEngine {
    #[must_use]
    pub const fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// # Errors
    ///
    /// Returns the order or store error if the close fails.
    pub async fn evaluate(&self, position: &Position, price: Decimal, mode: ExecutionMode) -> EngineResult<DecisionRecord> {
        let mut log = DecisionLog::new(COMPONENT, &position.instrument, Some(position.side), mode);
        let rate = position.profit_rate(price);
        let threshold = loss_stop_threshold(position.side);
        log.step(format!("profit_rate={} threshold={threshold}", rate.round_dp(4)));

        let Some(action) = check(position, rate) else {
            return Ok(log.finish("close_all", Outcome::NoAction, "within stop"));
        };
        let size = action.close_size(position.size);
        log.step(format!("breached: close {size}"));

        if !mode.is_live() {
            return Ok(log.finish("close_all", Outcome::Simulated, "stop loss"));
        }
        executor::close_position(&self.ctx, position, size, action.reason()).await?;
        warn!(
            instrument = %position.instrument,
            side = %position.side,
            profit_rate = %rate.round_dp(2),
            "Stop loss executed"
        );
        Ok(log.finish("close_all", Outcome::Executed, "stop loss"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use anchor_risk_core::{GranularityTier, Side};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn long_stops_at_minus_twenty() {
        let h = Harness::new();
        let pos = h
            .open("SOL-USDT-SWAP", Side::Long, dec!(100), dec!(100), dec!(10), GranularityTier::Medium)
            .await;
        let engine = LossStopEngine::new(h.ctx());

        // -1.9% x 10 = -19
        let held = engine.evaluate(&pos, dec!(98.1), ExecutionMode::Live).await.unwrap();
        assert_eq!(held.outcome, Outcome::NoAction);

        let stopped = engine.evaluate(&pos, dec!(98), ExecutionMode::Live).await.unwrap();
        assert_eq!(stopped.outcome, Outcome::Executed);
        assert_eq!(h.size_of("SOL-USDT-SWAP", Side::Long).await, None);
        assert_eq!(h.orders.exchange_size("SOL-USDT-SWAP", Side::Long), dec!(0));
    }

    #[tokio::test]
    async fn short_stops_at_minus_thirty() {
        let h = Harness::new();
        let pos = h
            .open("ADA-USDT-SWAP", Side::Short, dec!(100), dec!(1), dec!(10), GranularityTier::Small)
            .await;
        let engine = LossStopEngine::new(h.ctx());
        let held = engine.evaluate(&pos, dec!(1.029), ExecutionMode::DryRun).await.unwrap();
        assert_eq!(held.outcome, Outcome::NoAction);
        let stopped = engine.evaluate(&pos, dec!(1.03), ExecutionMode::DryRun).await.unwrap();
        assert_eq!(stopped.outcome, Outcome::Simulated);
        assert_eq!(h.size_of("ADA-USDT-SWAP", Side::Short).await, Some(dec!(100)));
    }

    #[test]
    fn anchors_are_not_stopped() {
        let pos = Position::open(
            "DOGE-USDT-SWAP",
            Side::Short,
            dec!(10),
            dec!(50000),
            dec!(10),
            anchor_risk_core::MarginMode::Cross,
            GranularityTier::Small,
        )
        .unwrap()
        .into_anchor();
        assert!(check(&pos, dec!(-40)).is_none());
    }
}
