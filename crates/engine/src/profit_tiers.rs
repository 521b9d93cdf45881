//! Take-profit ladder.
//!
//! The active ladder depends on the position's side and the `allow_long`
//! regime flag, re-read every cycle. Each threshold fires at most once per
//! position: it is claimed in the shared [`TriggerState`] before the close
//! goes out, so a restart or a second process never fires it again.

use anchor_risk_core::{
    retry_on_contention, DecisionLog, DecisionRecord, EngineResult, ExecutionMode, MarketConfig,
    Outcome, Position, TriggerState,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::error;

use crate::context::EngineContext;
use crate::executor;
use crate::rules::{profit_ladder, ProfitTier, TierEffect, MIN_MARGIN};
use crate::types::{CloseReason, StopAction};

pub const COMPONENT: &str = "profit_tiers";

/// Lowest threshold that is met and has not fired yet.
#[must_use]
pub fn next_tier(position: &Position, allow_long: bool, profit_rate: Decimal, state: &TriggerState) -> Option<ProfitTier> {
    profit_ladder(position.side, allow_long)
        .iter()
        .take_while(|t| t.threshold <= profit_rate)
        .find(|t| !state.has_fired(t.threshold))
        .copied()
}

/// Close the tier's effect calls for on `position`.
#[must_use]
pub fn tier_action(tier: &ProfitTier, position: &Position) -> StopAction {
    let reason = CloseReason::ProfitTier {
        threshold: tier.threshold,
    };
    match tier.effect {
        TierEffect::CloseAll => StopAction::CloseAll { reason },
        TierEffect::ClosePercentOfRemaining(pct) => StopAction::ClosePartial {
            size: position.size * pct / dec!(100),
            reason,
        },
        TierEffect::CloseToResidualMargin(margin) => {
            let keep = margin * position.leverage;
            StopAction::ClosePartial {
                size: (position.size - keep).max(Decimal::ZERO),
                reason,
            }
        }
    }
}

pub struct ProfitTierEngine {
    ctx: EngineContext,
}

impl ProfitTierEngine {
    #[must_use]
    pub const fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Fires at most one tier for `position` at `price`.
    ///
    /// # Errors
    ///
    /// Store and order failures. A lost claim race is retried.
    pub async fn evaluate(
        &self,
        config: &MarketConfig,
        position: &Position,
        price: Decimal,
        mode: ExecutionMode,
    ) -> EngineResult<DecisionRecord> {
        let mut log = DecisionLog::new(COMPONENT, &position.instrument, Some(position.side), mode);

        if position.is_anchor {
            log.step("anchor positions are handled by protect orders");
            return Ok(log.finish("take_profit", Outcome::NoAction, "anchor"));
        }
        let margin = position.margin();
        if margin <= MIN_MARGIN {
            log.step(format!("margin {margin} <= floor {MIN_MARGIN}"));
            return Ok(log.finish("take_profit", Outcome::NoAction, "below margin floor"));
        }

        let rate = position.profit_rate(price);
        let state = self
            .ctx
            .store
            .get_trigger_state(&position.instrument, position.side)
            .await?;
        log.step(format!(
            "profit_rate={} allow_long={} fired={:?}",
            rate.round_dp(4),
            config.allow_long,
            state.triggered_levels
        ));

        let Some(tier) = next_tier(position, config.allow_long, rate, &state) else {
            return Ok(log.finish("take_profit", Outcome::NoAction, "no unfired tier met"));
        };
        let action = tier_action(&tier, position);
        let size = action.close_size(position.size);
        log.step(format!("tier {}% fires: close {size} of {}", tier.threshold, position.size));

        if !mode.is_live() {
            return Ok(log.finish("take_profit", Outcome::Simulated, format!("tier {}", tier.threshold)));
        }

        if !self.claim(position, tier.threshold).await? {
            log.step("tier already claimed by another writer");
            return Ok(log.finish("take_profit", Outcome::NoAction, "already fired"));
        }
        log.step(format!("claimed tier {}", tier.threshold));

        if size <= Decimal::ZERO {
            return Ok(log.finish("take_profit", Outcome::Executed, "nothing left above residual"));
        }

        if let Err(e) = executor::close_position(&self.ctx, position, size, action.reason()).await {
            if let Err(release) = self.release(position, tier.threshold).await {
                error!(
                    instrument = %position.instrument,
                    side = %position.side,
                    threshold = %tier.threshold,
                    error = %release,
                    "Failed to release profit tier claim"
                );
            }
            return Err(e);
        }
        Ok(log.finish("take_profit", Outcome::Executed, format!("tier {}", tier.threshold)))
    }

    /// Records `threshold` as fired. Returns false if it already was.
    async fn claim(&self, position: &Position, threshold: Decimal) -> EngineResult<bool> {
        let store = &self.ctx.store;
        retry_on_contention(self.ctx.retry, "trigger_state", || async move {
            let mut state = store.get_trigger_state(&position.instrument, position.side).await?;
            if !state.triggered_levels.insert(threshold) {
                return Ok(false);
            }
            store.set_trigger_state(&state).await?;
            Ok(true)
        })
        .await
    }

    async fn release(&self, position: &Position, threshold: Decimal) -> EngineResult<()> {
        let store = &self.ctx.store;
        retry_on_contention(self.ctx.retry, "trigger_state", || async move {
            let mut state = store.get_trigger_state(&position.instrument, position.side).await?;
            if state.triggered_levels.remove(&threshold) {
                store.set_trigger_state(&state).await?;
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use anchor_risk_core::{GranularityTier, MarginMode, PositionStore, Side};

    fn short(size: Decimal, leverage: Decimal) -> Position {
        Position::open(
            "ADA-USDT-SWAP",
            Side::Short,
            size,
            dec!(100),
            leverage,
            MarginMode::Cross,
            GranularityTier::Small,
        )
        .unwrap()
    }

    #[test]
    fn lowest_unfired_met_tier_only() {
        let pos = short(dec!(100), dec!(1));
        let mut state = TriggerState::empty("ADA-USDT-SWAP", Side::Short);

        // 35% profit meets 10, 20, 30 but only 10 fires
        let tier = next_tier(&pos, false, dec!(35), &state).unwrap();
        assert_eq!(tier.threshold, dec!(10));

        state.triggered_levels.insert(dec!(10));
        assert_eq!(next_tier(&pos, false, dec!(35), &state).unwrap().threshold, dec!(20));

        state.triggered_levels.insert(dec!(20));
        state.triggered_levels.insert(dec!(30));
        assert!(next_tier(&pos, false, dec!(35), &state).is_none());
    }

    #[test]
    fn regime_flag_switches_ladder() {
        let pos = short(dec!(100), dec!(1));
        let state = TriggerState::empty("ADA-USDT-SWAP", Side::Short);
        assert!(next_tier(&pos, true, dec!(15), &state).is_none());
        assert_eq!(next_tier(&pos, true, dec!(26), &state).unwrap().threshold, dec!(25));
    }

    #[test]
    fn residual_tier_closes_down_to_margin() {
        let pos = short(dec!(60), dec!(10));
        let tier = profit_ladder(Side::Short, false)[4];
        // keep 2 margin x 10 = 20 notional
        assert_eq!(tier_action(&tier, &pos).close_size(pos.size), dec!(40));

        // The residual is margin, so it scales with leverage
        let one_x = short(dec!(60), dec!(1));
        assert_eq!(tier_action(&tier, &one_x).close_size(one_x.size), dec!(58));
    }

    #[tokio::test]
    async fn fires_ten_percent_tier_for_short_at_85() {
        let h = Harness::new();
        let pos = h
            .open("ADA-USDT-SWAP", Side::Short, dec!(100), dec!(100), dec!(1), GranularityTier::Small)
            .await;
        let engine = ProfitTierEngine::new(h.ctx());
        let config = MarketConfig::default();

        let record = engine.evaluate(&config, &pos, dec!(85), ExecutionMode::Live).await.unwrap();
        assert_eq!(record.outcome, Outcome::Executed);
        assert_eq!(record.reason, "tier 10");
        assert_eq!(h.size_of("ADA-USDT-SWAP", Side::Short).await, Some(dec!(70)));

        let state = h.store.get_trigger_state("ADA-USDT-SWAP", Side::Short).await.unwrap();
        assert!(state.has_fired(dec!(10)));
    }

    #[tokio::test]
    async fn rerun_with_same_inputs_fires_nothing_new() {
        let h = Harness::new();
        let pos = h
            .open("ADA-USDT-SWAP", Side::Short, dec!(100), dec!(100), dec!(1), GranularityTier::Small)
            .await;
        let engine = ProfitTierEngine::new(h.ctx());
        let config = MarketConfig::default();

        // Price only reaches the first tier
        engine.evaluate(&config, &pos, dec!(88), ExecutionMode::Live).await.unwrap();
        let current = h.store.get_position("ADA-USDT-SWAP", Side::Short).await.unwrap().unwrap();
        let again = engine.evaluate(&config, &current, dec!(88), ExecutionMode::Live).await.unwrap();
        assert_eq!(again.outcome, Outcome::NoAction);
        assert_eq!(h.size_of("ADA-USDT-SWAP", Side::Short).await, Some(dec!(70)));
    }

    #[tokio::test]
    async fn failed_close_releases_the_claim() {
        let h = Harness::new();
        let pos = h
            .open("ADA-USDT-SWAP", Side::Short, dec!(100), dec!(100), dec!(1), GranularityTier::Small)
            .await;
        h.orders.reject_next(1);
        let engine = ProfitTierEngine::new(h.ctx());

        let failed = engine
            .evaluate(&MarketConfig::default(), &pos, dec!(85), ExecutionMode::Live)
            .await;
        assert!(failed.is_err());
        let state = h.store.get_trigger_state("ADA-USDT-SWAP", Side::Short).await.unwrap();
        assert!(!state.has_fired(dec!(10)));

        let retried = engine
            .evaluate(&MarketConfig::default(), &pos, dec!(85), ExecutionMode::Live)
            .await
            .unwrap();
        assert_eq!(retried.outcome, Outcome::Executed);
    }

    #[tokio::test]
    async fn skips_small_margins_and_anchors() {
        let h = Harness::new();
        let engine = ProfitTierEngine::new(h.ctx());
        let config = MarketConfig::default();

        let tiny = short(dec!(10), dec!(10));
        let record = engine.evaluate(&config, &tiny, dec!(50), ExecutionMode::DryRun).await.unwrap();
        assert_eq!(record.outcome, Outcome::NoAction);

        let anchor = short(dec!(100), dec!(1)).into_anchor();
        let record = engine.evaluate(&config, &anchor, dec!(50), ExecutionMode::DryRun).await.unwrap();
        assert_eq!(record.outcome, Outcome::NoAction);
    }
}
