//! Cross-side hedge rule.
//!
//! With both sides of an instrument open, a losing side facing a profitable
//! one is cut: fully, or down to the anchor floor when the losing side is an
//! anchor.

use std::collections::BTreeMap;

use anchor_risk_core::{
    DecisionLog, DecisionRecord, EngineResult, ExecutionMode, Outcome, Position, Side,
};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::context::EngineContext;
use crate::executor;
use crate::rules::{ANCHOR_HEDGE_FLOOR_MARGIN, MIN_MARGIN};
use crate::types::{CloseReason, StopAction};

pub const COMPONENT: &str = "hedge_close";

/// The losing side and what to close on it, if the rule applies.
#[must_use]
pub fn check(long: &Position, short: &Position, price: Decimal) -> Option<(Side, StopAction)> {
    let long_rate = long.profit_rate(price);
    let short_rate = short.profit_rate(price);

    let (winner, loser) = if long_rate > Decimal::ZERO && short_rate < Decimal::ZERO {
        (long, short)
    } else if short_rate > Decimal::ZERO && long_rate < Decimal::ZERO {
        (short, long)
    } else {
        return None;
    };
    if loser.margin() <= MIN_MARGIN {
        return None;
    }

    let reason = CloseReason::Hedge {
        profitable_side: winner.side,
    };
    if loser.is_anchor {
        let keep = ANCHOR_HEDGE_FLOOR_MARGIN * loser.leverage;
        let size = loser.size - keep;
        return (size > Decimal::ZERO).then_some((loser.side, StopAction::ClosePartial { size, reason }));
    }
    Some((loser.side, StopAction::CloseAll { reason }))
}

pub struct HedgeCloseEngine {
    ctx: EngineContext,
}

impl HedgeCloseEngine {
    #[must_use]
    pub const fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// # Errors
    ///
    /// Returns the order or store error if the close fails.
    pub async fn evaluate(
        &self,
        long: &Position,
        short: &Position,
        price: Decimal,
        mode: ExecutionMode,
    ) -> EngineResult<DecisionRecord> {
        let mut log = DecisionLog::new(COMPONENT, &long.instrument, None, mode);
        log.step(format!(
            "price={price} long: rate={} margin={} short: rate={} margin={}",
            long.profit_rate(price).round_dp(4),
            long.margin(),
            short.profit_rate(price).round_dp(4),
            short.margin()
        ));

        let Some((losing, action)) = check(long, short, price) else {
            return Ok(log.finish("hedge_close", Outcome::NoAction, "no profitable/losing pair"));
        };
        let loser = match losing {
            Side::Long => long,
            Side::Short => short,
        };
        let size = action.close_size(loser.size);
        log.step(format!("close {size} of losing {losing} side (anchor={})", loser.is_anchor));

        if !mode.is_live() {
            return Ok(log.finish("hedge_close", Outcome::Simulated, format!("close {losing}")));
        }
        let remaining = executor::close_position(&self.ctx, loser, size, action.reason()).await?;
        info!(
            instrument = %loser.instrument,
            side = %losing,
            closed = %size,
            residual = %remaining.map_or(Decimal::ZERO, |p| p.size),
            "Hedge close executed"
        );
        Ok(log.finish("hedge_close", Outcome::Executed, format!("close {losing}")))
    }

    /// Evaluates every instrument with both sides open.
    ///
    /// # Errors
    ///
    /// Returns an error when the position list cannot be read.
    pub async fn run_cycle(&self, mode: ExecutionMode) -> EngineResult<Vec<DecisionRecord>> {
        let mut pairs: BTreeMap<String, (Option<Position>, Option<Position>)> = BTreeMap::new();
        for position in self.ctx.store.get_open_positions().await? {
            let slot = pairs.entry(position.instrument.clone()).or_default();
            match position.side {
                Side::Long => slot.0 = Some(position),
                Side::Short => slot.1 = Some(position),
            }
        }

        let mut records = Vec::new();
        for (instrument, pair) in pairs {
            let (Some(long), Some(short)) = pair else {
                continue;
            };
            let result = match self.ctx.prices.get_current_price(&instrument).await {
                Ok(price) => self.evaluate(&long, &short, price, mode).await,
                Err(e) => Err(e),
            };
            let record = result.unwrap_or_else(|e| {
                warn!(instrument, error = %e, "Hedge evaluation failed");
                let mut log = DecisionLog::new(COMPONENT, &instrument, None, mode);
                log.step(format!("error: {e}"));
                log.finish("hedge_close", Outcome::Failed, e.kind())
            });
            self.ctx.journal(&record).await;
            records.push(record);
        }
        Ok(records)
    }
}
