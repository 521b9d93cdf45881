//! DCA adds.
//!
//! A position consumes its tier's ladder strictly in order: the next stage is
//! the number of add records already written, and it fires only once the
//! leveraged loss reaches that stage's threshold. Anchors get a single large
//! add followed by an immediate partial close.

use anchor_risk_core::{
    DecisionLog, DecisionRecord, EngineError, EngineResult, ExecutionMode, MarketConfig, Outcome,
    Position,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{info, warn};

use crate::context::EngineContext;
use crate::executor;
use crate::rules::{
    add_ladder, ANCHOR_ADD_MULTIPLIER, ANCHOR_ADD_TRIGGER, ANCHOR_MIN_RESIDUAL_MARGIN,
    ANCHOR_POST_ADD_CLOSE_PERCENT,
};
use crate::types::CloseReason;

pub const COMPONENT: &str = "add_policy";

/// Notional already deployed, used for the capital checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Exposure {
    pub instrument: Decimal,
    pub total: Decimal,
}

impl Exposure {
    #[must_use]
    pub fn of(positions: &[Position], instrument: &str) -> Self {
        positions.iter().fold(Self::default(), |mut acc, p| {
            acc.total += p.size;
            if p.instrument == instrument {
                acc.instrument += p.size;
            }
            acc
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddPlan {
    pub stage_index: u32,
    pub trigger_loss_rate: Decimal,
    pub size: Decimal,
    /// Anchors only: notional closed straight after the add fills.
    pub post_add_close: Option<Decimal>,
}

/// Post-add close for an anchor holding `total` notional at `leverage`.
#[must_use]
pub fn anchor_post_add_close(total: Decimal, leverage: Decimal) -> Decimal {
    let by_percent = total * ANCHOR_POST_ADD_CLOSE_PERCENT / dec!(100);
    let keep = ANCHOR_MIN_RESIDUAL_MARGIN * leverage;
    by_percent.min(total - keep).max(Decimal::ZERO)
}

/// Works out the next add for `position`, if any.
///
/// `Ok(None)` means the next stage's threshold is not met yet.
///
/// # Errors
///
/// [`EngineError::StageExhausted`] once the ladder is used up, and
/// [`EngineError::InsufficientCapital`] when the add would break the
/// per-instrument cap or the capital budget.
pub fn plan_add(
    position: &Position,
    stages_consumed: usize,
    profit_rate: Decimal,
    config: &MarketConfig,
    exposure: Exposure,
) -> EngineResult<Option<AddPlan>> {
    let (trigger, size, ladder_len) = if position.is_anchor {
        (ANCHOR_ADD_TRIGGER, position.opened_size * ANCHOR_ADD_MULTIPLIER, 1)
    } else {
        let ladder = add_ladder(position.granularity_tier);
        match ladder.get(stages_consumed) {
            Some(stage) => (
                stage.trigger_loss_rate,
                config.available_capital() * stage.percent_of_budget / dec!(100),
                ladder.len(),
            ),
            None => (Decimal::ZERO, Decimal::ZERO, ladder.len()),
        }
    };

    if stages_consumed >= ladder_len {
        return Err(EngineError::StageExhausted {
            instrument: position.instrument.clone(),
            side: position.side,
            stages: ladder_len,
        });
    }
    if profit_rate > trigger {
        return Ok(None);
    }

    let cap = config.single_coin_cap();
    if exposure.instrument + size > cap {
        return Err(EngineError::InsufficientCapital {
            instrument: position.instrument.clone(),
            required: size,
            available: (cap - exposure.instrument).max(Decimal::ZERO),
        });
    }
    let budget = config.available_capital();
    if exposure.total + size > budget {
        return Err(EngineError::InsufficientCapital {
            instrument: position.instrument.clone(),
            required: size,
            available: (budget - exposure.total).max(Decimal::ZERO),
        });
    }

    let post_add_close = position
        .is_anchor
        .then(|| anchor_post_add_close(position.size + size, position.leverage));

    Ok(Some(AddPlan {
        stage_index: u32::try_from(stages_consumed).unwrap_or(u32::MAX),
        trigger_loss_rate: trigger,
        size,
        post_add_close,
    }))
}

pub struct AddPositionPolicy {
    ctx: EngineContext,
}

impl AddPositionPolicy {
    #[must_use]
    pub const fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Evaluates one position at `price`.
    ///
    /// # Errors
    ///
    /// Store and order failures. Ladder exhaustion and capital refusals are
    /// reported as [`Outcome::Refused`] records instead.
    pub async fn evaluate(
        &self,
        config: &MarketConfig,
        position: &Position,
        price: Decimal,
        mode: ExecutionMode,
    ) -> EngineResult<DecisionRecord> {
        let mut log = DecisionLog::new(COMPONENT, &position.instrument, Some(position.side), mode);

        if !config.enabled {
            log.step("engine disabled");
            return Ok(log.finish("add", Outcome::NoAction, "disabled"));
        }

        let records = self
            .ctx
            .store
            .get_add_records(&position.instrument, position.side)
            .await?;
        let positions = self.ctx.store.get_open_positions().await?;
        let exposure = Exposure::of(&positions, &position.instrument);
        let rate = position.profit_rate(price);
        log.step(format!(
            "profit_rate={} stages_consumed={} tier={} anchor={}",
            rate.round_dp(4),
            records.len(),
            position.granularity_tier,
            position.is_anchor
        ));

        let plan = match plan_add(position, records.len(), rate, config, exposure) {
            Ok(Some(plan)) => plan,
            Ok(None) => return Ok(log.finish("add", Outcome::NoAction, "next stage not reached")),
            Err(e @ (EngineError::StageExhausted { .. } | EngineError::InsufficientCapital { .. })) => {
                log.step(e.to_string());
                return Ok(log.finish("add", Outcome::Refused, e.kind()));
            }
            Err(e) => return Err(e),
        };
        log.step(format!(
            "stage {} at {}% fires: add {}",
            plan.stage_index, plan.trigger_loss_rate, plan.size
        ));
        if let Some(close) = plan.post_add_close {
            log.step(format!("then close {close} of {}", position.size + plan.size));
        }

        if !mode.is_live() {
            return Ok(log.finish("add", Outcome::Simulated, format!("stage {}", plan.stage_index)));
        }

        let updated = executor::add_to_position(
            &self.ctx,
            position,
            plan.size,
            price,
            plan.stage_index,
            plan.trigger_loss_rate,
            "dca_add",
        )
        .await?;
        log.step(format!("added, size now {}", updated.size));

        if let Some(close) = plan.post_add_close.filter(|c| *c > Decimal::ZERO) {
            match executor::close_position(&self.ctx, &updated, close, &CloseReason::AnchorPostAdd).await {
                Ok(remaining) => {
                    let left = remaining.map_or(Decimal::ZERO, |p| p.size);
                    log.step(format!("post-add close done, residual {left}"));
                    info!(instrument = %position.instrument, residual = %left, "Anchor add completed");
                }
                Err(e) => {
                    // The add stands; the oversized anchor is cut by the next
                    // protect or hedge pass.
                    warn!(instrument = %position.instrument, error = %e, "Anchor post-add close failed");
                    log.step(format!("post-add close failed: {e}"));
                    return Ok(log.finish("add", Outcome::Warned, "post-add close failed"));
                }
            }
        }

        Ok(log.finish("add", Outcome::Executed, format!("stage {}", plan.stage_index)))
    }
}
