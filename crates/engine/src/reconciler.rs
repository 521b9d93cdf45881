//! Drift audit between the store and the exchange.
//!
//! The store holds what the policies expect; the exchange holds what is
//! really open. Excess on the exchange is trimmed with a reduce-only close
//! tagged with the exchange's margin mode. A shortfall is only reported: an
//! organic reduction must not be fought by re-buying.

use std::collections::BTreeMap;

use anchor_risk_core::{
    read_monotonic, DecisionLog, DecisionRecord, EngineError, EngineResult, ExecutionMode,
    ExchangePosition, MarginMode, OrderRequest, Outcome, Side,
};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::context::EngineContext;
use crate::types::CloseReason;

pub const COMPONENT: &str = "reconciler";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Drift {
    InSync,
    /// Exchange holds this much more than expected.
    Excess(Decimal),
    /// Exchange holds this much less than expected.
    Shortfall(Decimal),
}

#[must_use]
pub fn diff(expected: Decimal, actual: Decimal, tolerance: Decimal) -> Drift {
    let delta = actual - expected;
    if delta > tolerance {
        Drift::Excess(delta)
    } else if -delta > tolerance {
        Drift::Shortfall(-delta)
    } else {
        Drift::InSync
    }
}

#[derive(Debug, Default)]
struct Pair {
    expected: Decimal,
    exchange: Option<ExchangePosition>,
}

pub struct PositionReconciler {
    ctx: EngineContext,
    tolerance: Decimal,
}

impl PositionReconciler {
    #[must_use]
    pub const fn new(ctx: EngineContext, tolerance: Decimal) -> Self {
        Self { ctx, tolerance }
    }

    /// Compares every (instrument, side) known to either side once.
    ///
    /// # Errors
    ///
    /// Returns an error when either position list cannot be read.
    pub async fn run_cycle(&self, mode: ExecutionMode) -> EngineResult<Vec<DecisionRecord>> {
        let mut pairs: BTreeMap<(String, Side), Pair> = BTreeMap::new();
        for position in self.ctx.store.get_open_positions().await? {
            pairs
                .entry((position.instrument.clone(), position.side))
                .or_default()
                .expected = position.size;
        }
        for reported in self.ctx.orders.get_exchange_positions().await? {
            let key = (reported.instrument.clone(), reported.side);
            pairs.entry(key).or_default().exchange = Some(reported);
        }

        let mut records = Vec::with_capacity(pairs.len());
        for ((instrument, side), pair) in pairs {
            let record = match self.reconcile(&instrument, side, pair, mode).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(instrument, side = %side, error = %e, "Reconcile failed");
                    let mut log = DecisionLog::new(COMPONENT, &instrument, Some(side), mode);
                    log.step(format!("error: {e}"));
                    log.finish("reconcile", Outcome::Failed, e.kind())
                }
            };
            self.ctx.journal(&record).await;
            records.push(record);
        }
        Ok(records)
    }

    async fn reconcile(
        &self,
        instrument: &str,
        side: Side,
        pair: Pair,
        mode: ExecutionMode,
    ) -> EngineResult<DecisionRecord> {
        let mut log = DecisionLog::new(COMPONENT, instrument, Some(side), mode);
        let expected = pair.expected;
        let mut actual = pair.exchange.as_ref().map_or(Decimal::ZERO, |p| p.size);
        let margin_mode = pair.exchange.as_ref().map_or(MarginMode::Cross, |p| p.margin_mode);

        if actual.is_zero() && expected > Decimal::ZERO {
            // A flat reading against an open position is re-read before it is
            // trusted.
            match self.reread(instrument, side).await {
                Ok(size) => actual = size,
                Err(e @ EngineError::StaleZeroReading { .. }) => {
                    log.step(format!("{e}"));
                }
                Err(e) => return Err(e),
            }
        }
        log.step(format!("expected={expected} actual={actual} tolerance={}", self.tolerance));

        match diff(expected, actual, self.tolerance) {
            Drift::InSync => Ok(log.finish("reconcile", Outcome::NoAction, "in sync")),
            Drift::Shortfall(missing) => {
                warn!(
                    instrument,
                    side = %side,
                    expected = %expected,
                    actual = %actual,
                    "Exchange position short of expected, not replenishing"
                );
                log.step(format!("shortfall {missing} logged only"));
                Ok(log.finish("reconcile", Outcome::Warned, format!("shortfall {missing}")))
            }
            Drift::Excess(excess) => {
                log.step(format!("excess {excess}: reduce-only close ({margin_mode})"));
                if !mode.is_live() {
                    return Ok(log.finish("reconcile", Outcome::Simulated, format!("close {excess}")));
                }
                let order = OrderRequest::close(instrument, side, excess, margin_mode, CloseReason::ReconcileExcess.to_string());
                let ack = self.ctx.orders.place_order(&order).await?;
                info!(
                    instrument,
                    side = %side,
                    size = %excess,
                    margin_mode = %margin_mode,
                    order_id = %ack.order_id,
                    "Excess exchange position trimmed"
                );
                Ok(log.finish("reconcile", Outcome::Executed, format!("close {excess}")))
            }
        }
    }

    async fn reread(&self, instrument: &str, side: Side) -> EngineResult<Decimal> {
        let orders = &self.ctx.orders;
        // Any positive reading clears the floor.
        read_monotonic(self.ctx.retry, "exchange size", Decimal::new(1, 12), || async move {
            Ok(orders
                .get_exchange_positions()
                .await?
                .into_iter()
                .find(|p| p.instrument == instrument && p.side == side)
                .map_or(Decimal::ZERO, |p| p.size))
        })
        .await
    }
}
