//! Anchor creation, marking, and closing.

use anchor_risk_core::{
    profit_rate, AnchorPosition, DecisionLog, DecisionRecord, EngineError, EngineResult,
    ExecutionMode, Outcome, Side,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::context::EngineContext;
use crate::rules::ANCHOR_LEVERAGE;

pub const COMPONENT: &str = "anchor_lifecycle";

pub struct AnchorLifecycleManager {
    ctx: EngineContext,
}

impl AnchorLifecycleManager {
    #[must_use]
    pub const fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Records a new active anchor.
    ///
    /// # Errors
    ///
    /// [`EngineError::DuplicateAnchor`] if an active anchor already exists for
    /// the pair, [`EngineError::InvalidInput`] for a non-positive price or size.
    pub async fn create(
        &self,
        instrument: &str,
        side: Side,
        anchor_price: Decimal,
        anchor_size: Decimal,
    ) -> EngineResult<AnchorPosition> {
        if anchor_price <= Decimal::ZERO || anchor_size <= Decimal::ZERO {
            return Err(EngineError::InvalidInput(format!(
                "anchor for {instrument} needs positive price and size"
            )));
        }
        if self.ctx.store.get_active_anchor(instrument, side).await?.is_some() {
            return Err(EngineError::DuplicateAnchor {
                instrument: instrument.to_string(),
                side,
            });
        }

        let anchor = self
            .ctx
            .store
            .insert_anchor(&AnchorPosition::new(instrument, side, anchor_price, anchor_size))
            .await?;
        info!(
            anchor_id = anchor.id,
            instrument,
            side = %side,
            price = %anchor_price,
            size = %anchor_size,
            "Anchor created"
        );
        Ok(anchor)
    }

    /// Marks the anchor to `price`.
    ///
    /// # Errors
    ///
    /// Returns the store error if the write fails.
    pub async fn update(&self, anchor: &AnchorPosition, price: Decimal) -> EngineResult<AnchorPosition> {
        let marked = mark(anchor, price);
        self.ctx.store.update_anchor_marks(&marked).await?;
        Ok(marked)
    }

    /// # Errors
    ///
    /// Returns the store error if the write fails.
    pub async fn close(&self, anchor: &AnchorPosition) -> EngineResult<()> {
        self.ctx.store.close_anchor(anchor.id).await?;
        info!(
            anchor_id = anchor.id,
            instrument = %anchor.instrument,
            side = %anchor.side,
            profit_rate = %anchor.profit_rate,
            "Anchor closed"
        );
        Ok(())
    }

    /// Drops an anchor whose open order failed. Unlike [`Self::close`] it
    /// leaves no trace for the dedup window.
    ///
    /// # Errors
    ///
    /// Returns the store error if the delete fails.
    pub async fn release(&self, anchor: &AnchorPosition) -> EngineResult<()> {
        self.ctx.store.release_anchor(anchor.id).await?;
        info!(anchor_id = anchor.id, instrument = %anchor.instrument, "Anchor slot released");
        Ok(())
    }

    /// Marks every active anchor and closes those whose position is gone.
    ///
    /// # Errors
    ///
    /// Returns an error only if the anchor list itself cannot be read.
    pub async fn run_cycle(&self, mode: ExecutionMode) -> EngineResult<Vec<DecisionRecord>> {
        let anchors = self.ctx.store.list_active_anchors().await?;
        let mut records = Vec::with_capacity(anchors.len());

        for anchor in anchors {
            let record = match self.sync_one(&anchor, mode).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(anchor_id = anchor.id, instrument = %anchor.instrument, error = %e, "Anchor sync failed");
                    let mut log = DecisionLog::new(COMPONENT, &anchor.instrument, Some(anchor.side), mode);
                    log.step(format!("error: {e}"));
                    log.finish("sync", Outcome::Failed, e.kind())
                }
            };
            self.ctx.journal(&record).await;
            records.push(record);
        }
        Ok(records)
    }

    async fn sync_one(&self, anchor: &AnchorPosition, mode: ExecutionMode) -> EngineResult<DecisionRecord> {
        let mut log = DecisionLog::new(COMPONENT, &anchor.instrument, Some(anchor.side), mode);

        let position = self.ctx.store.get_position(&anchor.instrument, anchor.side).await?;
        if position.is_none() {
            log.step("underlying position is flat");
            if mode.is_live() {
                self.close(anchor).await?;
                return Ok(log.finish("close", Outcome::Executed, "position flat"));
            }
            return Ok(log.finish("close", Outcome::Simulated, "position flat"));
        }

        let price = self.ctx.prices.get_current_price(&anchor.instrument).await?;
        let (marked, outcome) = if mode.is_live() {
            (self.update(anchor, price).await?, Outcome::Executed)
        } else {
            (mark(anchor, price), Outcome::Simulated)
        };
        log.step(format!(
            "price={price} anchor_price={} profit_rate={} pnl={}",
            anchor.anchor_price, marked.profit_rate, marked.unrealized_pnl
        ));
        Ok(log.finish("mark", outcome, "marked"))
    }
}

/// Anchor re-marked at `price`, at the fixed anchor leverage.
#[must_use]
pub fn mark(anchor: &AnchorPosition, price: Decimal) -> AnchorPosition {
    let rate = profit_rate(anchor.side, anchor.anchor_price, price, ANCHOR_LEVERAGE);
    let margin = anchor.anchor_size / ANCHOR_LEVERAGE;
    let mut marked = anchor.clone();
    marked.current_price = price;
    marked.profit_rate = rate;
    marked.unrealized_pnl = margin * rate / dec!(100);
    marked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use anchor_risk_core::{GranularityTier, MarginMode, Position, PositionStore};

    #[test]
    fn mark_uses_anchor_leverage() {
        let anchor = AnchorPosition::new("DOGE-USDT-SWAP", Side::Short, dec!(0.10), dec!(10));
        // 0.10 -> 0.09 is +10% for a short, x10 leverage
        let marked = mark(&anchor, dec!(0.09));
        assert_eq!(marked.profit_rate, dec!(100));
        assert_eq!(marked.unrealized_pnl, dec!(1));
        assert_eq!(marked.current_price, dec!(0.09));
    }

    #[tokio::test]
    async fn create_rejects_second_active_anchor() {
        let h = Harness::new();
        let manager = AnchorLifecycleManager::new(h.ctx());
        manager.create("DOGE-USDT-SWAP", Side::Short, dec!(0.1), dec!(10)).await.unwrap();
        let dup = manager.create("DOGE-USDT-SWAP", Side::Short, dec!(0.1), dec!(10)).await;
        assert!(matches!(dup, Err(EngineError::DuplicateAnchor { .. })));
    }

    #[tokio::test]
    async fn cycle_marks_live_and_closes_flat_anchors() {
        let h = Harness::new();
        let manager = AnchorLifecycleManager::new(h.ctx());
        let kept = manager.create("DOGE-USDT-SWAP", Side::Short, dec!(0.1), dec!(10)).await.unwrap();
        manager.create("PEPE-USDT-SWAP", Side::Short, dec!(0.00001), dec!(10)).await.unwrap();

        let pos = Position::open(
            "DOGE-USDT-SWAP",
            Side::Short,
            dec!(10),
            dec!(0.1),
            ANCHOR_LEVERAGE,
            MarginMode::Cross,
            GranularityTier::Small,
        )
        .unwrap()
        .into_anchor();
        h.store.open_position(&pos).await.unwrap();
        h.prices.set_price("DOGE-USDT-SWAP", dec!(0.095));

        let records = manager.run_cycle(ExecutionMode::Live).await.unwrap();
        assert_eq!(records.len(), 2);

        let active = h.store.list_active_anchors().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, kept.id);
        assert_eq!(active[0].profit_rate, dec!(50));
    }

    #[tokio::test]
    async fn dry_run_leaves_anchors_untouched() {
        let h = Harness::new();
        let manager = AnchorLifecycleManager::new(h.ctx());
        manager.create("PEPE-USDT-SWAP", Side::Short, dec!(0.00001), dec!(10)).await.unwrap();

        let records = manager.run_cycle(ExecutionMode::DryRun).await.unwrap();
        assert_eq!(records[0].outcome, Outcome::Simulated);
        assert_eq!(h.store.list_active_anchors().await.unwrap().len(), 1);
        assert!(h.store.decisions().is_empty());
    }
}
