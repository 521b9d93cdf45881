//! Places orders and commits their effect to the store.
//!
//! The order goes out first; the store is only written once the exchange
//! acknowledged it. A rejected or timed-out order leaves the store untouched
//! and the policy retries on its next cycle. A store failure after a fill is
//! logged and left for the reconciler to surface as drift.
//!
//! The store always records the size the exchange reports as filled, which
//! can be less than the size requested.

use anchor_risk_core::{AddRecord, EngineResult, OrderAck, OrderRequest, Position};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::context::EngineContext;
use crate::types::CloseReason;

fn filled_size(request: &OrderRequest, ack: &OrderAck) -> Decimal {
    if ack.filled_size != request.size {
        warn!(
            instrument = %request.instrument,
            side = %request.side,
            requested = %request.size,
            filled = %ack.filled_size,
            order_id = %ack.order_id,
            "Partial fill"
        );
    }
    ack.filled_size
}

/// Reduces `position` by `size`. Returns the position left, `None` once flat.
///
/// # Errors
///
/// Returns the order error if the exchange rejects the close, or the store
/// error if the fill could not be committed.
pub async fn close_position(
    ctx: &EngineContext,
    position: &Position,
    size: Decimal,
    reason: &CloseReason,
) -> EngineResult<Option<Position>> {
    let request = OrderRequest::close(
        &position.instrument,
        position.side,
        size,
        position.margin_mode,
        reason.to_string(),
    );
    let ack = ctx.orders.place_order(&request).await?;
    let filled = filled_size(&request, &ack);

    match ctx.store.reduce_position(&position.instrument, position.side, filled).await {
        Ok(remaining) => {
            info!(
                instrument = %position.instrument,
                side = %position.side,
                size = %filled,
                order_id = %ack.order_id,
                reason = %reason,
                remaining = %remaining.as_ref().map_or(Decimal::ZERO, |p| p.size),
                "Position reduced"
            );
            Ok(remaining)
        }
        Err(e) => {
            error!(
                instrument = %position.instrument,
                side = %position.side,
                order_id = %ack.order_id,
                error = %e,
                "Close filled but store commit failed"
            );
            Err(e)
        }
    }
}

/// Adds `size` to `position` at `price` as DCA stage `stage_index`.
///
/// # Errors
///
/// Returns the order error if the exchange rejects the add, or the store
/// error if the add record could not be committed.
pub async fn add_to_position(
    ctx: &EngineContext,
    position: &Position,
    size: Decimal,
    price: Decimal,
    stage_index: u32,
    trigger_loss_rate: Decimal,
    tag: &str,
) -> EngineResult<Position> {
    let request = OrderRequest::open(&position.instrument, position.side, size, position.margin_mode, tag);
    let ack = ctx.orders.place_order(&request).await?;
    let filled = filled_size(&request, &ack);

    let record = AddRecord {
        instrument: position.instrument.clone(),
        side: position.side,
        add_size: filled,
        add_price: price,
        stage_index,
        trigger_loss_rate,
        created_at: Utc::now(),
    };

    match ctx.store.append_add_record(&record).await {
        Ok(updated) => {
            info!(
                instrument = %position.instrument,
                side = %position.side,
                stage = stage_index,
                size = %filled,
                price = %price,
                order_id = %ack.order_id,
                new_size = %updated.size,
                "Position added"
            );
            Ok(updated)
        }
        Err(e) => {
            error!(
                instrument = %position.instrument,
                side = %position.side,
                order_id = %ack.order_id,
                error = %e,
                "Add filled but store commit failed"
            );
            Err(e)
        }
    }
}

/// Grows `position` by `size` at `price` without consuming a DCA stage.
///
/// # Errors
///
/// Returns the order or store error.
pub async fn grow_position(
    ctx: &EngineContext,
    position: &Position,
    size: Decimal,
    price: Decimal,
    tag: &str,
) -> EngineResult<Position> {
    let request = OrderRequest::open(&position.instrument, position.side, size, position.margin_mode, tag);
    let ack = ctx.orders.place_order(&request).await?;
    let filled = filled_size(&request, &ack);

    match ctx.store.grow_position(&position.instrument, position.side, filled, price).await {
        Ok(updated) => {
            info!(
                instrument = %position.instrument,
                side = %position.side,
                size = %filled,
                order_id = %ack.order_id,
                tag,
                new_size = %updated.size,
                "Position grown"
            );
            Ok(updated)
        }
        Err(e) => {
            error!(
                instrument = %position.instrument,
                side = %position.side,
                order_id = %ack.order_id,
                error = %e,
                "Buy filled but store commit failed"
            );
            Err(e)
        }
    }
}

/// Opens a new position on the exchange and records it.
///
/// # Errors
///
/// Returns the order or store error.
pub async fn open_position(ctx: &EngineContext, position: &Position, tag: &str) -> EngineResult<()> {
    let request = OrderRequest::open(
        &position.instrument,
        position.side,
        position.size,
        position.margin_mode,
        tag,
    );
    let ack = ctx.orders.place_order(&request).await?;
    let mut opened = position.clone();
    opened.size = filled_size(&request, &ack);
    opened.opened_size = opened.size;

    if let Err(e) = ctx.store.open_position(&opened).await {
        error!(
            instrument = %position.instrument,
            side = %position.side,
            order_id = %ack.order_id,
            error = %e,
            "Open filled but store commit failed"
        );
        return Err(e);
    }

    info!(
        instrument = %position.instrument,
        side = %position.side,
        size = %opened.size,
        order_id = %ack.order_id,
        "Position opened"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use anchor_risk_core::{GranularityTier, PositionStore, Side};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn partial_close_commits_the_filled_size() {
        let h = Harness::new();
        let pos = h
            .open("SUI-USDT-SWAP", Side::Short, dec!(100), dec!(2), dec!(10), GranularityTier::Small)
            .await;
        h.orders.cap_next_fill(dec!(30));

        let remaining = close_position(&h.ctx(), &pos, dec!(70), &CloseReason::LossStop)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(remaining.size, dec!(70));
        assert_eq!(h.orders.exchange_size("SUI-USDT-SWAP", Side::Short), dec!(70));
    }

    #[tokio::test]
    async fn partial_grow_and_add_record_the_filled_size() {
        let h = Harness::new();
        let pos = h
            .open("SUI-USDT-SWAP", Side::Long, dec!(100), dec!(2), dec!(10), GranularityTier::Small)
            .await;

        h.orders.cap_next_fill(dec!(40));
        let grown = grow_position(&h.ctx(), &pos, dec!(50), dec!(2), "test").await.unwrap();
        assert_eq!(grown.size, dec!(140));

        h.orders.cap_next_fill(dec!(5));
        let added = add_to_position(&h.ctx(), &grown, dec!(20), dec!(1.9), 0, dec!(-5), "test")
            .await
            .unwrap();
        assert_eq!(added.size, dec!(145));
        let records = h.store.get_add_records("SUI-USDT-SWAP", Side::Long).await.unwrap();
        assert_eq!(records[0].add_size, dec!(5));
        assert_eq!(h.orders.exchange_size("SUI-USDT-SWAP", Side::Long), dec!(145));
    }

    #[tokio::test]
    async fn partial_open_records_the_filled_size() {
        let h = Harness::new();
        let pos = Position::open(
            "SUI-USDT-SWAP",
            Side::Short,
            dec!(10),
            dec!(2),
            dec!(10),
            anchor_risk_core::MarginMode::Cross,
            GranularityTier::Small,
        )
        .unwrap();
        h.orders.cap_next_fill(dec!(6));

        open_position(&h.ctx(), &pos, "test").await.unwrap();
        let stored = h.store.get_position("SUI-USDT-SWAP", Side::Short).await.unwrap().unwrap();
        assert_eq!(stored.size, dec!(6));
        assert_eq!(stored.opened_size, dec!(6));
    }
}
