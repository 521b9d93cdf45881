//! Software-monitored stops guarding anchors.
//!
//! Each anchor gets two protect orders when it is created. An order moves
//! `pending -> triggered -> executed`; the store rejects any other move, so a
//! crash between steps resumes from the persisted status on the next cycle.

use std::collections::{HashMap, HashSet};

use anchor_risk_core::{
    AnchorPosition, DecisionLog, DecisionRecord, EngineError, EngineResult, ExecutionMode,
    Outcome, ProtectOrder, ProtectStatus,
};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::context::EngineContext;
use crate::executor;
use crate::rules::PROTECT_RULES;
use crate::types::CloseReason;

pub const COMPONENT: &str = "protect_orders";

/// The two unsaved protect orders for `anchor`.
#[must_use]
pub fn orders_for(anchor: &AnchorPosition) -> Vec<ProtectOrder> {
    let now = Utc::now();
    PROTECT_RULES
        .iter()
        .map(|rule| ProtectOrder {
            id: 0,
            anchor_id: anchor.id,
            instrument: anchor.instrument.clone(),
            kind: rule.kind,
            offset_percent: rule.offset_percent,
            leverage: rule.leverage,
            close_percent: rule.close_percent,
            trigger_price: rule.trigger_price(anchor.anchor_price),
            anchor_size: anchor.anchor_size,
            status: ProtectStatus::Pending,
            created_at: now,
            executed_at: None,
        })
        .collect()
}

/// Whether `price` has crossed the order's trigger.
#[must_use]
pub fn is_triggered(order: &ProtectOrder, price: Decimal) -> bool {
    price >= order.trigger_price
}

pub struct AnchorProtectOrderManager {
    ctx: EngineContext,
}

impl AnchorProtectOrderManager {
    #[must_use]
    pub const fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Persists both protect orders for a freshly created anchor.
    ///
    /// # Errors
    ///
    /// [`EngineError::DuplicateProtectOrders`] when the anchor already has
    /// pending orders.
    pub async fn spawn_for(&self, anchor: &AnchorPosition) -> EngineResult<Vec<ProtectOrder>> {
        let existing = self.ctx.store.get_protect_orders(anchor.id).await?;
        if existing.iter().any(|o| o.status == ProtectStatus::Pending) {
            return Err(EngineError::DuplicateProtectOrders { anchor_id: anchor.id });
        }
        let stored = self.ctx.store.insert_protect_orders(&orders_for(anchor)).await?;
        for order in &stored {
            info!(
                anchor_id = anchor.id,
                order_id = order.id,
                kind = %order.kind,
                trigger_price = %order.trigger_price,
                "Protect order spawned"
            );
        }
        Ok(stored)
    }

    /// Advances every open protect order by at most one close per anchor.
    ///
    /// # Errors
    ///
    /// Returns an error only if the anchor or order lists cannot be read.
    pub async fn run_cycle(&self, mode: ExecutionMode) -> EngineResult<Vec<DecisionRecord>> {
        let anchors: HashMap<i64, AnchorPosition> = self
            .ctx
            .store
            .list_active_anchors()
            .await?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();
        let mut records = Vec::new();

        // Anchors whose orders never made it into the store.
        for anchor in anchors.values() {
            if !self.ctx.store.get_protect_orders(anchor.id).await?.is_empty() {
                continue;
            }
            let mut log = DecisionLog::new(COMPONENT, &anchor.instrument, Some(anchor.side), mode);
            log.step(format!("anchor {} has no protect orders", anchor.id));
            let record = if mode.is_live() {
                match self.spawn_for(anchor).await {
                    Ok(orders) => log.finish("spawn", Outcome::Executed, format!("{} orders", orders.len())),
                    Err(e) => log.finish("spawn", Outcome::Failed, e.to_string()),
                }
            } else {
                log.finish("spawn", Outcome::Simulated, "missing protect orders")
            };
            self.ctx.journal(&record).await;
            records.push(record);
        }

        let mut orders = self.ctx.store.list_open_protect_orders().await?;
        orders.sort_by_key(|o| (o.anchor_id, o.offset_percent));
        let mut acted: HashSet<i64> = HashSet::new();

        for order in orders {
            let Some(anchor) = anchors.get(&order.anchor_id) else {
                continue;
            };
            if acted.contains(&anchor.id) {
                continue;
            }
            let record = match self.advance(anchor, &order, mode).await {
                Ok((record, closed)) => {
                    if closed {
                        acted.insert(anchor.id);
                    }
                    record
                }
                Err(e) => {
                    warn!(order_id = order.id, anchor_id = anchor.id, error = %e, "Protect order failed");
                    let mut log = DecisionLog::new(COMPONENT, &anchor.instrument, Some(anchor.side), mode);
                    log.step(format!("{} error: {e}", order.kind));
                    log.finish(order.kind.to_string(), Outcome::Failed, e.kind())
                }
            };
            self.ctx.journal(&record).await;
            records.push(record);
        }
        Ok(records)
    }

    /// Returns the record and whether a close was placed.
    async fn advance(
        &self,
        anchor: &AnchorPosition,
        order: &ProtectOrder,
        mode: ExecutionMode,
    ) -> EngineResult<(DecisionRecord, bool)> {
        let mut log = DecisionLog::new(COMPONENT, &anchor.instrument, Some(anchor.side), mode);
        let action = order.kind.to_string();

        if order.status == ProtectStatus::Pending {
            let price = self.ctx.prices.get_current_price(&anchor.instrument).await?;
            log.step(format!(
                "{} price={price} trigger={} status=pending",
                order.kind, order.trigger_price
            ));
            if !is_triggered(order, price) {
                return Ok((log.finish(action, Outcome::NoAction, "below trigger"), false));
            }
            if !mode.is_live() {
                log.step(format!(
                    "would close {} of anchor size {}, residual {}",
                    order.close_amount(),
                    order.anchor_size,
                    order.residual()
                ));
                return Ok((log.finish(action, Outcome::Simulated, "triggered"), true));
            }
            self.ctx
                .store
                .transition_protect_order(order.id, ProtectStatus::Pending, ProtectStatus::Triggered)
                .await?;
            log.step("pending -> triggered");
        } else {
            log.step(format!("{} resuming from triggered", order.kind));
            if !mode.is_live() {
                return Ok((log.finish(action, Outcome::Simulated, "triggered"), true));
            }
        }

        let position = self.ctx.store.get_position(&anchor.instrument, anchor.side).await?;
        let held = position.as_ref().map_or(Decimal::ZERO, |p| p.size);
        let close = order.close_amount().min(held);
        log.step(format!(
            "close_amount={} held={held} closing={close}",
            order.close_amount()
        ));

        if let Some(position) = position.filter(|_| close > Decimal::ZERO) {
            let current = self.ctx.orders.get_leverage(&anchor.instrument, anchor.side).await?;
            if current != order.leverage {
                self.ctx
                    .orders
                    .set_leverage(&anchor.instrument, anchor.side, order.leverage)
                    .await?;
                log.step(format!("leverage {current} -> {}", order.leverage));
            }
            let position = if position.leverage == order.leverage {
                position
            } else {
                self.ctx
                    .store
                    .set_position_leverage(&anchor.instrument, anchor.side, order.leverage)
                    .await?
            };
            executor::close_position(&self.ctx, &position, close, &CloseReason::ProtectOrder { kind: order.kind })
                .await?;
        }

        self.ctx
            .store
            .transition_protect_order(order.id, ProtectStatus::Triggered, ProtectStatus::Executed)
            .await?;
        log.step("triggered -> executed");
        info!(
            anchor_id = anchor.id,
            order_id = order.id,
            kind = %order.kind,
            closed = %close,
            "Protect order executed"
        );
        Ok((log.finish(action, Outcome::Executed, format!("closed {close}")), true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor_lifecycle::AnchorLifecycleManager;
    use crate::test_support::Harness;
    use anchor_risk_core::{
        ExchangePosition, MarginMode, OrderExecutor, PositionStore, ProtectOrderKind, Side,
    };
    use rust_decimal_macros::dec;

    async fn anchored(h: &Harness) -> AnchorPosition {
        h.open_anchor("DOGE-USDT-SWAP", dec!(10), dec!(0.1), dec!(10)).await;
        let anchor = AnchorLifecycleManager::new(h.ctx())
            .create("DOGE-USDT-SWAP", Side::Short, dec!(0.1), dec!(10))
            .await
            .unwrap();
        AnchorProtectOrderManager::new(h.ctx()).spawn_for(&anchor).await.unwrap();
        anchor
    }

    #[test]
    fn spawned_orders_follow_the_fixed_rules() {
        let anchor = AnchorPosition::new("DOGE-USDT-SWAP", Side::Short, dec!(100), dec!(10));
        let orders = orders_for(&anchor);
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].kind, ProtectOrderKind::Protect1);
        assert_eq!(orders[0].trigger_price, dec!(104));
        assert_eq!(orders[0].leverage, dec!(10));
        assert_eq!(orders[1].trigger_price, dec!(110));
        assert_eq!(orders[1].leverage, dec!(20));
        assert!(orders.iter().all(|o| o.close_amount() == dec!(9.5)));
        assert!(!is_triggered(&orders[0], dec!(103.99)));
        assert!(is_triggered(&orders[0], dec!(104)));
    }

    #[tokio::test]
    async fn second_spawn_is_rejected() {
        let h = Harness::new();
        let anchor = anchored(&h).await;
        let again = AnchorProtectOrderManager::new(h.ctx()).spawn_for(&anchor).await;
        assert!(matches!(again, Err(EngineError::DuplicateProtectOrders { .. })));
        assert_eq!(h.store.get_protect_orders(anchor.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn trigger_closes_95_percent_and_executes() {
        let h = Harness::new();
        let anchor = anchored(&h).await;
        let manager = AnchorProtectOrderManager::new(h.ctx());

        h.prices.set_price("DOGE-USDT-SWAP", dec!(0.103));
        let quiet = manager.run_cycle(ExecutionMode::Live).await.unwrap();
        assert!(quiet.iter().all(|r| r.outcome == Outcome::NoAction));

        h.prices.set_price("DOGE-USDT-SWAP", dec!(0.105));
        manager.run_cycle(ExecutionMode::Live).await.unwrap();
        assert_eq!(h.size_of("DOGE-USDT-SWAP", Side::Short).await, Some(dec!(0.5)));

        let orders = h.store.get_protect_orders(anchor.id).await.unwrap();
        let p1 = orders.iter().find(|o| o.kind == ProtectOrderKind::Protect1).unwrap();
        let p2 = orders.iter().find(|o| o.kind == ProtectOrderKind::Protect2).unwrap();
        assert_eq!(p1.status, ProtectStatus::Executed);
        assert!(p1.executed_at.is_some());
        assert_eq!(p2.status, ProtectStatus::Pending);
        assert_eq!(h.orders.get_leverage("DOGE-USDT-SWAP", Side::Short).await.unwrap(), dec!(10));
    }

    #[tokio::test]
    async fn second_order_clamps_to_what_is_left() {
        let h = Harness::new();
        let anchor = anchored(&h).await;
        let manager = AnchorProtectOrderManager::new(h.ctx());

        h.prices.set_price("DOGE-USDT-SWAP", dec!(0.111));
        manager.run_cycle(ExecutionMode::Live).await.unwrap();
        assert_eq!(h.size_of("DOGE-USDT-SWAP", Side::Short).await, Some(dec!(0.5)));

        manager.run_cycle(ExecutionMode::Live).await.unwrap();
        assert_eq!(h.size_of("DOGE-USDT-SWAP", Side::Short).await, None);
        assert!(h
            .store
            .get_protect_orders(anchor.id)
            .await
            .unwrap()
            .iter()
            .all(|o| o.status == ProtectStatus::Executed));
        assert_eq!(h.orders.get_leverage("DOGE-USDT-SWAP", Side::Short).await.unwrap(), dec!(20));
    }

    #[tokio::test]
    async fn leverage_switch_is_recorded_on_the_position() {
        let h = Harness::new();
        anchored(&h).await;
        let manager = AnchorProtectOrderManager::new(h.ctx());

        h.prices.set_price("DOGE-USDT-SWAP", dec!(0.105));
        manager.run_cycle(ExecutionMode::Live).await.unwrap();
        // Rebuilt to 10 before the second level
        h.store
            .grow_position("DOGE-USDT-SWAP", Side::Short, dec!(9.5), dec!(0.105))
            .await
            .unwrap();
        h.orders.seed_position(ExchangePosition {
            instrument: "DOGE-USDT-SWAP".to_string(),
            side: Side::Short,
            size: dec!(10),
            margin_mode: MarginMode::Cross,
            leverage: dec!(10),
        });

        h.prices.set_price("DOGE-USDT-SWAP", dec!(0.111));
        manager.run_cycle(ExecutionMode::Live).await.unwrap();
        let pos = h.store.get_position("DOGE-USDT-SWAP", Side::Short).await.unwrap().unwrap();
        assert_eq!(pos.size, dec!(0.5));
        assert_eq!(pos.leverage, dec!(20));
        assert_eq!(pos.margin(), dec!(0.025));
    }

    #[tokio::test]
    async fn rejected_close_resumes_from_triggered() {
        let h = Harness::new();
        let anchor = anchored(&h).await;
        let manager = AnchorProtectOrderManager::new(h.ctx());

        h.prices.set_price("DOGE-USDT-SWAP", dec!(0.105));
        h.orders.reject_next(1);
        let failed = manager.run_cycle(ExecutionMode::Live).await.unwrap();
        assert!(failed.iter().any(|r| r.outcome == Outcome::Failed));
        let p1 = h.store.get_protect_orders(anchor.id).await.unwrap()[0].clone();
        assert_eq!(p1.status, ProtectStatus::Triggered);

        // Price falls back, the triggered order still completes
        h.prices.set_price("DOGE-USDT-SWAP", dec!(0.1));
        manager.run_cycle(ExecutionMode::Live).await.unwrap();
        assert_eq!(h.size_of("DOGE-USDT-SWAP", Side::Short).await, Some(dec!(0.5)));
    }

    #[tokio::test]
    async fn dry_run_reports_without_transitions() {
        let h = Harness::new();
        let anchor = anchored(&h).await;
        h.prices.set_price("DOGE-USDT-SWAP", dec!(0.105));

        let records = AnchorProtectOrderManager::new(h.ctx())
            .run_cycle(ExecutionMode::DryRun)
            .await
            .unwrap();
        assert_eq!(records[0].outcome, Outcome::Simulated);
        assert!(h
            .store
            .get_protect_orders(anchor.id)
            .await
            .unwrap()
            .iter()
            .all(|o| o.status == ProtectStatus::Pending));
        assert_eq!(h.size_of("DOGE-USDT-SWAP", Side::Short).await, Some(dec!(10)));
    }

    #[tokio::test]
    async fn missing_orders_are_respawned() {
        let h = Harness::new();
        h.open_anchor("PEPE-USDT-SWAP", dec!(10), dec!(0.00001), dec!(10)).await;
        let anchor = AnchorLifecycleManager::new(h.ctx())
            .create("PEPE-USDT-SWAP", Side::Short, dec!(0.00001), dec!(10))
            .await
            .unwrap();
        h.prices.set_price("PEPE-USDT-SWAP", dec!(0.00001));

        AnchorProtectOrderManager::new(h.ctx())
            .run_cycle(ExecutionMode::Live)
            .await
            .unwrap();
        assert_eq!(h.store.get_protect_orders(anchor.id).await.unwrap().len(), 2);
    }
}
