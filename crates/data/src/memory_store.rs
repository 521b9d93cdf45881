//! In-process store and config provider for tests and simulation.
//!
//! Mirrors the `SQLite` semantics: versioned compare-and-swap, one active
//! anchor per (instrument, side), and all-or-nothing adds and reduces.

use std::collections::HashMap;

use anchor_risk_core::{
    AddRecord, AnchorPosition, AnchorStatus, ConfigProvider, DecisionRecord, EngineError,
    EngineResult, MaintenanceCounter, MarketConfig, Position, PositionStore, ProtectOrder,
    ProtectStatus, Side, TriggerState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

type Key = (String, Side);

fn key(instrument: &str, side: Side) -> Key {
    (instrument.to_string(), side)
}

#[derive(Default)]
struct State {
    positions: HashMap<Key, Position>,
    add_records: HashMap<Key, Vec<AddRecord>>,
    anchors: Vec<AnchorPosition>,
    next_anchor_id: i64,
    protect_orders: Vec<ProtectOrder>,
    trigger_states: HashMap<Key, TriggerState>,
    counters: HashMap<Key, MaintenanceCounter>,
    decisions: Vec<DecisionRecord>,
}

#[derive(Default)]
pub struct InMemoryPositionStore {
    state: RwLock<State>,
}

impl InMemoryPositionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every journaled decision, oldest first.
    #[must_use]
    pub fn decisions(&self) -> Vec<DecisionRecord> {
        self.state.read().decisions.clone()
    }
}

#[async_trait]
impl PositionStore for InMemoryPositionStore {
    async fn get_open_positions(&self) -> EngineResult<Vec<Position>> {
        let mut positions: Vec<Position> = self.state.read().positions.values().cloned().collect();
        positions.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then_with(|| a.instrument.cmp(&b.instrument)));
        Ok(positions)
    }

    async fn get_position(&self, instrument: &str, side: Side) -> EngineResult<Option<Position>> {
        Ok(self.state.read().positions.get(&key(instrument, side)).cloned())
    }

    async fn open_position(&self, position: &Position) -> EngineResult<()> {
        let mut state = self.state.write();
        let k = key(&position.instrument, position.side);
        if state.positions.contains_key(&k) {
            return Err(EngineError::InvalidInput(format!(
                "position already open for {} {}",
                position.instrument, position.side
            )));
        }
        state.positions.insert(k, position.clone());
        Ok(())
    }

    async fn get_add_records(&self, instrument: &str, side: Side) -> EngineResult<Vec<AddRecord>> {
        Ok(self
            .state
            .read()
            .add_records
            .get(&key(instrument, side))
            .cloned()
            .unwrap_or_default())
    }

    async fn append_add_record(&self, record: &AddRecord) -> EngineResult<Position> {
        let mut state = self.state.write();
        let k = key(&record.instrument, record.side);

        let already = state
            .add_records
            .get(&k)
            .is_some_and(|records| records.iter().any(|r| r.stage_index == record.stage_index));
        if already {
            return Err(EngineError::Contention(format!(
                "add stage {} for {} {}",
                record.stage_index, record.instrument, record.side
            )));
        }

        let mut position = state
            .positions
            .get(&k)
            .cloned()
            .ok_or_else(|| EngineError::PositionNotFound {
                instrument: record.instrument.clone(),
                side: record.side,
            })?;
        position.apply_add(record.add_size, record.add_price)?;

        state.add_records.entry(k.clone()).or_default().push(record.clone());
        state.positions.insert(k, position.clone());
        Ok(position)
    }

    async fn grow_position(
        &self,
        instrument: &str,
        side: Side,
        size: Decimal,
        price: Decimal,
    ) -> EngineResult<Position> {
        let mut state = self.state.write();
        let k = key(instrument, side);
        let position = state
            .positions
            .get_mut(&k)
            .ok_or_else(|| EngineError::PositionNotFound {
                instrument: instrument.to_string(),
                side,
            })?;
        position.apply_add(size, price)?;
        Ok(position.clone())
    }

    async fn set_position_leverage(&self, instrument: &str, side: Side, leverage: Decimal) -> EngineResult<Position> {
        let mut state = self.state.write();
        let position = state
            .positions
            .get_mut(&key(instrument, side))
            .ok_or_else(|| EngineError::PositionNotFound {
                instrument: instrument.to_string(),
                side,
            })?;
        position.leverage = leverage;
        Ok(position.clone())
    }

    async fn reduce_position(
        &self,
        instrument: &str,
        side: Side,
        amount: Decimal,
    ) -> EngineResult<Option<Position>> {
        let mut state = self.state.write();
        let k = key(instrument, side);

        let mut position = state
            .positions
            .get(&k)
            .cloned()
            .ok_or_else(|| EngineError::PositionNotFound {
                instrument: instrument.to_string(),
                side,
            })?;
        let remaining = position.apply_reduce(amount)?;

        if remaining.is_zero() {
            state.positions.remove(&k);
            state.add_records.remove(&k);
            state.trigger_states.remove(&k);
            return Ok(None);
        }
        state.positions.insert(k, position.clone());
        Ok(Some(position))
    }

    async fn insert_anchor(&self, anchor: &AnchorPosition) -> EngineResult<AnchorPosition> {
        let mut state = self.state.write();
        let duplicate = state
            .anchors
            .iter()
            .any(|a| a.is_active() && a.instrument == anchor.instrument && a.side == anchor.side);
        if duplicate {
            return Err(EngineError::DuplicateAnchor {
                instrument: anchor.instrument.clone(),
                side: anchor.side,
            });
        }

        let mut stored = anchor.clone();
        state.next_anchor_id += 1;
        stored.id = state.next_anchor_id;
        stored.status = AnchorStatus::Active;
        state.anchors.push(stored.clone());
        Ok(stored)
    }

    async fn get_active_anchor(&self, instrument: &str, side: Side) -> EngineResult<Option<AnchorPosition>> {
        Ok(self
            .state
            .read()
            .anchors
            .iter()
            .find(|a| a.is_active() && a.instrument == instrument && a.side == side)
            .cloned())
    }

    async fn list_active_anchors(&self) -> EngineResult<Vec<AnchorPosition>> {
        Ok(self.state.read().anchors.iter().filter(|a| a.is_active()).cloned().collect())
    }

    async fn update_anchor_marks(&self, anchor: &AnchorPosition) -> EngineResult<()> {
        let mut state = self.state.write();
        if let Some(stored) = state.anchors.iter_mut().find(|a| a.id == anchor.id && a.is_active()) {
            stored.current_price = anchor.current_price;
            stored.profit_rate = anchor.profit_rate;
            stored.unrealized_pnl = anchor.unrealized_pnl;
        }
        Ok(())
    }

    async fn close_anchor(&self, anchor_id: i64) -> EngineResult<()> {
        let mut state = self.state.write();
        if let Some(stored) = state.anchors.iter_mut().find(|a| a.id == anchor_id) {
            stored.status = AnchorStatus::Closed;
            stored.closed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn release_anchor(&self, anchor_id: i64) -> EngineResult<()> {
        self.state
            .write()
            .anchors
            .retain(|a| !(a.id == anchor_id && a.is_active()));
        Ok(())
    }

    async fn last_anchor_open_time(&self, instrument: &str) -> EngineResult<Option<DateTime<Utc>>> {
        Ok(self
            .state
            .read()
            .anchors
            .iter()
            .filter(|a| a.instrument == instrument)
            .map(|a| a.opened_at)
            .max())
    }

    async fn insert_protect_orders(&self, orders: &[ProtectOrder]) -> EngineResult<Vec<ProtectOrder>> {
        let mut state = self.state.write();
        for order in orders {
            let pending = state
                .protect_orders
                .iter()
                .any(|o| o.anchor_id == order.anchor_id && o.status == ProtectStatus::Pending);
            if pending {
                return Err(EngineError::DuplicateProtectOrders {
                    anchor_id: order.anchor_id,
                });
            }
        }

        let mut stored = Vec::with_capacity(orders.len());
        for order in orders {
            let mut saved = order.clone();
            saved.id = i64::try_from(state.protect_orders.len()).unwrap_or(i64::MAX - 1) + 1;
            state.protect_orders.push(saved.clone());
            stored.push(saved);
        }
        Ok(stored)
    }

    async fn get_protect_orders(&self, anchor_id: i64) -> EngineResult<Vec<ProtectOrder>> {
        Ok(self
            .state
            .read()
            .protect_orders
            .iter()
            .filter(|o| o.anchor_id == anchor_id)
            .cloned()
            .collect())
    }

    async fn list_open_protect_orders(&self) -> EngineResult<Vec<ProtectOrder>> {
        Ok(self
            .state
            .read()
            .protect_orders
            .iter()
            .filter(|o| o.status != ProtectStatus::Executed)
            .cloned()
            .collect())
    }

    async fn transition_protect_order(
        &self,
        order_id: i64,
        from: ProtectStatus,
        to: ProtectStatus,
    ) -> EngineResult<()> {
        if !from.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                id: order_id,
                from,
                to,
            });
        }
        let mut state = self.state.write();
        let order = state
            .protect_orders
            .iter_mut()
            .find(|o| o.id == order_id && o.status == from)
            .ok_or_else(|| EngineError::Contention(format!("protect order {order_id}")))?;
        order.status = to;
        if to == ProtectStatus::Executed {
            order.executed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get_trigger_state(&self, instrument: &str, side: Side) -> EngineResult<TriggerState> {
        Ok(self
            .state
            .read()
            .trigger_states
            .get(&key(instrument, side))
            .cloned()
            .unwrap_or_else(|| TriggerState::empty(instrument, side)))
    }

    async fn set_trigger_state(&self, next: &TriggerState) -> EngineResult<()> {
        let mut state = self.state.write();
        let k = key(&next.instrument, next.side);
        let current = state.trigger_states.get(&k).map_or(0, |s| s.version);
        if current != next.version {
            return Err(EngineError::Contention(format!(
                "trigger state {} {}",
                next.instrument, next.side
            )));
        }
        let mut stored = next.clone();
        stored.version += 1;
        state.trigger_states.insert(k, stored);
        Ok(())
    }

    async fn get_maintenance_counter(
        &self,
        instrument: &str,
        side: Side,
    ) -> EngineResult<Option<MaintenanceCounter>> {
        Ok(self.state.read().counters.get(&key(instrument, side)).cloned())
    }

    async fn set_maintenance_counter(&self, counter: &MaintenanceCounter) -> EngineResult<()> {
        let mut state = self.state.write();
        let k = key(&counter.instrument, counter.side);
        let current = state.counters.get(&k).map_or(0, |c| c.version);
        if current != counter.version {
            return Err(EngineError::Contention(format!(
                "maintenance counter {} {}",
                counter.instrument, counter.side
            )));
        }
        let mut stored = counter.clone();
        stored.version += 1;
        state.counters.insert(k, stored);
        Ok(())
    }

    async fn record_decision(&self, record: &DecisionRecord) -> EngineResult<()> {
        self.state.write().decisions.push(record.clone());
        Ok(())
    }
}

/// Config provider holding a mutable snapshot. `set` models an operator
/// flipping toggles between cycles; `fail` models an unreachable config source.
pub struct InMemoryConfigProvider {
    config: RwLock<Option<MarketConfig>>,
}

impl InMemoryConfigProvider {
    #[must_use]
    pub fn new(config: MarketConfig) -> Self {
        Self {
            config: RwLock::new(Some(config)),
        }
    }

    pub fn set(&self, config: MarketConfig) {
        *self.config.write() = Some(config);
    }

    /// Makes subsequent reads fail with `ConfigUnavailable`.
    pub fn fail(&self) {
        *self.config.write() = None;
    }
}

#[async_trait]
impl ConfigProvider for InMemoryConfigProvider {
    async fn get_market_config(&self) -> EngineResult<MarketConfig> {
        self.config
            .read()
            .clone()
            .ok_or_else(|| EngineError::ConfigUnavailable("config source offline".to_string()))
    }
}
