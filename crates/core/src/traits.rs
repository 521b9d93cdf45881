use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::decision::DecisionRecord;
use crate::error::EngineResult;
use crate::position::Position;
use crate::types::{
    AddRecord, AnchorPosition, ExchangePosition, MaintenanceCounter, MarketConfig, OrderAck,
    OrderRequest, PressureLevels, ProtectOrder, ProtectStatus, Side, TriggerState,
};

/// Source of trading toggles and limits. Implementations must return a fresh
/// snapshot on every call.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn get_market_config(&self) -> EngineResult<MarketConfig>;
}

#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn get_current_price(&self, instrument: &str) -> EngineResult<Decimal>;
    async fn get_pressure_levels(&self, instrument: &str) -> EngineResult<PressureLevels>;
}

/// Exchange-facing order placement.
///
/// A timeout or transport failure must surface as an error; callers never
/// retry an order inside the same cycle.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn place_order(&self, order: &OrderRequest) -> EngineResult<OrderAck>;
    async fn get_exchange_positions(&self) -> EngineResult<Vec<ExchangePosition>>;
    async fn get_leverage(&self, instrument: &str, side: Side) -> EngineResult<Decimal>;
    async fn set_leverage(&self, instrument: &str, side: Side, leverage: Decimal) -> EngineResult<()>;
}

/// Durable home of positions, logs, and shared counters. The only state
/// shared between polling loops and processes.
///
/// Versioned records (`TriggerState`, `MaintenanceCounter`) are written with
/// compare-and-swap: the write succeeds only when the stored version equals
/// the version carried by the argument, and stores `version + 1`. A lost race
/// returns [`crate::EngineError::Contention`].
#[async_trait]
pub trait PositionStore: Send + Sync {
    // ---- positions -------------------------------------------------------

    async fn get_open_positions(&self) -> EngineResult<Vec<Position>>;
    async fn get_position(&self, instrument: &str, side: Side) -> EngineResult<Option<Position>>;
    async fn open_position(&self, position: &Position) -> EngineResult<()>;
    async fn get_add_records(&self, instrument: &str, side: Side) -> EngineResult<Vec<AddRecord>>;

    /// Appends an add record and grows the position in one commit.
    /// Returns the updated position.
    async fn append_add_record(&self, record: &AddRecord) -> EngineResult<Position>;

    /// Grows a position outside the DCA ladder (maintenance buys). No add
    /// record is written.
    async fn grow_position(
        &self,
        instrument: &str,
        side: Side,
        size: Decimal,
        price: Decimal,
    ) -> EngineResult<Position>;

    /// Records the leverage the exchange now applies to the position.
    async fn set_position_leverage(&self, instrument: &str, side: Side, leverage: Decimal) -> EngineResult<Position>;

    /// Shrinks a position in one commit. Returns `None` once it is fully
    /// closed, at which point the position, its add log, and its trigger
    /// state are removed.
    async fn reduce_position(
        &self,
        instrument: &str,
        side: Side,
        amount: Decimal,
    ) -> EngineResult<Option<Position>>;

    // ---- anchors ---------------------------------------------------------

    /// Inserts an active anchor and returns it with its assigned id.
    async fn insert_anchor(&self, anchor: &AnchorPosition) -> EngineResult<AnchorPosition>;
    async fn get_active_anchor(&self, instrument: &str, side: Side) -> EngineResult<Option<AnchorPosition>>;
    async fn list_active_anchors(&self) -> EngineResult<Vec<AnchorPosition>>;
    async fn update_anchor_marks(&self, anchor: &AnchorPosition) -> EngineResult<()>;
    async fn close_anchor(&self, anchor_id: i64) -> EngineResult<()>;
    /// Deletes an active anchor whose open order never filled, so it does not
    /// count as an open for the dedup window.
    async fn release_anchor(&self, anchor_id: i64) -> EngineResult<()>;
    async fn last_anchor_open_time(&self, instrument: &str) -> EngineResult<Option<DateTime<Utc>>>;

    // ---- protect orders --------------------------------------------------

    /// Inserts protect orders for one anchor. Rejected when that anchor
    /// already has pending orders.
    async fn insert_protect_orders(&self, orders: &[ProtectOrder]) -> EngineResult<Vec<ProtectOrder>>;
    async fn get_protect_orders(&self, anchor_id: i64) -> EngineResult<Vec<ProtectOrder>>;
    /// Orders not yet executed.
    async fn list_open_protect_orders(&self) -> EngineResult<Vec<ProtectOrder>>;
    /// Moves an order from `from` to `to`, failing if it is no longer in `from`.
    async fn transition_protect_order(
        &self,
        order_id: i64,
        from: ProtectStatus,
        to: ProtectStatus,
    ) -> EngineResult<()>;

    // ---- shared counters -------------------------------------------------

    async fn get_trigger_state(&self, instrument: &str, side: Side) -> EngineResult<TriggerState>;
    async fn set_trigger_state(&self, state: &TriggerState) -> EngineResult<()>;
    async fn get_maintenance_counter(
        &self,
        instrument: &str,
        side: Side,
    ) -> EngineResult<Option<MaintenanceCounter>>;
    async fn set_maintenance_counter(&self, counter: &MaintenanceCounter) -> EngineResult<()>;

    // ---- journal ---------------------------------------------------------

    async fn record_decision(&self, record: &DecisionRecord) -> EngineResult<()>;
}
