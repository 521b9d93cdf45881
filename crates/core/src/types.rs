//! Records shared by every component of the risk engine.
//!
//! Positions live in [`crate::position`]; everything else the store persists
//! (add log, anchors, protect orders, trigger state, maintenance counters,
//! market config) is defined here.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

// =============================================================================
// Enums
// =============================================================================

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// The other side of the same instrument.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "long" => Ok(Self::Long),
            "short" => Ok(Self::Short),
            other => Err(EngineError::Store(format!("unknown side: {other}"))),
        }
    }
}

/// Exchange margin mode a position is held under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    Cross,
    Isolated,
}

impl std::fmt::Display for MarginMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cross => write!(f, "cross"),
            Self::Isolated => write!(f, "isolated"),
        }
    }
}

impl FromStr for MarginMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cross" => Ok(Self::Cross),
            "isolated" => Ok(Self::Isolated),
            other => Err(EngineError::Store(format!("unknown margin mode: {other}"))),
        }
    }
}

/// Sizing bucket that selects the DCA ladder for a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GranularityTier {
    Small,
    Medium,
    Large,
}

impl std::fmt::Display for GranularityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Small => write!(f, "small"),
            Self::Medium => write!(f, "medium"),
            Self::Large => write!(f, "large"),
        }
    }
}

impl FromStr for GranularityTier {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "small" => Ok(Self::Small),
            "medium" => Ok(Self::Medium),
            "large" => Ok(Self::Large),
            other => Err(EngineError::Store(format!("unknown granularity tier: {other}"))),
        }
    }
}

// =============================================================================
// Add log
// =============================================================================

/// One executed DCA stage. Records are append-only; their count is the number
/// of stages consumed by the position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddRecord {
    pub instrument: String,
    pub side: Side,
    pub add_size: Decimal,
    pub add_price: Decimal,
    pub stage_index: u32,
    pub trigger_loss_rate: Decimal,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Anchors
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorStatus {
    Active,
    Closed,
}

impl std::fmt::Display for AnchorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

impl FromStr for AnchorStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            other => Err(EngineError::Store(format!("unknown anchor status: {other}"))),
        }
    }
}

/// A fixed-size fade position opened by the anchor trigger.
///
/// At most one anchor per (instrument, side) may be active; the store rejects
/// a second insert with [`EngineError::DuplicateAnchor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorPosition {
    /// Store-assigned identifier. Zero until inserted.
    pub id: i64,
    pub instrument: String,
    pub side: Side,
    pub anchor_price: Decimal,
    pub anchor_size: Decimal,
    pub current_price: Decimal,
    pub profit_rate: Decimal,
    pub unrealized_pnl: Decimal,
    pub status: AnchorStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl AnchorPosition {
    /// A new, not yet persisted, active anchor marked at its entry price.
    #[must_use]
    pub fn new(instrument: impl Into<String>, side: Side, anchor_price: Decimal, anchor_size: Decimal) -> Self {
        Self {
            id: 0,
            instrument: instrument.into(),
            side,
            anchor_price,
            anchor_size,
            current_price: anchor_price,
            profit_rate: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            status: AnchorStatus::Active,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AnchorStatus::Active
    }
}

// =============================================================================
// Protect orders
// =============================================================================

/// Which of the two fixed protect rules an order was spawned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectOrderKind {
    Protect1,
    Protect2,
}

impl std::fmt::Display for ProtectOrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Protect1 => write!(f, "protect_1"),
            Self::Protect2 => write!(f, "protect_2"),
        }
    }
}

impl FromStr for ProtectOrderKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "protect_1" => Ok(Self::Protect1),
            "protect_2" => Ok(Self::Protect2),
            other => Err(EngineError::Store(format!("unknown protect order kind: {other}"))),
        }
    }
}

/// Protect-order lifecycle. Only forward transitions are legal:
/// `Pending -> Triggered -> Executed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectStatus {
    Pending,
    Triggered,
    Executed,
}

impl ProtectStatus {
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Triggered) | (Self::Triggered, Self::Executed)
        )
    }
}

impl std::fmt::Display for ProtectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Triggered => write!(f, "triggered"),
            Self::Executed => write!(f, "executed"),
        }
    }
}

impl FromStr for ProtectStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "triggered" => Ok(Self::Triggered),
            "executed" => Ok(Self::Executed),
            other => Err(EngineError::Store(format!("unknown protect status: {other}"))),
        }
    }
}

/// A software-monitored stop guarding an anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectOrder {
    /// Store-assigned identifier. Zero until inserted.
    pub id: i64,
    pub anchor_id: i64,
    pub instrument: String,
    pub kind: ProtectOrderKind,
    pub offset_percent: Decimal,
    pub leverage: Decimal,
    pub close_percent: Decimal,
    pub trigger_price: Decimal,
    /// Anchor size snapshotted when the order was spawned.
    pub anchor_size: Decimal,
    pub status: ProtectStatus,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl ProtectOrder {
    /// Size this order closes once triggered.
    #[must_use]
    pub fn close_amount(&self) -> Decimal {
        self.anchor_size * self.close_percent / dec!(100)
    }

    /// Anchor size left after this order executes.
    #[must_use]
    pub fn residual(&self) -> Decimal {
        self.anchor_size - self.close_amount()
    }
}

// =============================================================================
// Shared counters
// =============================================================================

/// Thresholds already fired by the profit-tier ladder for one position.
///
/// `version` is the compare-and-swap token. A state read from an empty store
/// has version 0; every successful write bumps it by one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerState {
    pub instrument: String,
    pub side: Side,
    pub triggered_levels: BTreeSet<Decimal>,
    pub version: i64,
}

impl TriggerState {
    #[must_use]
    pub fn empty(instrument: impl Into<String>, side: Side) -> Self {
        Self {
            instrument: instrument.into(),
            side,
            triggered_levels: BTreeSet::new(),
            version: 0,
        }
    }

    #[must_use]
    pub fn has_fired(&self, threshold: Decimal) -> bool {
        self.triggered_levels.contains(&threshold)
    }
}

/// Per-day margin maintenance bookkeeping for one (instrument, side).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceCounter {
    pub instrument: String,
    pub side: Side,
    pub date: NaiveDate,
    /// Actions taken today, normal and super combined.
    pub count: u32,
    /// Super actions taken today.
    pub super_count: u32,
    pub last_maintenance_time: Option<DateTime<Utc>>,
    pub version: i64,
}

impl MaintenanceCounter {
    #[must_use]
    pub fn fresh(instrument: impl Into<String>, side: Side, date: NaiveDate) -> Self {
        Self {
            instrument: instrument.into(),
            side,
            date,
            count: 0,
            super_count: 0,
            last_maintenance_time: None,
            version: 0,
        }
    }

    /// Returns the counter as it applies on `today`: a counter from an earlier
    /// day has its counts zeroed but keeps its version and last action time.
    #[must_use]
    pub fn for_date(mut self, today: NaiveDate) -> Self {
        if self.date != today {
            self.date = today;
            self.count = 0;
            self.super_count = 0;
        }
        self
    }
}

// =============================================================================
// Market config
// =============================================================================

/// Trading toggles and limits. Re-read from the [`crate::ConfigProvider`]
/// every cycle, since `allow_long` selects the active profit ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub allow_long: bool,
    pub allow_short: bool,
    pub allow_anchor: bool,
    pub enabled: bool,
    pub total_capital: Decimal,
    pub position_limit_percent: Decimal,
    pub max_single_coin_percent: Decimal,
    /// Profit rate (percent, negative) at which maintenance acts.
    pub loss_threshold: Decimal,
    /// Informational floor; maintenance notes it but still acts below it.
    pub margin_min: Decimal,
    /// Hard ceiling: positions with margin at or above this are not maintained.
    pub margin_max: Decimal,
    pub super_maintain_long: bool,
    pub super_maintain_short: bool,
}

impl MarketConfig {
    /// Capital the policies may deploy across all positions.
    #[must_use]
    pub fn available_capital(&self) -> Decimal {
        self.total_capital * self.position_limit_percent / dec!(100)
    }

    /// Maximum notional exposure for a single instrument.
    #[must_use]
    pub fn single_coin_cap(&self) -> Decimal {
        self.available_capital() * self.max_single_coin_percent / dec!(100)
    }

    #[must_use]
    pub const fn super_maintenance_enabled(&self, side: Side) -> bool {
        match side {
            Side::Long => self.super_maintain_long,
            Side::Short => self.super_maintain_short,
        }
    }

    #[must_use]
    pub const fn side_allowed(&self, side: Side) -> bool {
        match side {
            Side::Long => self.allow_long,
            Side::Short => self.allow_short,
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            allow_long: false,
            allow_short: true,
            allow_anchor: true,
            enabled: true,
            total_capital: dec!(10000),
            position_limit_percent: dec!(50),
            max_single_coin_percent: dec!(20),
            loss_threshold: dec!(-10),
            margin_min: dec!(0.6),
            margin_max: dec!(2.0),
            super_maintain_long: false,
            super_maintain_short: false,
        }
    }
}

// =============================================================================
// Price feed and exchange views
// =============================================================================

/// Pressure-level signals for one instrument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PressureLevels {
    /// Nearer resistance line.
    pub level1: Option<Decimal>,
    /// Farther resistance line.
    pub level2: Option<Decimal>,
    /// Position of the price within its 7-day range, 0-100.
    pub pct_7d: Option<Decimal>,
    /// Position of the price within its 48-hour range, 0-100.
    pub pct_48h: Option<Decimal>,
}

/// A position as the exchange reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub instrument: String,
    pub side: Side,
    pub size: Decimal,
    pub margin_mode: MarginMode,
    pub leverage: Decimal,
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderAction {
    Open,
    Close,
}

impl std::fmt::Display for OrderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Close => write!(f, "close"),
        }
    }
}

/// A market order against one side of an instrument. `size` is notional USDT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub instrument: String,
    pub side: Side,
    pub action: OrderAction,
    pub size: Decimal,
    pub margin_mode: MarginMode,
    pub reduce_only: bool,
    /// Free-form tag carried to the exchange client for audit.
    pub tag: String,
}

impl OrderRequest {
    #[must_use]
    pub fn open(
        instrument: impl Into<String>,
        side: Side,
        size: Decimal,
        margin_mode: MarginMode,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            side,
            action: OrderAction::Open,
            size,
            margin_mode,
            reduce_only: false,
            tag: tag.into(),
        }
    }

    #[must_use]
    pub fn close(
        instrument: impl Into<String>,
        side: Side,
        size: Decimal,
        margin_mode: MarginMode,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            side,
            action: OrderAction::Close,
            size,
            margin_mode,
            reduce_only: true,
            tag: tag.into(),
        }
    }
}

/// Exchange acknowledgement of a filled order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub filled_size: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protect_status_only_moves_forward() {
        assert!(ProtectStatus::Pending.can_transition_to(ProtectStatus::Triggered));
        assert!(ProtectStatus::Triggered.can_transition_to(ProtectStatus::Executed));
        assert!(!ProtectStatus::Pending.can_transition_to(ProtectStatus::Executed));
        assert!(!ProtectStatus::Executed.can_transition_to(ProtectStatus::Pending));
        assert!(!ProtectStatus::Triggered.can_transition_to(ProtectStatus::Pending));
    }

    #[test]
    fn protect_order_close_amount_and_residual() {
        let order = ProtectOrder {
            id: 1,
            anchor_id: 1,
            instrument: "DOGE-USDT-SWAP".to_string(),
            kind: ProtectOrderKind::Protect1,
            offset_percent: dec!(4),
            leverage: dec!(10),
            close_percent: dec!(95),
            trigger_price: dec!(0.104),
            anchor_size: dec!(10),
            status: ProtectStatus::Pending,
            created_at: Utc::now(),
            executed_at: None,
        };
        assert_eq!(order.close_amount(), dec!(9.5));
        assert_eq!(order.residual(), dec!(0.5));
    }

    #[test]
    fn market_config_caps() {
        let config = MarketConfig::default();
        // 10000 * 50% = 5000 available, 20% of that per coin
        assert_eq!(config.available_capital(), dec!(5000));
        assert_eq!(config.single_coin_cap(), dec!(1000));
    }

    #[test]
    fn maintenance_counter_resets_on_new_day() {
        let day1 = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let mut counter = MaintenanceCounter::fresh("BTC-USDT-SWAP", Side::Short, day1);
        counter.count = 3;
        counter.super_count = 1;
        counter.version = 4;

        let same_day = counter.clone().for_date(day1);
        assert_eq!(same_day.count, 3);

        let next_day = counter.for_date(day2);
        assert_eq!(next_day.count, 0);
        assert_eq!(next_day.super_count, 0);
        assert_eq!(next_day.version, 4);
        assert_eq!(next_day.date, day2);
    }

    #[test]
    fn side_parses_and_flips() {
        assert_eq!("short".parse::<Side>().unwrap(), Side::Short);
        assert_eq!(Side::Short.opposite(), Side::Long);
        assert!("sideways".parse::<Side>().is_err());
    }
}
