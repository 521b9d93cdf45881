use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{ProtectStatus, Side};

/// Failures the engine recovers from locally.
///
/// No variant is fatal to the host: callers skip the cycle, the instrument,
/// or the single decision depending on the kind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Market config could not be read. The whole cycle is skipped.
    #[error("market config unavailable: {0}")]
    ConfigUnavailable(String),

    /// No usable price for the instrument. Only that instrument is skipped.
    #[error("price unavailable for {0}")]
    PriceUnavailable(String),

    /// Capital limits void the decision; nothing is executed.
    #[error("insufficient capital for {instrument}: need {required}, available {available}")]
    InsufficientCapital {
        instrument: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("active anchor already exists for {instrument} {side}")]
    DuplicateAnchor { instrument: String, side: Side },

    #[error("anchor {anchor_id} already has pending protect orders")]
    DuplicateProtectOrders { anchor_id: i64 },

    #[error("all {stages} add stages consumed for {instrument} {side}")]
    StageExhausted {
        instrument: String,
        side: Side,
        stages: usize,
    },

    #[error("daily maintenance cap of {cap} reached for {instrument} {side}")]
    DailyCapReached {
        instrument: String,
        side: Side,
        cap: u32,
    },

    /// A value that may only grow read lower than previously observed.
    #[error("stale reading for {what}: expected at least {expected}, got {actual}")]
    StaleZeroReading {
        what: String,
        expected: Decimal,
        actual: Decimal,
    },

    /// Compare-and-swap lost a race with another writer.
    #[error("version conflict on {0}")]
    Contention(String),

    #[error("size for {instrument} {side} would become {size}")]
    NegativeSize {
        instrument: String,
        side: Side,
        size: Decimal,
    },

    #[error("illegal protect order transition {from} -> {to} for order {id}")]
    InvalidTransition {
        id: i64,
        from: ProtectStatus,
        to: ProtectStatus,
    },

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("position not found: {instrument} {side}")]
    PositionNotFound { instrument: String, side: Side },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store error: {0}")]
    Store(String),
}

impl EngineError {
    /// Whether an immediate retry inside the same cycle may succeed.
    ///
    /// Order failures are never retryable mid-cycle; they are retried on the
    /// next cycle instead.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention(_) | Self::StaleZeroReading { .. })
    }

    /// Short machine-friendly label used in decision records and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConfigUnavailable(_) => "config_unavailable",
            Self::PriceUnavailable(_) => "price_unavailable",
            Self::InsufficientCapital { .. } => "insufficient_capital",
            Self::DuplicateAnchor { .. } => "duplicate_anchor",
            Self::DuplicateProtectOrders { .. } => "duplicate_protect_orders",
            Self::StageExhausted { .. } => "stage_exhausted",
            Self::DailyCapReached { .. } => "daily_cap_reached",
            Self::StaleZeroReading { .. } => "stale_zero_reading",
            Self::Contention(_) => "contention",
            Self::NegativeSize { .. } => "negative_size",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::OrderRejected(_) => "order_rejected",
            Self::PositionNotFound { .. } => "position_not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Store(_) => "store",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
