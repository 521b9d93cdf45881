use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::{GranularityTier, MarginMode, Side};

/// An open position as the engine's policies see it.
///
/// Sizes are notional USDT. `opened_size` is the notional of the opening
/// order and never changes; `size` grows with adds and shrinks with closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    pub side: Side,
    pub opened_size: Decimal,
    pub size: Decimal,
    pub weighted_avg_price: Decimal,
    pub leverage: Decimal,
    pub margin_mode: MarginMode,
    pub granularity_tier: GranularityTier,
    pub is_anchor: bool,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Builds a freshly opened position.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NegativeSize`] when `size` is not positive and
    /// [`EngineError::InvalidInput`] when price or leverage is not positive.
    pub fn open(
        instrument: impl Into<String>,
        side: Side,
        size: Decimal,
        price: Decimal,
        leverage: Decimal,
        margin_mode: MarginMode,
        granularity_tier: GranularityTier,
    ) -> Result<Self, EngineError> {
        let instrument = instrument.into();
        if size <= Decimal::ZERO {
            return Err(EngineError::NegativeSize {
                instrument,
                side,
                size,
            });
        }
        if price <= Decimal::ZERO || leverage <= Decimal::ZERO {
            return Err(EngineError::InvalidInput(format!(
                "{instrument} {side}: price and leverage must be positive"
            )));
        }
        Ok(Self {
            instrument,
            side,
            opened_size: size,
            size,
            weighted_avg_price: price,
            leverage,
            margin_mode,
            granularity_tier,
            is_anchor: false,
            opened_at: Utc::now(),
        })
    }

    #[must_use]
    pub const fn into_anchor(mut self) -> Self {
        self.is_anchor = true;
        self
    }

    /// Margin posted for the position, `size / leverage`.
    #[must_use]
    pub fn margin(&self) -> Decimal {
        if self.leverage.is_zero() {
            return self.size;
        }
        self.size / self.leverage
    }

    /// Leveraged return on margin in percent at `price`.
    ///
    /// A short gains when the price falls: avg 100, price 85, 1x gives +15.
    #[must_use]
    pub fn profit_rate(&self, price: Decimal) -> Decimal {
        profit_rate(self.side, self.weighted_avg_price, price, self.leverage)
    }

    /// Unrealized PnL in USDT at `price`.
    #[must_use]
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        self.margin() * self.profit_rate(price) / dec!(100)
    }

    /// Applies an add at `price`, recomputing the weighted average.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInput`] for a non-positive add size or price.
    pub fn apply_add(&mut self, add_size: Decimal, price: Decimal) -> Result<(), EngineError> {
        if add_size <= Decimal::ZERO || price <= Decimal::ZERO {
            return Err(EngineError::InvalidInput(format!(
                "{} {}: add size and price must be positive",
                self.instrument, self.side
            )));
        }
        let total_cost = self.weighted_avg_price * self.size + price * add_size;
        self.size += add_size;
        self.weighted_avg_price = total_cost / self.size;
        Ok(())
    }

    /// Shrinks the position by `amount`. Returns the remaining size.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NegativeSize`] if `amount` exceeds the current
    /// size, and [`EngineError::InvalidInput`] for a non-positive amount.
    pub fn apply_reduce(&mut self, amount: Decimal) -> Result<Decimal, EngineError> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::InvalidInput(format!(
                "{} {}: reduce amount must be positive",
                self.instrument, self.side
            )));
        }
        let remaining = self.size - amount;
        if remaining < Decimal::ZERO {
            return Err(EngineError::NegativeSize {
                instrument: self.instrument.clone(),
                side: self.side,
                size: remaining,
            });
        }
        self.size = remaining;
        Ok(remaining)
    }
}

/// Leveraged profit rate in percent for a position entered at `entry`.
#[must_use]
pub fn profit_rate(side: Side, entry: Decimal, price: Decimal, leverage: Decimal) -> Decimal {
    if entry.is_zero() {
        return Decimal::ZERO;
    }
    let change = match side {
        Side::Long => (price - entry) / entry,
        Side::Short => (entry - price) / entry,
    };
    change * dec!(100) * leverage
}
