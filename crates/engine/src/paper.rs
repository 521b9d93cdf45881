//! Paper collaborators for simulation runs and tests.
//!
//! `PaperOrderExecutor` keeps its own exchange-side book so the reconciler has
//! something independent of the store to compare against. `StaticPriceFeed`
//! serves prices and pressure levels set by the caller.

use std::collections::HashMap;
use std::time::Duration;

use anchor_risk_core::{
    EngineError, EngineResult, ExchangePosition, OrderAck, OrderAction, OrderExecutor,
    OrderRequest, PressureLevels, PriceFeed, Side, SimulationConfig,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperExecutorConfig {
    /// Leverage assumed for pairs that never had one set.
    pub default_leverage: Decimal,

    /// Simulated latency in milliseconds.
    /// Default: 0 (no latency)
    pub simulate_latency_ms: u64,
}

impl Default for PaperExecutorConfig {
    fn default() -> Self {
        Self {
            default_leverage: dec!(10),
            simulate_latency_ms: 0,
        }
    }
}

impl PaperExecutorConfig {
    #[must_use]
    pub fn with_leverage(default_leverage: Decimal) -> Self {
        Self {
            default_leverage,
            ..Default::default()
        }
    }

    /// Sets the simulated latency.
    #[must_use]
    pub const fn latency_ms(mut self, ms: u64) -> Self {
        self.simulate_latency_ms = ms;
        self
    }
}

// =============================================================================
// Order executor
// =============================================================================

type Key = (String, Side);

#[derive(Default)]
struct Book {
    positions: HashMap<Key, ExchangePosition>,
    leverage: HashMap<Key, Decimal>,
    history: Vec<(OrderRequest, OrderAck)>,
    reject_remaining: u32,
    fill_cap: Option<Decimal>,
}

pub struct PaperOrderExecutor {
    config: PaperExecutorConfig,
    book: RwLock<Book>,
}

impl PaperOrderExecutor {
    #[must_use]
    pub fn new(config: PaperExecutorConfig) -> Self {
        Self {
            config,
            book: RwLock::new(Book::default()),
        }
    }

    /// Puts a position on the simulated exchange without an order.
    pub fn seed_position(&self, position: ExchangePosition) {
        let mut book = self.book.write();
        let key = (position.instrument.clone(), position.side);
        book.leverage.insert(key.clone(), position.leverage);
        book.positions.insert(key, position);
    }

    /// Rejects the next `n` orders.
    pub fn reject_next(&self, n: u32) {
        self.book.write().reject_remaining = n;
    }

    /// Fills the next order for at most `size`.
    pub fn cap_next_fill(&self, size: Decimal) {
        self.book.write().fill_cap = Some(size);
    }

    /// Every filled order, oldest first.
    #[must_use]
    pub fn filled_orders(&self) -> Vec<OrderRequest> {
        self.book.read().history.iter().map(|(req, _)| req.clone()).collect()
    }

    #[must_use]
    pub fn exchange_size(&self, instrument: &str, side: Side) -> Decimal {
        self.book
            .read()
            .positions
            .get(&(instrument.to_string(), side))
            .map_or(Decimal::ZERO, |p| p.size)
    }

    fn fill(&self, order: &OrderRequest) -> EngineResult<OrderAck> {
        let mut book = self.book.write();

        if book.reject_remaining > 0 {
            book.reject_remaining -= 1;
            return Err(EngineError::OrderRejected(format!(
                "simulated rejection for {} {}",
                order.instrument, order.side
            )));
        }
        if order.size <= Decimal::ZERO {
            return Err(EngineError::OrderRejected(format!("non-positive size {}", order.size)));
        }

        let filled = book.fill_cap.take().map_or(order.size, |cap| cap.min(order.size));
        let key = (order.instrument.clone(), order.side);
        let leverage = book
            .leverage
            .get(&key)
            .copied()
            .unwrap_or(self.config.default_leverage);

        match order.action {
            OrderAction::Open => {
                let entry = book.positions.entry(key).or_insert_with(|| ExchangePosition {
                    instrument: order.instrument.clone(),
                    side: order.side,
                    size: Decimal::ZERO,
                    margin_mode: order.margin_mode,
                    leverage,
                });
                entry.size += filled;
            }
            OrderAction::Close => {
                let held = book.positions.get(&key).map_or(Decimal::ZERO, |p| p.size);
                if order.size > held {
                    return Err(EngineError::OrderRejected(format!(
                        "reduce-only {} exceeds held {held} for {} {}",
                        order.size, order.instrument, order.side
                    )));
                }
                if filled == held {
                    book.positions.remove(&key);
                } else if let Some(pos) = book.positions.get_mut(&key) {
                    pos.size -= filled;
                }
            }
        }

        let ack = OrderAck {
            order_id: Uuid::new_v4().to_string(),
            filled_size: filled,
        };
        book.history.push((order.clone(), ack.clone()));
        Ok(ack)
    }
}

impl Default for PaperOrderExecutor {
    fn default() -> Self {
        Self::new(PaperExecutorConfig::default())
    }
}

#[async_trait]
impl OrderExecutor for PaperOrderExecutor {
    async fn place_order(&self, order: &OrderRequest) -> EngineResult<OrderAck> {
        if self.config.simulate_latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.simulate_latency_ms)).await;
        }
        let ack = self.fill(order)?;
        tracing::debug!(
            instrument = %order.instrument,
            side = %order.side,
            action = %order.action,
            size = %order.size,
            order_id = %ack.order_id,
            "Paper order filled"
        );
        Ok(ack)
    }

    async fn get_exchange_positions(&self) -> EngineResult<Vec<ExchangePosition>> {
        let mut positions: Vec<ExchangePosition> = self.book.read().positions.values().cloned().collect();
        positions.sort_by(|a, b| a.instrument.cmp(&b.instrument).then(a.side.cmp(&b.side)));
        Ok(positions)
    }

    async fn get_leverage(&self, instrument: &str, side: Side) -> EngineResult<Decimal> {
        Ok(self
            .book
            .read()
            .leverage
            .get(&(instrument.to_string(), side))
            .copied()
            .unwrap_or(self.config.default_leverage))
    }

    async fn set_leverage(&self, instrument: &str, side: Side, leverage: Decimal) -> EngineResult<()> {
        if leverage <= Decimal::ZERO {
            return Err(EngineError::OrderRejected(format!("invalid leverage {leverage}")));
        }
        let mut book = self.book.write();
        let key = (instrument.to_string(), side);
        if let Some(pos) = book.positions.get_mut(&key) {
            pos.leverage = leverage;
        }
        book.leverage.insert(key, leverage);
        Ok(())
    }
}

// =============================================================================
// Price feed
// =============================================================================

#[derive(Default)]
pub struct StaticPriceFeed {
    prices: RwLock<HashMap<String, Decimal>>,
    levels: RwLock<HashMap<String, PressureLevels>>,
}

impl StaticPriceFeed {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_simulation(config: &SimulationConfig) -> Self {
        Self {
            prices: RwLock::new(config.prices.clone()),
            levels: RwLock::new(config.levels.clone()),
        }
    }

    pub fn set_price(&self, instrument: &str, price: Decimal) {
        self.prices.write().insert(instrument.to_string(), price);
    }

    pub fn set_levels(&self, instrument: &str, levels: PressureLevels) {
        self.levels.write().insert(instrument.to_string(), levels);
    }

    pub fn remove_price(&self, instrument: &str) {
        self.prices.write().remove(instrument);
    }
}

#[async_trait]
impl PriceFeed for StaticPriceFeed {
    async fn get_current_price(&self, instrument: &str) -> EngineResult<Decimal> {
        self.prices
            .read()
            .get(instrument)
            .copied()
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| EngineError::PriceUnavailable(instrument.to_string()))
    }

    async fn get_pressure_levels(&self, instrument: &str) -> EngineResult<PressureLevels> {
        Ok(self.levels.read().get(instrument).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_risk_core::MarginMode;

    #[tokio::test]
    async fn reduce_only_cannot_flip_a_position() {
        let exec = PaperOrderExecutor::default();
        exec.place_order(&OrderRequest::open("DOGE-USDT-SWAP", Side::Short, dec!(10), MarginMode::Cross, "t"))
            .await
            .unwrap();
        let over = exec
            .place_order(&OrderRequest::close("DOGE-USDT-SWAP", Side::Short, dec!(11), MarginMode::Cross, "t"))
            .await;
        assert!(matches!(over, Err(EngineError::OrderRejected(_))));
        assert_eq!(exec.exchange_size("DOGE-USDT-SWAP", Side::Short), dec!(10));

        exec.place_order(&OrderRequest::close("DOGE-USDT-SWAP", Side::Short, dec!(10), MarginMode::Cross, "t"))
            .await
            .unwrap();
        assert!(exec.get_exchange_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scripted_rejections() {
        let exec = PaperOrderExecutor::default();
        exec.reject_next(1);
        let order = OrderRequest::open("SOL-USDT-SWAP", Side::Long, dec!(5), MarginMode::Isolated, "t");
        assert!(exec.place_order(&order).await.is_err());
        assert!(exec.place_order(&order).await.is_ok());
        assert_eq!(exec.filled_orders().len(), 1);
    }

    #[tokio::test]
    async fn leverage_defaults_and_updates() {
        let exec = PaperOrderExecutor::new(PaperExecutorConfig::with_leverage(dec!(5)));
        assert_eq!(exec.get_leverage("SOL-USDT-SWAP", Side::Long).await.unwrap(), dec!(5));
        exec.set_leverage("SOL-USDT-SWAP", Side::Long, dec!(10)).await.unwrap();
        assert_eq!(exec.get_leverage("SOL-USDT-SWAP", Side::Long).await.unwrap(), dec!(10));
    }

    #[tokio::test]
    async fn missing_price_is_unavailable() {
        let feed = StaticPriceFeed::new();
        feed.set_price("SOL-USDT-SWAP", dec!(150));
        assert_eq!(feed.get_current_price("SOL-USDT-SWAP").await.unwrap(), dec!(150));
        assert!(matches!(
            feed.get_current_price("PEPE-USDT-SWAP").await,
            Err(EngineError::PriceUnavailable(_))
        ));
        feed.set_price("PEPE-USDT-SWAP", dec!(0));
        assert!(feed.get_current_price("PEPE-USDT-SWAP").await.is_err());
    }
}
