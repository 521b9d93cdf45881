//! Shared fixtures for unit tests.

use std::sync::Arc;

use anchor_risk_core::{
    ExchangePosition, GranularityTier, MarginMode, MarketConfig, Position, PositionStore,
    RetryPolicy, Side,
};
use anchor_risk_data::{InMemoryConfigProvider, InMemoryPositionStore};
use rust_decimal::Decimal;

use crate::context::EngineContext;
use crate::paper::{PaperOrderExecutor, StaticPriceFeed};

pub struct Harness {
    pub store: Arc<InMemoryPositionStore>,
    pub config: Arc<InMemoryConfigProvider>,
    pub prices: Arc<StaticPriceFeed>,
    pub orders: Arc<PaperOrderExecutor>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(MarketConfig::default())
    }

    pub fn with_config(config: MarketConfig) -> Self {
        Self {
            store: Arc::new(InMemoryPositionStore::new()),
            config: Arc::new(InMemoryConfigProvider::new(config)),
            prices: Arc::new(StaticPriceFeed::new()),
            orders: Arc::new(PaperOrderExecutor::default()),
        }
    }

    pub fn ctx(&self) -> EngineContext {
        EngineContext::new(
            self.config.clone(),
            self.prices.clone(),
            self.orders.clone(),
            self.store.clone(),
        )
        .with_retry(RetryPolicy::immediate(3))
    }

    /// Opens a position in both the store and the paper exchange.
    pub async fn open(
        &self,
        instrument: &str,
        side: Side,
        size: Decimal,
        price: Decimal,
        leverage: Decimal,
        tier: GranularityTier,
    ) -> Position {
        let pos = Position::open(instrument, side, size, price, leverage, MarginMode::Cross, tier)
            .expect("valid position");
        self.seed(&pos).await;
        pos
    }

    pub async fn open_anchor(&self, instrument: &str, size: Decimal, price: Decimal, leverage: Decimal) -> Position {
        let pos = Position::open(
            instrument,
            Side::Short,
            size,
            price,
            leverage,
            MarginMode::Cross,
            GranularityTier::Small,
        )
        .expect("valid position")
        .into_anchor();
        self.seed(&pos).await;
        pos
    }

    async fn seed(&self, pos: &Position) {
        self.store.open_position(pos).await.expect("open in store");
        self.orders.seed_position(ExchangePosition {
            instrument: pos.instrument.clone(),
            side: pos.side,
            size: pos.size,
            margin_mode: pos.margin_mode,
            leverage: pos.leverage,
        });
    }

    pub async fn size_of(&self, instrument: &str, side: Side) -> Option<Decimal> {
        self.store
            .get_position(instrument, side)
            .await
            .expect("store read")
            .map(|p| p.size)
    }
}
