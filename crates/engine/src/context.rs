use std::sync::Arc;

use anchor_risk_core::{
    ConfigProvider, DecisionRecord, OrderExecutor, PositionStore, PriceFeed, RetryPolicy,
};
use tracing::warn;

/// The four collaborators every policy works against, built once per process.
#[derive(Clone)]
pub struct EngineContext {
    pub config: Arc<dyn ConfigProvider>,
    pub prices: Arc<dyn PriceFeed>,
    pub orders: Arc<dyn OrderExecutor>,
    pub store: Arc<dyn PositionStore>,
    pub retry: RetryPolicy,
}

impl EngineContext {
    #[must_use]
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        prices: Arc<dyn PriceFeed>,
        orders: Arc<dyn OrderExecutor>,
        store: Arc<dyn PositionStore>,
    ) -> Self {
        Self {
            config,
            prices,
            orders,
            store,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Persists a live decision. Dry-run records are only returned to the
    /// caller. A journal failure is logged and never fails the decision.
    pub async fn journal(&self, record: &DecisionRecord) {
        if !record.mode.is_live() {
            return;
        }
        if let Err(e) = self.store.record_decision(record).await {
            warn!(
                component = %record.component,
                instrument = %record.instrument,
                error = %e,
                "Failed to journal decision"
            );
        }
    }
}
