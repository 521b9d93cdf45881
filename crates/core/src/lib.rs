pub mod config;
pub mod config_loader;
pub mod decision;
pub mod error;
pub mod position;
pub mod retry;
pub mod traits;
pub mod types;

pub use config::{
    AnchorConfig, DatabaseConfig, EngineConfig, IntervalConfig, ReconcilerConfig, RetryConfig,
    SimulationConfig,
};
pub use config_loader::ConfigLoader;
pub use decision::{DecisionLog, DecisionRecord, ExecutionMode, Outcome};
pub use error::{EngineError, EngineResult};
pub use position::{profit_rate, Position};
pub use retry::{ensure_monotonic, read_monotonic, retry_on_contention, RetryPolicy};
pub use traits::{ConfigProvider, OrderExecutor, PositionStore, PriceFeed};
pub use types::{
    AddRecord, AnchorPosition, AnchorStatus, ExchangePosition, GranularityTier, MaintenanceCounter,
    MarginMode, MarketConfig, OrderAck, OrderAction, OrderRequest, PressureLevels, ProtectOrder,
    ProtectOrderKind, ProtectStatus, Side, TriggerState,
};
