use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::decision::ExecutionMode;
use crate::types::PressureLevels;

/// Process-level settings. Trading toggles are not here: they live in the
/// store as [`crate::MarketConfig`] and are re-read every cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mode: ExecutionMode,
    pub database: DatabaseConfig,
    pub intervals: IntervalConfig,
    pub anchor: AnchorConfig,
    pub reconciler: ReconcilerConfig,
    pub retry: RetryConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Polling interval per loop, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalConfig {
    pub anchor_trigger_secs: u64,
    pub anchor_marks_secs: u64,
    pub position_cycle_secs: u64,
    pub hedge_close_secs: u64,
    pub maintenance_secs: u64,
    pub protect_orders_secs: u64,
    pub reconciler_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorConfig {
    /// Instruments the trigger evaluator scans.
    pub watchlist: Vec<String>,
    /// An instrument that opened an anchor within this window is refused.
    pub dedup_window_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Size drift tolerated before the reconciler acts.
    pub tolerance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

/// Prices and pressure levels served by the paper price feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub prices: HashMap<String, Decimal>,
    pub levels: HashMap<String, PressureLevels>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::DryRun,
            database: DatabaseConfig::default(),
            intervals: IntervalConfig::default(),
            anchor: AnchorConfig::default(),
            reconciler: ReconcilerConfig::default(),
            retry: RetryConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/anchor_risk.db".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            anchor_trigger_secs: 60,
            anchor_marks_secs: 30,
            position_cycle_secs: 10,
            hedge_close_secs: 10,
            maintenance_secs: 30,
            protect_orders_secs: 10,
            reconciler_secs: 60,
        }
    }
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            watchlist: Vec::new(),
            dedup_window_secs: 300,
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            tolerance: dec!(0.1),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 50,
        }
    }
}
