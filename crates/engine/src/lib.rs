//! Deterministic position-risk policies for a leveraged-derivatives book.
//!
//! Runs as a set of independent polling loops that:
//! - Open small anchor shorts on overextended coins and guard them with
//!   protect orders
//! - Average down along a per-tier DCA ladder
//! - Take profit along a regime-dependent ladder, and stop out hard losses
//! - Cut the losing side of a two-sided instrument
//! - Rescue small positions sliding into loss (margin maintenance)
//! - Audit the store against the exchange
//!
//! No discretion in the execution path: every rule is a table in [`rules`].

pub mod add_policy;
pub mod anchor_lifecycle;
pub mod anchor_trigger;
pub mod context;
pub mod executor;
pub mod hedge_close;
pub mod loss_stop;
pub mod maintenance;
pub mod paper;
pub mod position_cycle;
pub mod profit_tiers;
pub mod protect_orders;
pub mod reconciler;
pub mod rules;
pub mod service;
pub mod types;

#[cfg(test)]
mod test_support;

pub use context::EngineContext;
pub use paper::{PaperExecutorConfig, PaperOrderExecutor, StaticPriceFeed};
pub use service::{run, run_once, Component, PolicyLoop};
