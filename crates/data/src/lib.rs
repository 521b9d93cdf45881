//! Persistence for the anchor position-risk engine.
//!
//! This crate provides:
//! - `SQLite` connection pool with embedded migrations
//! - [`SqlitePositionStore`], the durable `PositionStore`
//! - [`SqliteConfigProvider`], the single-row market config source
//! - In-memory equivalents for tests and simulation

mod codec;
pub mod database;
pub mod market_config;
pub mod memory_store;
pub mod sqlite_store;

pub use database::Database;
pub use market_config::SqliteConfigProvider;
pub use memory_store::{InMemoryConfigProvider, InMemoryPositionStore};
pub use sqlite_store::SqlitePositionStore;
