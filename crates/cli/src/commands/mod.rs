//! CLI commands for the anchor position-risk engine.

pub mod engine;
pub mod init_db;

pub use engine::{run_engine, run_scan, show_config, ConfigArgs, ScanArgs};
pub use init_db::{run_init_db, InitDbArgs};
