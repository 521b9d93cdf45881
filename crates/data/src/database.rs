use std::str::FromStr;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::market_config::SqliteConfigProvider;
use crate::sqlite_store::SqlitePositionStore;

/// `SQLite` connection pool with the engine schema applied.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database and runs migrations.
    ///
    /// # Arguments
    ///
    /// * `database_url` - `SQLite` database path (e.g., `<sqlite://data/anchor_risk.db>`)
    /// * `max_connections` - pool size
    ///
    /// # Errors
    ///
    /// Returns error if connection fails or migrations fail.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!(url = database_url, "Database ready");
        Ok(Self { pool })
    }

    /// Creates an in-memory database, used by tests and dry-run replays.
    ///
    /// A single connection keeps every query on the same in-memory schema.
    ///
    /// # Errors
    ///
    /// Returns error if connection fails.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[must_use]
    pub fn position_store(&self) -> SqlitePositionStore {
        SqlitePositionStore::new(self.pool.clone())
    }

    #[must_use]
    pub fn config_provider(&self) -> SqliteConfigProvider {
        SqliteConfigProvider::new(self.pool.clone())
    }
}
