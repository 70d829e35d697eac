//! Storage substrate (C1): an embedded SQLite database reached through a
//! connection pool, foreign-key enforcement on by default, one handle per
//! process (spec §5 "the graph is the sole shared resource").

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::{GraphError, Result};

#[derive(Clone)]
pub struct Db {
    pub(crate) pool: SqlitePool,
}

impl Db {
    /// Open (creating if absent) the database file at `path`. Foreign-key
    /// enforcement is on; callers never see a partially-enforced schema
    /// except during the pivotal migration, which suspends and restores it
    /// inside its own transaction (spec §5).
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| GraphError::Storage(sqlx::Error::Configuration(e.into())))?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// In-memory database, useful for tests: each call gets its own store.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(|e| GraphError::Storage(sqlx::Error::Configuration(e.into())))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
