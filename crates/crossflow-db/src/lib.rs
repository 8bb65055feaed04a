//! Crossflow Database Layer
//!
//! PostgreSQL persistence for the two durable tables: `transaction`
//! (observed transfers, the audit trail) and `maker_transaction` (the
//! pairing rows). This crate owns the SQL; the matching engine and the SPV
//! accumulator see it only through their `MatchStore`/`SpvStore` seams,
//! implemented here by [`PgStore`] with one SQL transaction per settle and
//! `SELECT ... FOR UPDATE` row locks on the pairing key.

pub mod config;
pub mod error;
pub mod models;
pub mod repos;
pub mod store;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

pub use config::DatabaseConfig;
pub use error::{DbError, DbResult};
pub use models::*;
pub use repos::*;
pub use store::PgStore;

/// Database connection pool
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        info!("Connecting to PostgreSQL: {}", config.postgres_url_masked());

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.postgres_url)
            .await
            .map_err(|e| DbError::Connection(format!("PostgreSQL: {}", e)))?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> DbResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;
        info!("Migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// The `MatchStore`/`SpvStore` implementation
    pub fn store(&self) -> PgStore {
        PgStore::new(self.pool.clone())
    }

    pub fn transaction_repo(&self) -> TransactionRepo {
        TransactionRepo::new(self.pool.clone())
    }

    pub fn pairing_repo(&self) -> PairingRepo {
        PairingRepo::new(self.pool.clone())
    }
}
