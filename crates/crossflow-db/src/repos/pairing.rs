//! Pairing repository

use sqlx::PgPool;

use crate::models::DbPairing;
use crate::DbResult;

pub struct PairingRepo {
    pool: PgPool,
}

impl PairingRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, transfer_id: &str) -> DbResult<Option<DbPairing>> {
        let row = sqlx::query_as::<_, DbPairing>(
            "SELECT * FROM maker_transaction WHERE transfer_id = $1",
        )
        .bind(transfer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Pairing referencing a transaction from either side
    pub async fn find_by_transaction(&self, tx_id: i64) -> DbResult<Option<DbPairing>> {
        let row = sqlx::query_as::<_, DbPairing>(
            "SELECT * FROM maker_transaction WHERE in_id = $1 OR out_id = $1",
        )
        .bind(tx_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_recent(&self, limit: i64) -> DbResult<Vec<DbPairing>> {
        let rows = sqlx::query_as::<_, DbPairing>(
            "SELECT * FROM maker_transaction ORDER BY updated_at DESC LIMIT $1",
        )
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
