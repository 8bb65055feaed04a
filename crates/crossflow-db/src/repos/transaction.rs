//! Transaction repository

use sqlx::PgPool;

use crate::models::DbTransaction;
use crate::{DbError, DbResult};

/// Filters for the transfer listing endpoint
#[derive(Debug, Clone, Default)]
pub struct TransferFilter {
    /// Matches either side of the transfer
    pub address: Option<String>,
    /// 0 = user deposit, 1 = maker reply
    pub side: Option<i16>,
    pub status: Option<i16>,
    /// 1-based page
    pub page: i64,
    pub per_page: i64,
}

impl TransferFilter {
    fn limit(&self) -> i64 {
        self.per_page.clamp(1, 200)
    }

    fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.limit()
    }
}

pub struct TransactionRepo {
    pool: PgPool,
}

impl TransactionRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i64) -> DbResult<Option<DbTransaction>> {
        let row = sqlx::query_as::<_, DbTransaction>(r#"SELECT * FROM "transaction" WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn find_by_hash(
        &self,
        chain_id: i32,
        hash: &str,
    ) -> DbResult<Option<DbTransaction>> {
        let row = sqlx::query_as::<_, DbTransaction>(
            r#"SELECT * FROM "transaction" WHERE chain_id = $1 AND hash = $2"#,
        )
        .bind(chain_id)
        .bind(hash.trim().to_lowercase())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Newest-first page of transfers matching the filter
    pub async fn list(&self, filter: &TransferFilter) -> DbResult<Vec<DbTransaction>> {
        let rows = sqlx::query_as::<_, DbTransaction>(
            r#"
            SELECT * FROM "transaction"
             WHERE ($1::text IS NULL
                    OR lower(from_addr) = lower($1)
                    OR lower(to_addr) = lower($1))
               AND ($2::smallint IS NULL OR side = $2)
               AND ($3::smallint IS NULL OR status = $3)
             ORDER BY id DESC
             LIMIT $4 OFFSET $5
            "#,
        )
        .bind(&filter.address)
        .bind(filter.side)
        .bind(filter.status)
        .bind(filter.limit())
        .bind(filter.offset())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Flip an overdue unpaid deposit to refunded, so it leaves the
    /// refundable tree predicate. Only `Complete` and `TimerMismatch`
    /// deposits are eligible.
    pub async fn mark_refunded(&self, id: i64) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE "transaction"
               SET status = 4, updated_at = NOW()
             WHERE id = $1 AND side = 0 AND status IN (1, 5)
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!(
                "no refundable deposit with id {id}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_is_one_based_and_clamped() {
        let filter = TransferFilter {
            page: 0,
            per_page: 1_000,
            ..Default::default()
        };
        assert_eq!(filter.limit(), 200);
        assert_eq!(filter.offset(), 0);

        let filter = TransferFilter {
            page: 3,
            per_page: 50,
            ..Default::default()
        };
        assert_eq!(filter.offset(), 100);
    }
}
