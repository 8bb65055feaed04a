//! `MatchStore` and `SpvStore` over PostgreSQL
//!
//! Every settle runs as one SQL transaction. The first statement locks the
//! pairing row (`SELECT ... FOR UPDATE` on the transfer id), which is what
//! serializes a duplicate delivery against an in-flight settle of the same
//! transfer; candidate rows are locked the same way before their status is
//! written. Any failure rolls the whole settle back and surfaces as a
//! retriable store error.

use alloy_primitives::U256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction as PgTxn};

use crossflow_matcher::{DepositPlan, MatchStore, ReplyPlan, SettleOutcome};
use crossflow_spv::{SpvRow, SpvStore};
use crossflow_types::{
    CrossflowError, Pairing, Result, Side, Transaction, TransferRecord, TransferStatus,
};

use crate::error::pg;
use crate::models::{DbPairing, DbSpvRow, DbTransaction};

/// PostgreSQL-backed store driven by the matching engine and the SPV
/// accumulator
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn canonical_value(value: &str) -> String {
    let trimmed = value.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let stripped = trimmed.trim_start_matches('0');
        if stripped.is_empty() {
            return "0".to_string();
        }
        return stripped.to_string();
    }
    trimmed.to_string()
}

fn value_gt(a: &str, b: &str) -> bool {
    let a = U256::from_str_radix(a.trim(), 10);
    let b = U256::from_str_radix(b.trim(), 10);
    matches!((a, b), (Ok(a), Ok(b)) if a > b)
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

async fn fetch_status(txn: &mut PgTxn<'_, Postgres>, id: i64) -> Result<TransferStatus> {
    let code: i16 = sqlx::query_scalar(r#"SELECT status FROM "transaction" WHERE id = $1"#)
        .bind(id)
        .fetch_one(&mut **txn)
        .await
        .map_err(pg)?;
    Ok(TransferStatus::from_code(code).unwrap_or(TransferStatus::Pending))
}

async fn write_status(
    txn: &mut PgTxn<'_, Postgres>,
    id: i64,
    status: TransferStatus,
    side: Option<Side>,
    route: Option<(&str, &str)>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE "transaction"
           SET status = $2,
               side = COALESCE($3, side),
               route_id = COALESCE($4, route_id),
               maker_id = COALESCE($5, maker_id),
               updated_at = NOW()
         WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(status.code())
    .bind(side.map(|s| s.code()))
    .bind(route.map(|(r, _)| r.to_string()))
    .bind(route.map(|(_, m)| m.to_string()))
    .execute(&mut **txn)
    .await
    .map_err(pg)?;
    Ok(())
}

/// Matched(99) over anything not already terminal-late; MatchedLate sticks.
async fn promote_matched(txn: &mut PgTxn<'_, Postgres>, ids: Vec<i64>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE "transaction"
           SET status = 99, updated_at = NOW()
         WHERE id = ANY($1) AND status NOT IN (98, 99)
        "#,
    )
    .bind(ids)
    .execute(&mut **txn)
    .await
    .map_err(pg)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn upsert_pairing(
    txn: &mut PgTxn<'_, Postgres>,
    plan_transfer_id: &str,
    in_id: Option<i64>,
    out_id: Option<i64>,
    from_chain: u32,
    to_chain: u32,
    expect_value: &str,
    reply_sender: &str,
    reply_account: &str,
) -> Result<DbPairing> {
    sqlx::query_as(
        r#"
        INSERT INTO maker_transaction
            (transfer_id, in_id, out_id, from_chain, to_chain,
             expect_value, reply_sender, reply_account)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (transfer_id) DO UPDATE
           SET in_id = EXCLUDED.in_id,
               out_id = EXCLUDED.out_id,
               from_chain = EXCLUDED.from_chain,
               to_chain = EXCLUDED.to_chain,
               expect_value = EXCLUDED.expect_value,
               reply_sender = EXCLUDED.reply_sender,
               reply_account = EXCLUDED.reply_account,
               updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(plan_transfer_id)
    .bind(in_id)
    .bind(out_id)
    .bind(from_chain as i32)
    .bind(to_chain as i32)
    .bind(expect_value)
    .bind(reply_sender)
    .bind(reply_account)
    .fetch_one(&mut **txn)
    .await
    .map_err(pg)
}

#[async_trait]
impl MatchStore for PgStore {
    async fn record_transaction(&self, record: &TransferRecord) -> Result<Transaction> {
        let hash = record.hash.trim().to_lowercase();
        let inserted: Option<DbTransaction> = sqlx::query_as(
            r#"
            INSERT INTO "transaction"
                (chain_id, hash, from_addr, to_addr, symbol, token, value,
                 nonce, timestamp, memo, reply_sender, reply_account, extra)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (chain_id, hash) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(record.chain_id as i32)
        .bind(&hash)
        .bind(record.from.trim())
        .bind(record.to.trim())
        .bind(record.symbol.trim())
        .bind(record.token.trim())
        .bind(canonical_value(&record.value))
        .bind(record.nonce as i64)
        .bind(record.timestamp)
        .bind(&record.memo)
        .bind(&record.reply_sender)
        .bind(&record.reply_account)
        .bind(&record.extra)
        .fetch_optional(&self.pool)
        .await
        .map_err(pg)?;

        if let Some(row) = inserted {
            return Ok(row.into());
        }
        // redelivery: hand back the stored row untouched
        let existing: DbTransaction =
            sqlx::query_as(r#"SELECT * FROM "transaction" WHERE chain_id = $1 AND hash = $2"#)
                .bind(record.chain_id as i32)
                .bind(&hash)
                .fetch_one(&self.pool)
                .await
                .map_err(pg)?;
        Ok(existing.into())
    }

    async fn transaction_by_id(&self, id: i64) -> Result<Option<Transaction>> {
        let row: Option<DbTransaction> =
            sqlx::query_as(r#"SELECT * FROM "transaction" WHERE id = $1"#)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(pg)?;
        Ok(row.map(Into::into))
    }

    async fn transaction_by_hash(
        &self,
        chain_id: u32,
        hash: &str,
    ) -> Result<Option<Transaction>> {
        let row: Option<DbTransaction> =
            sqlx::query_as(r#"SELECT * FROM "transaction" WHERE chain_id = $1 AND hash = $2"#)
                .bind(chain_id as i32)
                .bind(hash.trim().to_lowercase())
                .fetch_optional(&self.pool)
                .await
                .map_err(pg)?;
        Ok(row.map(Into::into))
    }

    async fn mark_status(
        &self,
        id: i64,
        side: Option<Side>,
        status: TransferStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE "transaction"
               SET status = $2, side = COALESCE($3, side), updated_at = NOW()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.code())
        .bind(side.map(|s| s.code()))
        .execute(&self.pool)
        .await
        .map_err(pg)?;
        Ok(())
    }

    async fn pairing_by_transfer_id(&self, transfer_id: &str) -> Result<Option<Pairing>> {
        let row: Option<DbPairing> =
            sqlx::query_as(r#"SELECT * FROM maker_transaction WHERE transfer_id = $1"#)
                .bind(transfer_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(pg)?;
        Ok(row.map(Into::into))
    }

    async fn force_matched(&self, pairing: &Pairing) -> Result<()> {
        let ids: Vec<i64> = [pairing.in_id, pairing.out_id]
            .into_iter()
            .flatten()
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE "transaction"
               SET status = 99, updated_at = NOW()
             WHERE id = ANY($1) AND status NOT IN (98, 99)
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(pg)?;
        Ok(())
    }

    async fn settle_deposit(
        &self,
        deposit: &Transaction,
        plan: &DepositPlan,
    ) -> Result<SettleOutcome> {
        let mut txn = self.pool.begin().await.map_err(pg)?;

        let pairing: Option<DbPairing> =
            sqlx::query_as(r#"SELECT * FROM maker_transaction WHERE transfer_id = $1 FOR UPDATE"#)
                .bind(&plan.transfer_id)
                .fetch_optional(&mut *txn)
                .await
                .map_err(pg)?;

        if let Some(p) = &pairing {
            if let Some(in_id) = p.in_id {
                if in_id != deposit.id {
                    return Err(CrossflowError::AlreadyPaired {
                        transfer_id: plan.transfer_id.clone(),
                    });
                }
            }
            if let (Some(in_id), Some(out_id)) = (p.in_id, p.out_id) {
                promote_matched(&mut txn, vec![in_id, out_id]).await?;
                let status = fetch_status(&mut txn, deposit.id).await?;
                let pairing: Pairing = p.clone().into();
                txn.commit().await.map_err(pg)?;
                return Ok(SettleOutcome {
                    status,
                    pairing,
                    counterpart_id: Some(out_id),
                });
            }
        }

        // Oldest qualifying reply wins; the row lock keeps a concurrent
        // settle from claiming the same reply.
        let reply: Option<DbTransaction> = sqlx::query_as(
            r#"
            SELECT * FROM "transaction"
             WHERE chain_id = $1
               AND status = 1
               AND lower(from_addr) = lower($2)
               AND lower(to_addr) = lower($3)
               AND lower(symbol) = lower($4)
               AND (CASE WHEN btrim(memo) ~ '^[0-9]{1,18}$'
                         THEN btrim(memo)::bigint END) = $5
               AND value = $6
               AND timestamp >= $7
             ORDER BY timestamp ASC, id ASC
             LIMIT 1
             FOR UPDATE
            "#,
        )
        .bind(plan.to_chain as i32)
        .bind(&plan.reply_sender)
        .bind(&plan.reply_account)
        .bind(&plan.to_symbol)
        .bind(deposit.nonce as i64)
        .bind(&plan.expect_value)
        .bind(from_unix(plan.min_reply_unix))
        .fetch_optional(&mut *txn)
        .await
        .map_err(pg)?;

        let outcome = match reply {
            Some(reply) => {
                let delay = reply.timestamp.timestamp() - deposit.unix_time();
                let status = if delay > plan.max_receipt_secs {
                    TransferStatus::MatchedLate
                } else {
                    TransferStatus::Matched
                };
                write_status(
                    &mut txn,
                    deposit.id,
                    status,
                    Some(Side::User),
                    Some((&plan.route_id, &plan.maker_id)),
                )
                .await?;
                write_status(&mut txn, reply.id, status, Some(Side::Maker), None).await?;
                let pairing = upsert_pairing(
                    &mut txn,
                    &plan.transfer_id,
                    Some(deposit.id),
                    Some(reply.id),
                    plan.from_chain,
                    plan.to_chain,
                    &plan.expect_value,
                    &plan.reply_sender,
                    &plan.reply_account,
                )
                .await?;
                SettleOutcome {
                    status,
                    pairing: pairing.into(),
                    counterpart_id: Some(reply.id),
                }
            }
            None => {
                write_status(
                    &mut txn,
                    deposit.id,
                    TransferStatus::Complete,
                    Some(Side::User),
                    Some((&plan.route_id, &plan.maker_id)),
                )
                .await?;
                // a stale out-only slot is cleared here: the recorded reply
                // did not survive the search above
                let pairing = upsert_pairing(
                    &mut txn,
                    &plan.transfer_id,
                    Some(deposit.id),
                    None,
                    plan.from_chain,
                    plan.to_chain,
                    &plan.expect_value,
                    &plan.reply_sender,
                    &plan.reply_account,
                )
                .await?;
                SettleOutcome {
                    status: TransferStatus::Complete,
                    pairing: pairing.into(),
                    counterpart_id: None,
                }
            }
        };

        txn.commit().await.map_err(pg)?;
        Ok(outcome)
    }

    async fn settle_reply(&self, reply: &Transaction, plan: &ReplyPlan) -> Result<SettleOutcome> {
        let mut txn = self.pool.begin().await.map_err(pg)?;

        let pairing: Option<DbPairing> =
            sqlx::query_as(r#"SELECT * FROM maker_transaction WHERE transfer_id = $1 FOR UPDATE"#)
                .bind(&plan.transfer_id)
                .fetch_optional(&mut *txn)
                .await
                .map_err(pg)?;

        let route = Some((plan.route_id.as_str(), plan.maker_id.as_str()));

        let outcome = match pairing {
            None => {
                write_status(
                    &mut txn,
                    reply.id,
                    TransferStatus::Complete,
                    Some(Side::Maker),
                    route,
                )
                .await?;
                // first reply to claim the transfer holds the slot; a racing
                // insert keeps whichever out_id landed first
                let pairing: DbPairing = sqlx::query_as(
                    r#"
                    INSERT INTO maker_transaction
                        (transfer_id, out_id, from_chain, to_chain,
                         expect_value, reply_sender, reply_account)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (transfer_id) DO UPDATE
                       SET out_id = COALESCE(maker_transaction.out_id, EXCLUDED.out_id),
                           updated_at = NOW()
                    RETURNING *
                    "#,
                )
                .bind(&plan.transfer_id)
                .bind(reply.id)
                .bind(plan.from_chain as i32)
                .bind(plan.to_chain as i32)
                .bind(&reply.value)
                .bind(&reply.from)
                .bind(&reply.to)
                .fetch_one(&mut *txn)
                .await
                .map_err(pg)?;
                SettleOutcome {
                    status: TransferStatus::Complete,
                    pairing: pairing.into(),
                    counterpart_id: None,
                }
            }
            Some(p) if p.in_id.is_some() && p.out_id.is_some() => {
                if p.out_id == Some(reply.id) {
                    promote_matched(&mut txn, vec![p.in_id.unwrap_or(0), reply.id]).await?;
                    let status = fetch_status(&mut txn, reply.id).await?;
                    SettleOutcome {
                        status,
                        counterpart_id: p.in_id,
                        pairing: p.into(),
                    }
                } else {
                    // settled by a different reply; this one stays an
                    // unmatched maker payment
                    write_status(
                        &mut txn,
                        reply.id,
                        TransferStatus::Complete,
                        Some(Side::Maker),
                        route,
                    )
                    .await?;
                    SettleOutcome {
                        status: TransferStatus::Complete,
                        pairing: p.into(),
                        counterpart_id: None,
                    }
                }
            }
            Some(p) if p.in_id.is_some() => {
                let in_id = p.in_id.unwrap_or(0);
                let deposit: Option<DbTransaction> =
                    sqlx::query_as(r#"SELECT * FROM "transaction" WHERE id = $1 FOR UPDATE"#)
                        .bind(in_id)
                        .fetch_optional(&mut *txn)
                        .await
                        .map_err(pg)?;
                let qualifying = deposit.filter(|d| {
                    d.status == TransferStatus::Complete.code()
                        && d.timestamp.timestamp() <= plan.max_deposit_unix
                        && value_gt(&reply.value, &p.expect_value)
                });
                match qualifying {
                    Some(deposit) => {
                        let delay = reply.unix_time() - deposit.timestamp.timestamp();
                        let status = if delay > plan.max_receipt_secs {
                            TransferStatus::MatchedLate
                        } else {
                            TransferStatus::Matched
                        };
                        write_status(&mut txn, deposit.id, status, Some(Side::User), None)
                            .await?;
                        write_status(&mut txn, reply.id, status, Some(Side::Maker), route)
                            .await?;
                        let pairing: DbPairing = sqlx::query_as(
                            r#"
                            UPDATE maker_transaction
                               SET out_id = $2, updated_at = NOW()
                             WHERE transfer_id = $1
                            RETURNING *
                            "#,
                        )
                        .bind(&plan.transfer_id)
                        .bind(reply.id)
                        .fetch_one(&mut *txn)
                        .await
                        .map_err(pg)?;
                        SettleOutcome {
                            status,
                            pairing: pairing.into(),
                            counterpart_id: Some(deposit.id),
                        }
                    }
                    None => {
                        write_status(
                            &mut txn,
                            reply.id,
                            TransferStatus::Complete,
                            Some(Side::Maker),
                            route,
                        )
                        .await?;
                        SettleOutcome {
                            status: TransferStatus::Complete,
                            pairing: p.into(),
                            counterpart_id: None,
                        }
                    }
                }
            }
            Some(p) => {
                // out-only slot held by another reply (or this one redelivered)
                write_status(
                    &mut txn,
                    reply.id,
                    TransferStatus::Complete,
                    Some(Side::Maker),
                    route,
                )
                .await?;
                SettleOutcome {
                    status: TransferStatus::Complete,
                    pairing: p.into(),
                    counterpart_id: None,
                }
            }
        };

        txn.commit().await.map_err(pg)?;
        Ok(outcome)
    }
}

#[async_trait]
impl SpvStore for PgStore {
    async fn overdue_deposits(
        &self,
        chain_id: u32,
        after_id: i64,
        overdue_before: i64,
    ) -> Result<Vec<SpvRow>> {
        let rows: Vec<DbSpvRow> = sqlx::query_as(
            r#"
            SELECT t.*, m.expect_value AS pair_expect_value
              FROM "transaction" t
              LEFT JOIN maker_transaction m ON m.in_id = t.id
             WHERE t.chain_id = $1
               AND t.side = 0
               AND t.status IN (1, 5)
               AND t.id > $2
               AND t.timestamp < $3
             ORDER BY t.id ASC
            "#,
        )
        .bind(chain_id as i32)
        .bind(after_id)
        .bind(from_unix(overdue_before))
        .fetch_all(&self.pool)
        .await
        .map_err(pg)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let expect_value = row
                    .pair_expect_value
                    .unwrap_or_else(|| row.tx.value.clone());
                SpvRow {
                    tx: row.tx.into(),
                    expect_value,
                }
            })
            .collect())
    }

    async fn delayed_replies(&self, chain_id: u32, after_id: i64) -> Result<Vec<SpvRow>> {
        let rows: Vec<DbSpvRow> = sqlx::query_as(
            r#"
            SELECT t.*, m.expect_value AS pair_expect_value
              FROM "transaction" t
              LEFT JOIN maker_transaction m ON m.out_id = t.id
             WHERE t.chain_id = $1
               AND t.side = 1
               AND t.status = 98
               AND t.id > $2
             ORDER BY t.id ASC
            "#,
        )
        .bind(chain_id as i32)
        .bind(after_id)
        .fetch_all(&self.pool)
        .await
        .map_err(pg)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let expect_value = row
                    .pair_expect_value
                    .unwrap_or_else(|| row.tx.value.clone());
                SpvRow {
                    tx: row.tx.into(),
                    expect_value,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_canonicalized_before_storage() {
        assert_eq!(canonical_value(" 0100 "), "100");
        assert_eq!(canonical_value("000"), "0");
        assert_eq!(canonical_value("100000002"), "100000002");
        // non-numeric input passes through for validation to reject later
        assert_eq!(canonical_value("12e4"), "12e4");
    }

    #[test]
    fn strictly_greater_comparison_is_numeric() {
        assert!(value_gt("100000008", "100000007"));
        assert!(!value_gt("100000007", "100000007"));
        assert!(!value_gt("99", "100"));
        // lexicographic ordering would get this wrong
        assert!(value_gt("1000", "999"));
    }
}
