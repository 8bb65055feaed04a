//! Database models - mapped from the PostgreSQL tables

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crossflow_types::{Pairing, Side, Transaction, TransferStatus};

/// Row of the `transaction` table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbTransaction {
    pub id: i64,
    pub chain_id: i32,
    pub hash: String,
    pub from_addr: String,
    pub to_addr: String,
    pub symbol: String,
    pub token: String,
    pub value: String,
    pub nonce: i64,
    pub timestamp: DateTime<Utc>,
    pub status: i16,
    pub side: i16,
    pub memo: Option<String>,
    pub reply_sender: Option<String>,
    pub reply_account: Option<String>,
    pub route_id: Option<String>,
    pub maker_id: Option<String>,
    pub extra: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbTransaction> for Transaction {
    fn from(row: DbTransaction) -> Self {
        Transaction {
            id: row.id,
            chain_id: row.chain_id as u32,
            hash: row.hash,
            from: row.from_addr,
            to: row.to_addr,
            symbol: row.symbol,
            token: row.token,
            value: row.value,
            nonce: row.nonce as u64,
            timestamp: row.timestamp,
            status: TransferStatus::from_code(row.status).unwrap_or(TransferStatus::Pending),
            side: Side::from_code(row.side).unwrap_or(Side::User),
            memo: row.memo,
            reply_sender: row.reply_sender,
            reply_account: row.reply_account,
            route_id: row.route_id,
            maker_id: row.maker_id,
            extra: row.extra,
        }
    }
}

/// Row of the `maker_transaction` table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbPairing {
    pub transfer_id: String,
    pub in_id: Option<i64>,
    pub out_id: Option<i64>,
    pub from_chain: i32,
    pub to_chain: i32,
    pub expect_value: String,
    pub reply_sender: String,
    pub reply_account: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbPairing> for Pairing {
    fn from(row: DbPairing) -> Self {
        Pairing {
            transfer_id: row.transfer_id,
            in_id: row.in_id,
            out_id: row.out_id,
            from_chain: row.from_chain as u32,
            to_chain: row.to_chain as u32,
            expect_value: row.expect_value,
            reply_sender: row.reply_sender,
            reply_account: row.reply_account,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// `transaction` joined with its pairing's expected amount, for the tree
/// predicates
#[derive(Debug, Clone, FromRow)]
pub struct DbSpvRow {
    #[sqlx(flatten)]
    pub tx: DbTransaction,
    pub pair_expect_value: Option<String>,
}
