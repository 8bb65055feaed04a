//! Observed on-chain transfers and their status machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Which party originated a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// User-originated deposit toward a maker's receiving address
    User,
    /// Maker-originated reply settling a deposit
    Maker,
}

impl Side {
    pub fn code(self) -> i16 {
        match self {
            Side::User => 0,
            Side::Maker => 1,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Side::User),
            1 => Some(Side::Maker),
            _ => None,
        }
    }
}

/// Lifecycle status of an observed transfer.
///
/// Transitions are monotonic: `Pending -> Complete -> {Matched, MatchedLate}`,
/// with terminal side branches for transfers that can never match. Only the
/// matching engine writes statuses past `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Ingested, not yet processed
    Pending,
    /// Validated and routed, awaiting its counterpart
    Complete,
    /// Failed validation, terminal
    Rejected,
    /// No active route covers it, terminal
    NoRoute,
    /// Refunded to the sender, terminal
    Refund,
    /// Nonce cannot be embedded in the reply flag, terminal
    TimerMismatch,
    /// Paired, but the reply exceeded the chain's max receipt time
    MatchedLate,
    /// Paired within the receipt window
    Matched,
}

impl TransferStatus {
    /// Stable numeric code persisted in the store
    pub fn code(self) -> i16 {
        match self {
            TransferStatus::Pending => 0,
            TransferStatus::Complete => 1,
            TransferStatus::Rejected => 2,
            TransferStatus::NoRoute => 3,
            TransferStatus::Refund => 4,
            TransferStatus::TimerMismatch => 5,
            TransferStatus::MatchedLate => 98,
            TransferStatus::Matched => 99,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(TransferStatus::Pending),
            1 => Some(TransferStatus::Complete),
            2 => Some(TransferStatus::Rejected),
            3 => Some(TransferStatus::NoRoute),
            4 => Some(TransferStatus::Refund),
            5 => Some(TransferStatus::TimerMismatch),
            98 => Some(TransferStatus::MatchedLate),
            99 => Some(TransferStatus::Matched),
            _ => None,
        }
    }

    /// Terminal statuses accept no further writes
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Rejected
                | TransferStatus::NoRoute
                | TransferStatus::Refund
                | TransferStatus::MatchedLate
                | TransferStatus::Matched
        )
    }

    /// Both matched outcomes, late or on time
    pub fn is_matched(self) -> bool {
        matches!(self, TransferStatus::Matched | TransferStatus::MatchedLate)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Complete => "complete",
            TransferStatus::Rejected => "rejected",
            TransferStatus::NoRoute => "no_route",
            TransferStatus::Refund => "refund",
            TransferStatus::TimerMismatch => "timer_mismatch",
            TransferStatus::MatchedLate => "matched_late",
            TransferStatus::Matched => "matched",
        };
        write!(f, "{name}")
    }
}

/// A normalized transfer record as delivered by the chain-scanning collaborator.
///
/// This is the wire shape: no internal id, no status. Ingestion upserts it
/// into the store keyed by `(chain_id, hash)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub chain_id: u32,
    pub hash: String,
    pub from: String,
    pub to: String,
    pub symbol: String,
    pub token: String,
    /// Decimal amount in raw token units, arbitrary precision
    pub value: String,
    pub nonce: u64,
    pub timestamp: DateTime<Utc>,
    /// Decoded destination chain (deposits) or the deposit nonce (replies)
    #[serde(default)]
    pub memo: Option<String>,
    /// Expected counterpart sender, when the scanner can derive it
    #[serde(default)]
    pub reply_sender: Option<String>,
    /// Expected counterpart recipient, when the scanner can derive it
    #[serde(default)]
    pub reply_account: Option<String>,
    /// Free-form decoded payload, e.g. multicall sub-transfers
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// One observed on-chain transfer, as stored.
///
/// `(chain_id, hash)` is unique; rows are never deleted — this is the audit
/// trail. Only the matching engine mutates `status`, `side`, `route_id` and
/// `maker_id`, inside the same atomic operation that writes the pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub chain_id: u32,
    pub hash: String,
    pub from: String,
    pub to: String,
    pub symbol: String,
    pub token: String,
    pub value: String,
    pub nonce: u64,
    pub timestamp: DateTime<Utc>,
    pub status: TransferStatus,
    pub side: Side,
    pub memo: Option<String>,
    pub reply_sender: Option<String>,
    pub reply_account: Option<String>,
    pub route_id: Option<String>,
    pub maker_id: Option<String>,
    pub extra: serde_json::Value,
}

impl Transaction {
    /// Unix-second timestamp of the transfer
    pub fn unix_time(&self) -> i64 {
        self.timestamp.timestamp()
    }
}

/// Derive the deterministic transfer id linking a deposit to its reply.
///
/// Both sides can compute it before the counterpart is known: the depositor
/// address is the deposit's `from` and the reply's `to`, the nonce is the
/// deposit's `nonce` and the reply's `memo`, and the origin chain comes from
/// the route. Addresses and symbol are lowercased so checksummed and plain
/// encodings collide.
pub fn transfer_id(depositor: &str, origin_chain: u32, nonce: u64, symbol: &str) -> String {
    let mut hasher = Keccak256::new();
    hasher.update(depositor.trim().to_lowercase().as_bytes());
    hasher.update(origin_chain.to_be_bytes());
    hasher.update(nonce.to_be_bytes());
    hasher.update(symbol.trim().to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}
