//! The storage seam of the matching engine
//!
//! The engine computes a settle plan; the store executes it atomically.
//! Everything inside one `settle_*` call — the counterpart search, both
//! status writes and the pairing upsert — happens in a single store
//! transaction holding the pairing's row lock, so concurrent attempts on
//! the same transfer id serialize and either fully apply or fully roll back.

use async_trait::async_trait;
use crossflow_types::{Pairing, Result, Side, Transaction, TransferRecord, TransferStatus};

/// Engine decision for one user deposit, handed to the store for the atomic
/// settle.
#[derive(Debug, Clone)]
pub struct DepositPlan {
    /// Deterministic pairing key
    pub transfer_id: String,
    pub from_chain: u32,
    pub to_chain: u32,
    /// Symbol the reply must carry on the destination chain
    pub to_symbol: String,
    /// Exact reply amount, nonce tag included
    pub expect_value: String,
    /// Address the reply must come from
    pub reply_sender: String,
    /// Address the reply must pay
    pub reply_account: String,
    pub route_id: String,
    pub maker_id: String,
    /// Oldest reply timestamp still eligible (deposit time minus lookback)
    pub min_reply_unix: i64,
    /// Reply delay beyond this classifies the pairing late
    pub max_receipt_secs: i64,
}

/// Engine decision for one maker reply.
#[derive(Debug, Clone)]
pub struct ReplyPlan {
    /// Deterministic pairing key; derived from the reply's recipient, the
    /// route's origin chain and the deposit nonce carried in the memo
    pub transfer_id: String,
    pub from_chain: u32,
    pub to_chain: u32,
    pub route_id: String,
    pub maker_id: String,
    /// Newest deposit timestamp still eligible (reply time plus the forward
    /// lookback)
    pub max_deposit_unix: i64,
    pub max_receipt_secs: i64,
}

/// Result of one atomic settle attempt.
#[derive(Debug, Clone)]
pub struct SettleOutcome {
    /// Status now carried by the processed transaction
    pub status: TransferStatus,
    pub pairing: Pairing,
    /// Internal id of the counterpart, when the settle paired both sides
    pub counterpart_id: Option<i64>,
}

impl SettleOutcome {
    pub fn is_matched(&self) -> bool {
        self.status.is_matched()
    }
}

/// Transactional store the engine drives.
///
/// Implementations must guarantee:
/// - `record_transaction` is an idempotent upsert on `(chain_id, hash)` that
///   never overwrites an existing row's status;
/// - each `settle_*` call runs its search, both status writes and the
///   pairing upsert in one store transaction, serialized against other
///   operations on the same transfer id;
/// - counterpart searches order candidates by earliest timestamp, ties by
///   smallest internal id.
#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn record_transaction(&self, record: &TransferRecord) -> Result<Transaction>;

    async fn transaction_by_id(&self, id: i64) -> Result<Option<Transaction>>;

    async fn transaction_by_hash(&self, chain_id: u32, hash: &str)
        -> Result<Option<Transaction>>;

    /// Terminal-branch status write (`Rejected`, `NoRoute`, `TimerMismatch`,
    /// `Refund`), stamping the side on first touch.
    async fn mark_status(
        &self,
        id: i64,
        side: Option<Side>,
        status: TransferStatus,
    ) -> Result<()>;

    async fn pairing_by_transfer_id(&self, transfer_id: &str) -> Result<Option<Pairing>>;

    /// Force both sides of a settled pairing into a terminal matched status.
    /// Never downgrades an already-recorded `MatchedLate`.
    async fn force_matched(&self, pairing: &Pairing) -> Result<()>;

    /// Atomic deposit settle. Links the waiting reply recorded on the
    /// pairing if its value is exactly the expected amount, otherwise
    /// searches for the oldest qualifying reply; falls back to an in-only
    /// pairing upsert leaving the deposit `Complete`.
    async fn settle_deposit(
        &self,
        deposit: &Transaction,
        plan: &DepositPlan,
    ) -> Result<SettleOutcome>;

    /// Atomic reply settle. Pairs against the waiting deposit only when the
    /// reply's value strictly exceeds the recorded expected amount;
    /// otherwise records an out-only pairing (or leaves the reply
    /// `Complete` when the pairing is already in use).
    async fn settle_reply(&self, reply: &Transaction, plan: &ReplyPlan) -> Result<SettleOutcome>;
}
