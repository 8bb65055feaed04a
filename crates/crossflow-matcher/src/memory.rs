//! In-memory reference implementation of [`MatchStore`]
//!
//! One mutex over the whole state: every settle is trivially atomic and
//! serialized, which is exactly the contract the engine tests need. Not a
//! production store.

use alloy_primitives::U256;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crossflow_types::{
    CrossflowError, Pairing, Result, Side, Transaction, TransferRecord, TransferStatus,
};

use crate::store::{DepositPlan, MatchStore, ReplyPlan, SettleOutcome};

fn same(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Decimal values are stored canonically (no leading zeros), so equality is
/// string equality; comparisons still go through `U256` to be safe.
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

fn dec(value: &str) -> Option<U256> {
    U256::from_str_radix(value.trim(), 10).ok()
}

fn value_eq(a: &str, b: &str) -> bool {
    match (dec(a), dec(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a.trim() == b.trim(),
    }
}

fn value_gt(a: &str, b: &str) -> bool {
    matches!((dec(a), dec(b)), (Some(a), Some(b)) if a > b)
}

fn memo_nonce(memo: &Option<String>) -> Option<u64> {
    memo.as_deref().and_then(|m| m.trim().parse().ok())
}

#[derive(Default)]
struct Inner {
    transactions: Vec<Transaction>,
    by_hash: HashMap<(u32, String), i64>,
    pairings: HashMap<String, Pairing>,
}

impl Inner {
    fn tx(&self, id: i64) -> Option<&Transaction> {
        self.transactions.get(id as usize - 1)
    }

    fn tx_mut(&mut self, id: i64) -> Option<&mut Transaction> {
        self.transactions.get_mut(id as usize - 1)
    }

    fn promote(&mut self, id: i64, status: TransferStatus) {
        if let Some(tx) = self.tx_mut(id) {
            // never downgrade a recorded late classification
            if !(tx.status == TransferStatus::MatchedLate && status == TransferStatus::Matched) {
                tx.status = status;
            }
        }
    }
}

/// Mutex-guarded in-memory store
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored transaction, in insertion order (test helper)
    pub async fn transactions(&self) -> Vec<Transaction> {
        self.inner.lock().await.transactions.clone()
    }

    /// Every pairing row (test helper)
    pub async fn pairings(&self) -> Vec<Pairing> {
        self.inner.lock().await.pairings.values().cloned().collect()
    }
}

#[async_trait]
impl MatchStore for InMemoryStore {
    async fn record_transaction(&self, record: &TransferRecord) -> Result<Transaction> {
        let mut inner = self.inner.lock().await;
        let key = (record.chain_id, record.hash.trim().to_lowercase());
        if let Some(id) = inner.by_hash.get(&key) {
            return Ok(inner.tx(*id).cloned().expect("indexed row exists"));
        }
        let id = inner.transactions.len() as i64 + 1;
        let tx = Transaction {
            id,
            chain_id: record.chain_id,
            hash: record.hash.trim().to_string(),
            from: record.from.trim().to_string(),
            to: record.to.trim().to_string(),
            symbol: record.symbol.trim().to_string(),
            token: record.token.trim().to_string(),
            value: canonical_value(&record.value),
            nonce: record.nonce,
            timestamp: record.timestamp,
            status: TransferStatus::Pending,
            side: Side::User,
            memo: record.memo.clone(),
            reply_sender: record.reply_sender.clone(),
            reply_account: record.reply_account.clone(),
            route_id: None,
            maker_id: None,
            extra: record.extra.clone(),
        };
        inner.transactions.push(tx.clone());
        inner.by_hash.insert(key, id);
        Ok(tx)
    }

    async fn transaction_by_id(&self, id: i64) -> Result<Option<Transaction>> {
        Ok(self.inner.lock().await.tx(id).cloned())
    }

    async fn transaction_by_hash(
        &self,
        chain_id: u32,
        hash: &str,
    ) -> Result<Option<Transaction>> {
        let inner = self.inner.lock().await;
        let id = inner.by_hash.get(&(chain_id, hash.trim().to_lowercase()));
        Ok(id.and_then(|id| inner.tx(*id).cloned()))
    }

    async fn mark_status(
        &self,
        id: i64,
        side: Option<Side>,
        status: TransferStatus,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let tx = inner
            .tx_mut(id)
            .ok_or_else(|| CrossflowError::store(format!("unknown transaction {id}")))?;
        tx.status = status;
        if let Some(side) = side {
            tx.side = side;
        }
        Ok(())
    }

    async fn pairing_by_transfer_id(&self, transfer_id: &str) -> Result<Option<Pairing>> {
        Ok(self.inner.lock().await.pairings.get(transfer_id).cloned())
    }

    async fn force_matched(&self, pairing: &Pairing) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for id in [pairing.in_id, pairing.out_id].into_iter().flatten() {
            inner.promote(id, TransferStatus::Matched);
        }
        Ok(())
    }

    async fn settle_deposit(
        &self,
        deposit: &Transaction,
        plan: &DepositPlan,
    ) -> Result<SettleOutcome> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let existing = inner.pairings.get(&plan.transfer_id).cloned();

        if let Some(pairing) = &existing {
            if let Some(in_id) = pairing.in_id {
                if in_id != deposit.id {
                    return Err(CrossflowError::AlreadyPaired {
                        transfer_id: plan.transfer_id.clone(),
                    });
                }
            }
            if pairing.is_settled() {
                for id in [pairing.in_id, pairing.out_id].into_iter().flatten() {
                    inner.promote(id, TransferStatus::Matched);
                }
                let status = inner.tx(deposit.id).map(|t| t.status).unwrap_or(TransferStatus::Matched);
                return Ok(SettleOutcome {
                    status,
                    pairing: pairing.clone(),
                    counterpart_id: pairing.out_id,
                });
            }
        }

        // Search every qualifying reply, the one recorded on an out-only
        // pairing included: oldest timestamp wins, ties by smallest id. A
        // recorded reply that does not qualify was not the true counterpart
        // and its slot is cleared by the upsert below.
        let reply = {
            let mut candidates: Vec<&Transaction> = inner
                .transactions
                .iter()
                .filter(|t| {
                    t.chain_id == plan.to_chain
                        && t.status == TransferStatus::Complete
                        && same(&t.from, &plan.reply_sender)
                        && same(&t.to, &plan.reply_account)
                        && same(&t.symbol, &plan.to_symbol)
                        && memo_nonce(&t.memo) == Some(deposit.nonce)
                        && value_eq(&t.value, &plan.expect_value)
                        && t.unix_time() >= plan.min_reply_unix
                })
                .collect();
            candidates.sort_by_key(|t| (t.timestamp, t.id));
            candidates.first().map(|t| (*t).clone())
        };

        let outcome = match reply {
            Some(reply) => {
                let delay = reply.unix_time() - deposit.unix_time();
                let status = if delay > plan.max_receipt_secs {
                    TransferStatus::MatchedLate
                } else {
                    TransferStatus::Matched
                };
                {
                    let tx = inner.tx_mut(deposit.id).expect("deposit row exists");
                    tx.side = Side::User;
                    tx.status = status;
                    tx.route_id = Some(plan.route_id.clone());
                    tx.maker_id = Some(plan.maker_id.clone());
                }
                {
                    let tx = inner.tx_mut(reply.id).expect("reply row exists");
                    tx.side = Side::Maker;
                    tx.status = status;
                }
                let pairing = Pairing {
                    transfer_id: plan.transfer_id.clone(),
                    in_id: Some(deposit.id),
                    out_id: Some(reply.id),
                    from_chain: plan.from_chain,
                    to_chain: plan.to_chain,
                    expect_value: plan.expect_value.clone(),
                    reply_sender: plan.reply_sender.clone(),
                    reply_account: plan.reply_account.clone(),
                    created_at: existing.as_ref().map(|p| p.created_at).unwrap_or(now),
                    updated_at: now,
                };
                inner
                    .pairings
                    .insert(plan.transfer_id.clone(), pairing.clone());
                SettleOutcome {
                    status,
                    pairing,
                    counterpart_id: Some(reply.id),
                }
            }
            None => {
                {
                    let tx = inner.tx_mut(deposit.id).expect("deposit row exists");
                    tx.side = Side::User;
                    tx.status = TransferStatus::Complete;
                    tx.route_id = Some(plan.route_id.clone());
                    tx.maker_id = Some(plan.maker_id.clone());
                }
                let pairing = Pairing {
                    transfer_id: plan.transfer_id.clone(),
                    in_id: Some(deposit.id),
                    out_id: None,
                    from_chain: plan.from_chain,
                    to_chain: plan.to_chain,
                    expect_value: plan.expect_value.clone(),
                    reply_sender: plan.reply_sender.clone(),
                    reply_account: plan.reply_account.clone(),
                    created_at: existing.as_ref().map(|p| p.created_at).unwrap_or(now),
                    updated_at: now,
                };
                inner
                    .pairings
                    .insert(plan.transfer_id.clone(), pairing.clone());
                SettleOutcome {
                    status: TransferStatus::Complete,
                    pairing,
                    counterpart_id: None,
                }
            }
        };

        Ok(outcome)
    }

    async fn settle_reply(&self, reply: &Transaction, plan: &ReplyPlan) -> Result<SettleOutcome> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let existing = inner.pairings.get(&plan.transfer_id).cloned();

        let stamp_reply = |inner: &mut Inner, status: TransferStatus| {
            if let Some(tx) = inner.tx_mut(reply.id) {
                tx.side = Side::Maker;
                tx.status = status;
                tx.route_id = Some(plan.route_id.clone());
                tx.maker_id = Some(plan.maker_id.clone());
            }
        };

        match existing {
            Some(pairing) if pairing.is_settled() => {
                if pairing.out_id == Some(reply.id) {
                    for id in [pairing.in_id, pairing.out_id].into_iter().flatten() {
                        inner.promote(id, TransferStatus::Matched);
                    }
                    let status = inner
                        .tx(reply.id)
                        .map(|t| t.status)
                        .unwrap_or(TransferStatus::Matched);
                    Ok(SettleOutcome {
                        status,
                        pairing: pairing.clone(),
                        counterpart_id: pairing.in_id,
                    })
                } else {
                    // the transfer settled with a different reply; this one
                    // stays an unmatched maker payment
                    stamp_reply(&mut inner, TransferStatus::Complete);
                    Ok(SettleOutcome {
                        status: TransferStatus::Complete,
                        pairing,
                        counterpart_id: None,
                    })
                }
            }
            Some(mut pairing) if pairing.in_id.is_some() => {
                let deposit = pairing
                    .in_id
                    .and_then(|id| inner.tx(id).cloned())
                    .filter(|d| {
                        d.status == TransferStatus::Complete
                            && d.unix_time() <= plan.max_deposit_unix
                            && value_gt(&reply.value, &pairing.expect_value)
                    });
                match deposit {
                    Some(deposit) => {
                        let delay = reply.unix_time() - deposit.unix_time();
                        let status = if delay > plan.max_receipt_secs {
                            TransferStatus::MatchedLate
                        } else {
                            TransferStatus::Matched
                        };
                        inner.promote(deposit.id, status);
                        stamp_reply(&mut inner, status);
                        pairing.out_id = Some(reply.id);
                        pairing.updated_at = now;
                        inner
                            .pairings
                            .insert(plan.transfer_id.clone(), pairing.clone());
                        Ok(SettleOutcome {
                            status,
                            pairing,
                            counterpart_id: Some(deposit.id),
                        })
                    }
                    None => {
                        stamp_reply(&mut inner, TransferStatus::Complete);
                        Ok(SettleOutcome {
                            status: TransferStatus::Complete,
                            pairing,
                            counterpart_id: None,
                        })
                    }
                }
            }
            Some(pairing) => {
                // out-only pairing held by another reply; first one keeps it
                stamp_reply(&mut inner, TransferStatus::Complete);
                Ok(SettleOutcome {
                    status: TransferStatus::Complete,
                    pairing,
                    counterpart_id: None,
                })
            }
            None => {
                stamp_reply(&mut inner, TransferStatus::Complete);
                let pairing = Pairing {
                    transfer_id: plan.transfer_id.clone(),
                    in_id: None,
                    out_id: Some(reply.id),
                    from_chain: plan.from_chain,
                    to_chain: plan.to_chain,
                    // placeholder until the deposit side computes the real
                    // expectation
                    expect_value: reply.value.clone(),
                    reply_sender: reply.from.clone(),
                    reply_account: reply.to.clone(),
                    created_at: now,
                    updated_at: now,
                };
                inner
                    .pairings
                    .insert(plan.transfer_id.clone(), pairing.clone());
                Ok(SettleOutcome {
                    status: TransferStatus::Complete,
                    pairing,
                    counterpart_id: None,
                })
            }
        }
    }
}
