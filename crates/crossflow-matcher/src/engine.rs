//! The matching engine
//!
//! Drives the per-transfer status machine:
//!
//! ```text
//! Pending(0) -> Complete(1) -> { Matched(99), MatchedLate(98) }
//!          \-> Rejected(2) | NoRoute(3) | TimerMismatch(5)
//! ```
//!
//! Route-configuration misses and malformed inputs are terminal for the one
//! transaction and never abort a batch; store failures surface so the
//! transport's redelivery can retry the batch.

use std::sync::Arc;

use alloy_primitives::U256;
use tracing::{error, info, warn};

use crossflow_codec::{decode_chain_flag, expected_reply_value, untag, FeeSchedule};
use crossflow_markets::{MarketIndex, Route, RouteSnapshot};
use crossflow_types::{
    transfer_id, ChainProfile, ChainRegistry, CrossflowError, Result, Side, Transaction,
    TransferRecord, TransferStatus, DEFAULT_LOOKBACK_SECS,
};

use crate::store::{DepositPlan, MatchStore, ReplyPlan, SettleOutcome};

/// What a transfer looks like against the route table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// `to` is a maker's receiving address
    UserDeposit,
    /// `from` is a maker's reply address
    MakerReply,
    /// Neither side belongs to a maker
    Unroutable,
}

/// Result of processing one transfer
#[derive(Debug, Clone)]
pub enum EngineOutcome {
    /// Both sides paired
    Matched { transfer_id: String, late: bool },
    /// Routed and recorded, counterpart not seen yet
    AwaitingCounterpart { transfer_id: String },
    /// Terminal per-transaction branch
    Terminal(TransferStatus),
    /// Nothing to do: already terminal, unroutable, or a settled duplicate
    Skipped,
}

/// Pairs deposits with maker replies against one route-table snapshot per
/// attempt.
pub struct MatchingEngine<S> {
    store: S,
    markets: Arc<MarketIndex>,
    chains: ChainRegistry,
}

impl<S: MatchStore> MatchingEngine<S> {
    pub fn new(store: S, markets: Arc<MarketIndex>, chains: ChainRegistry) -> Self {
        Self {
            store,
            markets,
            chains,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Classify a transfer against a pinned snapshot. Checked in reply-first
    /// order so a maker paying another maker's receiving address is treated
    /// as the reply it is.
    pub fn classify(snapshot: &RouteSnapshot, tx: &Transaction) -> Classification {
        if snapshot.is_maker_sender(&tx.from) {
            Classification::MakerReply
        } else if snapshot.is_maker_recipient(&tx.to) {
            Classification::UserDeposit
        } else {
            Classification::Unroutable
        }
    }

    /// Record a delivered transfer and process it.
    pub async fn ingest(&self, record: &TransferRecord) -> Result<EngineOutcome> {
        let tx = self.store.record_transaction(record).await?;
        self.process(&tx).await
    }

    /// Process one stored transfer. Safe to call any number of times.
    pub async fn process(&self, tx: &Transaction) -> Result<EngineOutcome> {
        if tx.status.is_terminal() {
            return Ok(EngineOutcome::Skipped);
        }
        let snapshot = self.markets.snapshot();
        match Self::classify(&snapshot, tx) {
            Classification::MakerReply => self.process_maker_reply(&snapshot, tx).await,
            Classification::UserDeposit => self.process_user_deposit(&snapshot, tx).await,
            Classification::Unroutable => {
                error!(
                    chain = tx.chain_id,
                    hash = %tx.hash,
                    "transfer belongs to no maker; leaving pending"
                );
                Ok(EngineOutcome::Skipped)
            }
        }
    }

    /// Duplicate-delivery guard: a pairing with both sides linked forces
    /// both transactions into a terminal matched status and short-circuits.
    pub async fn reconcile(&self, transfer_id: &str) -> Result<bool> {
        match self.store.pairing_by_transfer_id(transfer_id).await? {
            Some(pairing) if pairing.is_settled() => {
                info!(transfer_id, "pairing already settled; reconciling statuses");
                self.store.force_matched(&pairing).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn process_user_deposit(
        &self,
        snapshot: &RouteSnapshot,
        tx: &Transaction,
    ) -> Result<EngineOutcome> {
        require(tx, "from", &tx.from)?;
        require(tx, "to", &tx.to)?;
        require(tx, "value", &tx.value)?;
        require(tx, "symbol", &tx.symbol)?;
        if !is_decimal(&tx.value) {
            return self.reject(tx, Side::User, "value is not a decimal string").await;
        }

        let Some(from_profile) = self.chains.get(tx.chain_id) else {
            return self.no_route(tx, Side::User, "origin chain unsupported").await;
        };
        let Some(to_chain) = destination_chain(from_profile, tx) else {
            return self.no_route(tx, Side::User, "destination undeterminable").await;
        };
        let Some(to_profile) = self.chains.get(to_chain) else {
            return self.no_route(tx, Side::User, "destination chain unsupported").await;
        };
        let Some(route) = snapshot.deposit_route(
            tx.chain_id,
            to_chain,
            &tx.symbol,
            &tx.token,
            &tx.to,
            tx.unix_time(),
        ) else {
            return self.no_route(tx, Side::User, "no active route").await;
        };

        let tid = transfer_id(&tx.from, tx.chain_id, tx.nonce, &route.from_symbol);
        if self.reconcile(&tid).await? {
            return Ok(EngineOutcome::Skipped);
        }

        // the reply flag is 4 digits; a wider nonce can never be embedded
        if tx.nonce > 9999 {
            warn!(chain = tx.chain_id, hash = %tx.hash, nonce = tx.nonce, "nonce exceeds the reply flag width");
            self.store
                .mark_status(tx.id, Some(Side::User), TransferStatus::TimerMismatch)
                .await?;
            return Ok(EngineOutcome::Terminal(TransferStatus::TimerMismatch));
        }

        let Some(fees) = fee_schedule(route) else {
            warn!(route = %route.id, "route fee parameters are malformed");
            return self.no_route(tx, Side::User, "malformed fee parameters").await;
        };
        let expect_value =
            match expected_reply_value(from_profile, to_profile, &tx.value, &fees, tx.nonce) {
                Ok(value) => value,
                Err(err) if err.is_routing() => {
                    warn!(chain = tx.chain_id, hash = %tx.hash, %err, "cannot derive the reply amount");
                    return self.no_route(tx, Side::User, "codec failure").await;
                }
                Err(err) => return Err(err),
            };

        // the lookback absorbs settlement-delay skew on either leg
        let lookback = from_profile.lookback_secs.max(to_profile.lookback_secs);
        let plan = DepositPlan {
            transfer_id: tid.clone(),
            from_chain: tx.chain_id,
            to_chain,
            to_symbol: route.to_symbol.clone(),
            expect_value,
            reply_sender: tx
                .reply_sender
                .clone()
                .unwrap_or_else(|| route.sender.clone()),
            reply_account: tx.reply_account.clone().unwrap_or_else(|| tx.from.clone()),
            route_id: route.id.clone(),
            maker_id: route.maker_id.clone(),
            min_reply_unix: tx.unix_time() - lookback,
            max_receipt_secs: to_profile.max_receipt_secs,
        };

        let outcome = self.store.settle_deposit(tx, &plan).await?;
        self.report(tx, &tid, &outcome);
        Ok(engine_outcome(tid, outcome))
    }

    async fn process_maker_reply(
        &self,
        snapshot: &RouteSnapshot,
        tx: &Transaction,
    ) -> Result<EngineOutcome> {
        require(tx, "from", &tx.from)?;
        require(tx, "to", &tx.to)?;
        require(tx, "value", &tx.value)?;
        require(tx, "symbol", &tx.symbol)?;
        if !is_decimal(&tx.value) {
            return self.reject(tx, Side::Maker, "value is not a decimal string").await;
        }
        let Some(deposit_nonce) = tx.memo.as_deref().and_then(|m| m.trim().parse::<u64>().ok())
        else {
            return self.reject(tx, Side::Maker, "memo carries no deposit nonce").await;
        };

        let Some(profile) = self.chains.get(tx.chain_id) else {
            return self.no_route(tx, Side::Maker, "chain unsupported").await;
        };
        let Some(route) = snapshot.reply_route(
            tx.chain_id,
            &tx.from,
            &tx.symbol,
            &tx.token,
            tx.unix_time(),
        ) else {
            return self.no_route(tx, Side::Maker, "no active route").await;
        };

        let tid = transfer_id(&tx.to, route.from_chain, deposit_nonce, &route.from_symbol);
        if self.reconcile(&tid).await? {
            return Ok(EngineOutcome::Skipped);
        }

        let plan = ReplyPlan {
            transfer_id: tid.clone(),
            from_chain: route.from_chain,
            to_chain: tx.chain_id,
            route_id: route.id.clone(),
            maker_id: route.maker_id.clone(),
            max_deposit_unix: tx.unix_time() + DEFAULT_LOOKBACK_SECS,
            max_receipt_secs: profile.max_receipt_secs,
        };

        let outcome = self.store.settle_reply(tx, &plan).await?;
        self.report(tx, &tid, &outcome);
        Ok(engine_outcome(tid, outcome))
    }

    async fn no_route(
        &self,
        tx: &Transaction,
        side: Side,
        reason: &str,
    ) -> Result<EngineOutcome> {
        warn!(chain = tx.chain_id, hash = %tx.hash, reason, "transfer has no route");
        self.store
            .mark_status(tx.id, Some(side), TransferStatus::NoRoute)
            .await?;
        Ok(EngineOutcome::Terminal(TransferStatus::NoRoute))
    }

    async fn reject(&self, tx: &Transaction, side: Side, reason: &str) -> Result<EngineOutcome> {
        warn!(chain = tx.chain_id, hash = %tx.hash, reason, "transfer rejected");
        self.store
            .mark_status(tx.id, Some(side), TransferStatus::Rejected)
            .await?;
        Ok(EngineOutcome::Terminal(TransferStatus::Rejected))
    }

    fn report(&self, tx: &Transaction, tid: &str, outcome: &SettleOutcome) {
        if outcome.is_matched() {
            info!(
                transfer_id = tid,
                chain = tx.chain_id,
                hash = %tx.hash,
                counterpart = outcome.counterpart_id,
                late = outcome.status == TransferStatus::MatchedLate,
                "transfer paired"
            );
        } else {
            info!(
                transfer_id = tid,
                chain = tx.chain_id,
                hash = %tx.hash,
                "awaiting counterpart"
            );
        }
    }
}

fn require(tx: &Transaction, field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CrossflowError::MissingParameter {
            chain_id: tx.chain_id,
            hash: tx.hash.clone(),
            field,
        });
    }
    Ok(())
}

fn is_decimal(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit())
}

/// Explicit memo wins; otherwise the destination is recovered from the flag
/// embedded in the deposit amount.
fn destination_chain(profile: &ChainProfile, tx: &Transaction) -> Option<u32> {
    if let Some(memo) = tx.memo.as_deref() {
        if let Ok(chain_id) = memo.trim().parse::<u32>() {
            return Some(chain_id);
        }
    }
    let untagged = untag(profile, &tx.value).ok()?;
    decode_chain_flag(&untagged.flag)
}

fn fee_schedule(route: &Route) -> Option<FeeSchedule> {
    let trading_fee = U256::from_str_radix(route.trading_fee.trim(), 10).ok()?;
    Some(FeeSchedule::new(trading_fee, route.gas_fee_permille))
}

fn engine_outcome(transfer_id: String, outcome: SettleOutcome) -> EngineOutcome {
    if outcome.is_matched() {
        EngineOutcome::Matched {
            transfer_id,
            late: outcome.status == TransferStatus::MatchedLate,
        }
    } else {
        EngineOutcome::AwaitingCounterpart { transfer_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use chrono::{DateTime, TimeZone, Utc};

    const BASE: i64 = 1_700_000_000;

    fn at(offset: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(BASE + offset, 0).unwrap()
    }

    fn route() -> Route {
        Route {
            id: "r-1-2-usdt".into(),
            maker_id: "maker-1".into(),
            from_chain: 1,
            from_symbol: "USDT".into(),
            from_token: "0xtokena".into(),
            to_chain: 2,
            to_symbol: "USDT".into(),
            to_token: "0xtokenb".into(),
            sender: "0xmakersender".into(),
            recipient: "0xmakerrecipient".into(),
            start_time: BASE - 86_400,
            end_time: BASE + 86_400,
            precision: 6,
            trading_fee: "0".into(),
            gas_fee_permille: 0,
        }
    }

    fn engine() -> MatchingEngine<InMemoryStore> {
        MatchingEngine::new(
            InMemoryStore::new(),
            Arc::new(MarketIndex::new(vec![route()])),
            ChainRegistry::with_defaults(),
        )
    }

    fn deposit(hash: &str, nonce: u64, value: &str, offset: i64) -> TransferRecord {
        TransferRecord {
            chain_id: 1,
            hash: hash.into(),
            from: "0xuser".into(),
            to: "0xmakerrecipient".into(),
            symbol: "USDT".into(),
            token: "0xtokena".into(),
            value: value.into(),
            nonce,
            timestamp: at(offset),
            memo: Some("2".into()),
            reply_sender: None,
            reply_account: None,
            extra: serde_json::Value::Null,
        }
    }

    fn reply(hash: &str, deposit_nonce: u64, value: &str, offset: i64) -> TransferRecord {
        TransferRecord {
            chain_id: 2,
            hash: hash.into(),
            from: "0xmakersender".into(),
            to: "0xuser".into(),
            symbol: "USDT".into(),
            token: "0xtokenb".into(),
            value: value.into(),
            nonce: 900,
            timestamp: at(offset),
            memo: Some(deposit_nonce.to_string()),
            reply_sender: None,
            reply_account: None,
            extra: serde_json::Value::Null,
        }
    }

    async fn status_of(e: &MatchingEngine<InMemoryStore>, chain: u32, hash: &str) -> TransferStatus {
        e.store()
            .transaction_by_hash(chain, hash)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    // Deposit "100000002" carries destination flag 0002; with zero fees the
    // expected reply for nonce 7 is "100000007".

    #[tokio::test]
    async fn reply_first_then_deposit_pairs_on_time() {
        let e = engine();
        let out = e.ingest(&reply("0xr1", 7, "100000007", 30)).await.unwrap();
        assert!(matches!(out, EngineOutcome::AwaitingCounterpart { .. }));

        let out = e.ingest(&deposit("0xd1", 7, "100000002", 0)).await.unwrap();
        assert!(matches!(out, EngineOutcome::Matched { late: false, .. }));

        assert_eq!(status_of(&e, 1, "0xd1").await, TransferStatus::Matched);
        assert_eq!(status_of(&e, 2, "0xr1").await, TransferStatus::Matched);

        let pairings = e.store().pairings().await;
        assert_eq!(pairings.len(), 1);
        assert!(pairings[0].is_settled());
        assert_eq!(pairings[0].expect_value, "100000007");
        assert_eq!(pairings[0].from_chain, 1);
        assert_eq!(pairings[0].to_chain, 2);
    }

    #[tokio::test]
    async fn exact_amount_reply_needs_the_deposit_redelivered() {
        // Reply-side matching demands strictly more than the recorded
        // expectation, so the exactly-expected reply parks as complete and
        // the deposit's redelivery closes the pairing.
        let e = engine();
        e.ingest(&deposit("0xd1", 7, "100000002", 0)).await.unwrap();

        let out = e.ingest(&reply("0xr1", 7, "100000007", 30)).await.unwrap();
        assert!(matches!(out, EngineOutcome::AwaitingCounterpart { .. }));
        assert_eq!(status_of(&e, 2, "0xr1").await, TransferStatus::Complete);

        let out = e.ingest(&deposit("0xd1", 7, "100000002", 0)).await.unwrap();
        assert!(matches!(out, EngineOutcome::Matched { late: false, .. }));
        assert_eq!(status_of(&e, 1, "0xd1").await, TransferStatus::Matched);
        assert_eq!(status_of(&e, 2, "0xr1").await, TransferStatus::Matched);
    }

    #[tokio::test]
    async fn overpaying_reply_pairs_from_the_reply_side() {
        let e = engine();
        e.ingest(&deposit("0xd1", 7, "100000002", 0)).await.unwrap();

        let out = e.ingest(&reply("0xr1", 7, "100010007", 30)).await.unwrap();
        assert!(matches!(out, EngineOutcome::Matched { late: false, .. }));
        assert_eq!(status_of(&e, 1, "0xd1").await, TransferStatus::Matched);
        assert_eq!(status_of(&e, 2, "0xr1").await, TransferStatus::Matched);
    }

    #[tokio::test]
    async fn late_reply_is_classified_matched_late() {
        // chain 2 keeps the default 10-minute receipt ceiling; 20 minutes is
        // late on both sides of the pairing
        let e = engine();
        e.ingest(&reply("0xr1", 7, "100000007", 1_200)).await.unwrap();
        let out = e.ingest(&deposit("0xd1", 7, "100000002", 0)).await.unwrap();
        assert!(matches!(out, EngineOutcome::Matched { late: true, .. }));
        assert_eq!(status_of(&e, 1, "0xd1").await, TransferStatus::MatchedLate);
        assert_eq!(status_of(&e, 2, "0xr1").await, TransferStatus::MatchedLate);
    }

    #[tokio::test]
    async fn reply_outside_the_lookback_is_not_paired() {
        // a reply more than five minutes older than its deposit cannot be
        // the settlement of that deposit
        let e = engine();
        e.ingest(&reply("0xr1", 7, "100000007", -400)).await.unwrap();
        let out = e.ingest(&deposit("0xd1", 7, "100000002", 0)).await.unwrap();
        assert!(matches!(out, EngineOutcome::AwaitingCounterpart { .. }));
        assert_eq!(status_of(&e, 1, "0xd1").await, TransferStatus::Complete);
        assert_eq!(status_of(&e, 2, "0xr1").await, TransferStatus::Complete);

        let pairings = e.store().pairings().await;
        assert_eq!(pairings.len(), 1);
        assert!(!pairings[0].is_settled());
        assert!(pairings[0].out_id.is_none());
    }

    #[tokio::test]
    async fn oldest_qualifying_reply_wins() {
        let e = engine();
        e.ingest(&reply("0xr-new", 7, "100000007", 60)).await.unwrap();
        e.ingest(&reply("0xr-old", 7, "100000007", 20)).await.unwrap();
        e.ingest(&deposit("0xd1", 7, "100000002", 0)).await.unwrap();

        let old = e
            .store()
            .transaction_by_hash(2, "0xr-old")
            .await
            .unwrap()
            .unwrap();
        let new = e
            .store()
            .transaction_by_hash(2, "0xr-new")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(old.status, TransferStatus::Matched);
        assert_eq!(new.status, TransferStatus::Complete);

        let pairings = e.store().pairings().await;
        assert_eq!(pairings[0].out_id, Some(old.id));
    }

    #[tokio::test]
    async fn repeated_delivery_in_any_order_yields_one_pairing() {
        let e = engine();
        let d = deposit("0xd1", 7, "100000002", 0);
        let r = reply("0xr1", 7, "100000007", 30);

        for record in [&r, &d, &r, &d, &d, &r] {
            e.ingest(record).await.unwrap();
        }

        let pairings = e.store().pairings().await;
        assert_eq!(pairings.len(), 1);
        assert!(pairings[0].is_settled());
        assert_eq!(status_of(&e, 1, "0xd1").await, TransferStatus::Matched);
        assert_eq!(status_of(&e, 2, "0xr1").await, TransferStatus::Matched);
        // redelivery never spawned extra rows either
        assert_eq!(e.store().transactions().await.len(), 2);
    }

    #[tokio::test]
    async fn deposit_without_a_route_goes_no_route() {
        let e = engine();
        // destination flag 0003: no route services 1 -> 3
        let mut rec = deposit("0xd1", 7, "100000003", 0);
        rec.memo = Some("3".into());
        let out = e.ingest(&rec).await.unwrap();
        assert!(matches!(
            out,
            EngineOutcome::Terminal(TransferStatus::NoRoute)
        ));
        assert_eq!(status_of(&e, 1, "0xd1").await, TransferStatus::NoRoute);
        assert!(e.store().pairings().await.is_empty());
    }

    #[tokio::test]
    async fn destination_falls_back_to_the_amount_flag() {
        let e = engine();
        let mut rec = deposit("0xd1", 7, "100000002", 0);
        rec.memo = None;
        let out = e.ingest(&rec).await.unwrap();
        assert!(matches!(out, EngineOutcome::AwaitingCounterpart { .. }));
        assert_eq!(status_of(&e, 1, "0xd1").await, TransferStatus::Complete);
    }

    #[tokio::test]
    async fn oversized_nonce_is_a_timer_mismatch() {
        let e = engine();
        let out = e
            .ingest(&deposit("0xd1", 12_345, "100000002", 0))
            .await
            .unwrap();
        assert!(matches!(
            out,
            EngineOutcome::Terminal(TransferStatus::TimerMismatch)
        ));
        assert_eq!(
            status_of(&e, 1, "0xd1").await,
            TransferStatus::TimerMismatch
        );
    }

    #[tokio::test]
    async fn reply_without_a_nonce_memo_is_rejected() {
        let e = engine();
        let mut rec = reply("0xr1", 7, "100000007", 0);
        rec.memo = Some("not-a-nonce".into());
        let out = e.ingest(&rec).await.unwrap();
        assert!(matches!(
            out,
            EngineOutcome::Terminal(TransferStatus::Rejected)
        ));
    }

    #[tokio::test]
    async fn unroutable_transfer_stays_pending() {
        let e = engine();
        let mut rec = deposit("0xd1", 7, "100000002", 0);
        rec.to = "0xnobody".into();
        let out = e.ingest(&rec).await.unwrap();
        assert!(matches!(out, EngineOutcome::Skipped));
        assert_eq!(status_of(&e, 1, "0xd1").await, TransferStatus::Pending);
    }

    #[tokio::test]
    async fn missing_fields_leave_the_transfer_untouched() {
        let e = engine();
        let mut rec = deposit("0xd1", 7, "100000002", 0);
        rec.from = "".into();
        // classification needs `to`, which is present; validation then trips
        let err = e.ingest(&rec).await.unwrap_err();
        assert!(matches!(err, CrossflowError::MissingParameter { .. }));
        assert_eq!(status_of(&e, 1, "0xd1").await, TransferStatus::Pending);
    }

    #[tokio::test]
    async fn settled_pairing_short_circuits_redelivery() {
        let e = engine();
        e.ingest(&reply("0xr1", 7, "100000007", 30)).await.unwrap();
        e.ingest(&deposit("0xd1", 7, "100000002", 0)).await.unwrap();

        // both rows are terminal now, so redelivery is skipped outright
        let out = e.ingest(&reply("0xr1", 7, "100000007", 30)).await.unwrap();
        assert!(matches!(out, EngineOutcome::Skipped));
        assert_eq!(status_of(&e, 1, "0xd1").await, TransferStatus::Matched);
        assert_eq!(status_of(&e, 2, "0xr1").await, TransferStatus::Matched);
    }

    #[tokio::test]
    async fn late_classification_survives_reconcile() {
        let e = engine();
        e.ingest(&reply("0xr1", 7, "100000007", 1_200)).await.unwrap();
        e.ingest(&deposit("0xd1", 7, "100000002", 0)).await.unwrap();
        assert_eq!(status_of(&e, 1, "0xd1").await, TransferStatus::MatchedLate);

        let pairing = &e.store().pairings().await[0];
        e.store().force_matched(pairing).await.unwrap();
        assert_eq!(status_of(&e, 1, "0xd1").await, TransferStatus::MatchedLate);
        assert_eq!(status_of(&e, 2, "0xr1").await, TransferStatus::MatchedLate);
    }
}
