//! Per-chain accumulator over the two pending-transfer trees

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use crossflow_types::{ChainRegistry, Result, Transaction, DEFAULT_MAX_RECEIPT_SECS};

use crate::leaf::MerkleLeaf;
use crate::tree::{MerkleTree, ProofStep};

/// Fixed poll cadence of the accumulator
pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Which of the two per-chain trees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeKind {
    /// Deposits past their receipt window and not refunded
    UserTx,
    /// Maker replies classified late, awaiting dispute resolution
    MakerTx,
}

/// One row qualifying for a tree: the transaction plus the expected reply
/// amount its pairing recorded
#[derive(Debug, Clone)]
pub struct SpvRow {
    pub tx: Transaction,
    pub expect_value: String,
}

/// Store queries backing the two tree predicates.
///
/// Both return rows in ascending transaction-id order, restricted to ids
/// strictly greater than `after_id` so re-scans stay bounded.
#[async_trait]
pub trait SpvStore: Send + Sync {
    /// Deposits still owed a response: routed, unmatched, not refunded, and
    /// older than `overdue_before` unix seconds
    async fn overdue_deposits(
        &self,
        chain_id: u32,
        after_id: i64,
        overdue_before: i64,
    ) -> Result<Vec<SpvRow>>;

    /// Replies carrying the late classification
    async fn delayed_replies(&self, chain_id: u32, after_id: i64) -> Result<Vec<SpvRow>>;
}

/// The on-chain root registry, behind whatever signer the deployment uses.
/// This is the only path through which this subsystem mutates chain state.
#[async_trait]
pub trait RootContract: Send + Sync {
    async fn user_tx_root(&self, chain_id: u32) -> Result<Option<String>>;
    async fn maker_tx_root(&self, chain_id: u32) -> Result<Option<String>>;
    async fn set_user_tx_root(&self, chain_id: u32, root_hex: &str) -> Result<()>;
    async fn set_maker_tx_root(&self, chain_id: u32, root_hex: &str) -> Result<()>;
}

#[derive(Default)]
struct ChainTrees {
    user: MerkleTree,
    maker: MerkleTree,
    /// Highest transaction id folded into each tree
    user_seen: i64,
    maker_seen: i64,
}

impl ChainTrees {
    fn tree(&self, kind: TreeKind) -> &MerkleTree {
        match kind {
            TreeKind::UserTx => &self.user,
            TreeKind::MakerTx => &self.maker,
        }
    }

    fn append(&mut self, kind: TreeKind, row: &SpvRow) -> bool {
        let leaf = MerkleLeaf::from_transaction(&row.tx, &row.expect_value);
        let (tree, seen) = match kind {
            TreeKind::UserTx => (&mut self.user, &mut self.user_seen),
            TreeKind::MakerTx => (&mut self.maker, &mut self.maker_seen),
        };
        *seen = (*seen).max(row.tx.id);
        tree.append(leaf.hash())
    }
}

/// Maintains both trees for a set of watched chains and keeps the on-chain
/// roots in step.
///
/// Tree mutation is guarded by one lock per accumulator and no lock is held
/// across an await; each chain additionally gets a single-owner poll task
/// (see [`crate::run_poller`]), so appends for one chain never interleave.
pub struct MerkleAccumulator<S, C> {
    store: S,
    contract: C,
    chains: ChainRegistry,
    watched: Vec<u32>,
    trees: RwLock<HashMap<u32, ChainTrees>>,
}

impl<S: SpvStore, C: RootContract> MerkleAccumulator<S, C> {
    pub fn new(store: S, contract: C, chains: ChainRegistry, watched: Vec<u32>) -> Self {
        Self {
            store,
            contract,
            chains,
            watched,
            trees: RwLock::new(HashMap::new()),
        }
    }

    pub fn watched(&self) -> &[u32] {
        &self.watched
    }

    fn overdue_cutoff(&self, chain_id: u32) -> i64 {
        let max_receipt = self
            .chains
            .get(chain_id)
            .map(|p| p.max_receipt_secs)
            .unwrap_or(DEFAULT_MAX_RECEIPT_SECS);
        Utc::now().timestamp() - max_receipt
    }

    /// Rebuild every watched chain from the store. Failures are logged and
    /// the remaining chains still build; the poller revisits the failed ones.
    pub async fn rebuild(&self) -> Result<()> {
        for chain_id in self.watched.clone() {
            if let Err(err) = self.rebuild_chain(chain_id).await {
                warn!(chain_id, %err, "tree rebuild failed");
            }
        }
        Ok(())
    }

    /// Rebuild one chain's trees from scratch. Readers keep answering from
    /// the previous trees (or report absence) until the replacement is
    /// complete.
    pub async fn rebuild_chain(&self, chain_id: u32) -> Result<()> {
        let deposits = self
            .store
            .overdue_deposits(chain_id, 0, self.overdue_cutoff(chain_id))
            .await?;
        let replies = self.store.delayed_replies(chain_id, 0).await?;

        let mut built = ChainTrees::default();
        for row in &deposits {
            built.append(TreeKind::UserTx, row);
        }
        for row in &replies {
            built.append(TreeKind::MakerTx, row);
        }
        info!(
            chain_id,
            user_leaves = built.user.len(),
            maker_leaves = built.maker.len(),
            "trees rebuilt"
        );
        self.trees.write().insert(chain_id, built);
        Ok(())
    }

    /// One poll cycle for one chain: fold in newly-qualifying rows past the
    /// high-water marks, then push any root that diverged on-chain.
    pub async fn poll_chain(&self, chain_id: u32) -> Result<()> {
        if !self.trees.read().contains_key(&chain_id) {
            self.rebuild_chain(chain_id).await?;
        } else {
            let (user_seen, maker_seen) = {
                let trees = self.trees.read();
                let entry = trees.get(&chain_id).expect("checked above");
                (entry.user_seen, entry.maker_seen)
            };
            let deposits = self
                .store
                .overdue_deposits(chain_id, user_seen, self.overdue_cutoff(chain_id))
                .await?;
            let replies = self.store.delayed_replies(chain_id, maker_seen).await?;

            if !deposits.is_empty() || !replies.is_empty() {
                let mut trees = self.trees.write();
                let entry = trees.entry(chain_id).or_default();
                let mut added = 0usize;
                for row in &deposits {
                    added += entry.append(TreeKind::UserTx, row) as usize;
                }
                for row in &replies {
                    added += entry.append(TreeKind::MakerTx, row) as usize;
                }
                if added > 0 {
                    info!(chain_id, added, "leaves appended");
                }
            }
        }

        let (user_root, maker_root) = {
            let trees = self.trees.read();
            let entry = trees.get(&chain_id);
            (
                entry.and_then(|t| t.user.root_hex()),
                entry.and_then(|t| t.maker.root_hex()),
            )
        };
        if let Some(root) = user_root {
            self.sync_root(chain_id, TreeKind::UserTx, &root).await?;
        }
        if let Some(root) = maker_root {
            self.sync_root(chain_id, TreeKind::MakerTx, &root).await?;
        }
        Ok(())
    }

    /// Compare the local root against the chain and submit on divergence.
    async fn sync_root(&self, chain_id: u32, kind: TreeKind, root_hex: &str) -> Result<()> {
        let on_chain = match kind {
            TreeKind::UserTx => self.contract.user_tx_root(chain_id).await?,
            TreeKind::MakerTx => self.contract.maker_tx_root(chain_id).await?,
        };
        if on_chain.as_deref() == Some(root_hex) {
            return Ok(());
        }
        match kind {
            TreeKind::UserTx => self.contract.set_user_tx_root(chain_id, root_hex).await?,
            TreeKind::MakerTx => self.contract.set_maker_tx_root(chain_id, root_hex).await?,
        }
        info!(chain_id, ?kind, root = root_hex, "root submitted");
        Ok(())
    }

    /// Pure read used by the query layer; answers from whatever trees exist
    /// right now and reports absence while a chain is mid-rebuild.
    pub fn proof(&self, chain_id: u32, kind: TreeKind, leaf_hash: &[u8; 32]) -> Option<Vec<ProofStep>> {
        self.trees.read().get(&chain_id)?.tree(kind).proof(leaf_hash)
    }

    pub fn root_hex(&self, chain_id: u32, kind: TreeKind) -> Option<String> {
        self.trees.read().get(&chain_id)?.tree(kind).root_hex()
    }

    pub fn leaf_count(&self, chain_id: u32, kind: TreeKind) -> usize {
        self.trees
            .read()
            .get(&chain_id)
            .map(|t| t.tree(kind).len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crossflow_types::{Side, TransferStatus};
    use tokio::sync::Mutex;

    fn tx(id: i64, chain_id: u32, hash: &str) -> Transaction {
        Transaction {
            id,
            chain_id,
            hash: hash.into(),
            from: "0xuser".into(),
            to: "0xmaker".into(),
            symbol: "USDT".into(),
            token: "0xtoken".into(),
            value: "100000002".into(),
            nonce: id as u64,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            status: TransferStatus::Complete,
            side: Side::User,
            memo: None,
            reply_sender: None,
            reply_account: None,
            route_id: Some("r1".into()),
            maker_id: Some("m1".into()),
            extra: serde_json::Value::Null,
        }
    }

    fn row(id: i64, chain_id: u32, hash: &str) -> SpvRow {
        SpvRow {
            tx: tx(id, chain_id, hash),
            expect_value: "100000007".into(),
        }
    }

    #[derive(Default)]
    struct MockStore {
        deposits: Mutex<Vec<SpvRow>>,
        replies: Mutex<Vec<SpvRow>>,
    }

    #[async_trait]
    impl SpvStore for MockStore {
        async fn overdue_deposits(
            &self,
            chain_id: u32,
            after_id: i64,
            _overdue_before: i64,
        ) -> Result<Vec<SpvRow>> {
            Ok(self
                .deposits
                .lock()
                .await
                .iter()
                .filter(|r| r.tx.chain_id == chain_id && r.tx.id > after_id)
                .cloned()
                .collect())
        }

        async fn delayed_replies(&self, chain_id: u32, after_id: i64) -> Result<Vec<SpvRow>> {
            Ok(self
                .replies
                .lock()
                .await
                .iter()
                .filter(|r| r.tx.chain_id == chain_id && r.tx.id > after_id)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct MockContract {
        roots: Mutex<HashMap<(u32, TreeKind), String>>,
        submissions: Mutex<Vec<(u32, TreeKind, String)>>,
    }

    #[async_trait]
    impl RootContract for MockContract {
        async fn user_tx_root(&self, chain_id: u32) -> Result<Option<String>> {
            Ok(self.roots.lock().await.get(&(chain_id, TreeKind::UserTx)).cloned())
        }

        async fn maker_tx_root(&self, chain_id: u32) -> Result<Option<String>> {
            Ok(self.roots.lock().await.get(&(chain_id, TreeKind::MakerTx)).cloned())
        }

        async fn set_user_tx_root(&self, chain_id: u32, root_hex: &str) -> Result<()> {
            self.roots
                .lock()
                .await
                .insert((chain_id, TreeKind::UserTx), root_hex.to_string());
            self.submissions
                .lock()
                .await
                .push((chain_id, TreeKind::UserTx, root_hex.to_string()));
            Ok(())
        }

        async fn set_maker_tx_root(&self, chain_id: u32, root_hex: &str) -> Result<()> {
            self.roots
                .lock()
                .await
                .insert((chain_id, TreeKind::MakerTx), root_hex.to_string());
            self.submissions
                .lock()
                .await
                .push((chain_id, TreeKind::MakerTx, root_hex.to_string()));
            Ok(())
        }
    }

    fn accumulator(
        store: MockStore,
    ) -> MerkleAccumulator<MockStore, MockContract> {
        MerkleAccumulator::new(
            store,
            MockContract::default(),
            ChainRegistry::with_defaults(),
            vec![1],
        )
    }

    #[tokio::test]
    async fn rebuild_then_poll_submits_each_root_once() {
        let store = MockStore::default();
        store.deposits.lock().await.extend([row(1, 1, "0xa"), row(2, 1, "0xb")]);
        store.replies.lock().await.push(row(3, 1, "0xc"));
        let acc = accumulator(store);

        acc.rebuild().await.unwrap();
        assert_eq!(acc.leaf_count(1, TreeKind::UserTx), 2);
        assert_eq!(acc.leaf_count(1, TreeKind::MakerTx), 1);

        acc.poll_chain(1).await.unwrap();
        assert_eq!(acc.contract.submissions.lock().await.len(), 2);

        // nothing changed: roots already match, no resubmission
        acc.poll_chain(1).await.unwrap();
        assert_eq!(acc.contract.submissions.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn repeated_polling_never_duplicates_leaves() {
        let store = MockStore::default();
        store.deposits.lock().await.push(row(1, 1, "0xa"));
        let acc = accumulator(store);
        acc.rebuild().await.unwrap();
        let root = acc.root_hex(1, TreeKind::UserTx);

        // same row surfaces again (high-water mark reset simulates a
        // re-scan); the tree must not grow
        for _ in 0..3 {
            let rows = vec![row(1, 1, "0xa")];
            {
                let mut trees = acc.trees.write();
                let entry = trees.get_mut(&1).unwrap();
                for r in &rows {
                    entry.append(TreeKind::UserTx, r);
                }
            }
        }
        assert_eq!(acc.leaf_count(1, TreeKind::UserTx), 1);
        assert_eq!(acc.root_hex(1, TreeKind::UserTx), root);
    }

    #[tokio::test]
    async fn poll_folds_in_rows_past_the_high_water_mark() {
        let store = MockStore::default();
        store.deposits.lock().await.push(row(1, 1, "0xa"));
        let acc = accumulator(store);
        acc.rebuild().await.unwrap();
        let first_root = acc.root_hex(1, TreeKind::UserTx).unwrap();

        acc.store.deposits.lock().await.push(row(5, 1, "0xnew"));
        acc.poll_chain(1).await.unwrap();

        assert_eq!(acc.leaf_count(1, TreeKind::UserTx), 2);
        let second_root = acc.root_hex(1, TreeKind::UserTx).unwrap();
        assert_ne!(first_root, second_root);

        // latest submission carries the new root
        let submissions = acc.contract.submissions.lock().await;
        assert_eq!(submissions.last().unwrap().2, second_root);
    }

    #[tokio::test]
    async fn proofs_verify_and_absent_chains_report_nonexistent() {
        let store = MockStore::default();
        store.deposits.lock().await.extend([row(1, 1, "0xa"), row(2, 1, "0xb"), row(3, 1, "0xc")]);
        let acc = accumulator(store);
        acc.rebuild().await.unwrap();

        let leaf = MerkleLeaf::from_transaction(&tx(2, 1, "0xb"), "100000007").hash();
        let proof = acc.proof(1, TreeKind::UserTx, &leaf).unwrap();
        let root = acc.root_hex(1, TreeKind::UserTx).unwrap();
        let mut root_bytes = [0u8; 32];
        hex::decode_to_slice(root, &mut root_bytes).unwrap();
        assert!(crate::tree::verify_proof(leaf, &proof, root_bytes));

        // never-built chain: absence, not an error
        assert!(acc.proof(99, TreeKind::UserTx, &leaf).is_none());
        // unknown leaf: absence
        assert!(acc.proof(1, TreeKind::UserTx, &[0u8; 32]).is_none());
    }
}
