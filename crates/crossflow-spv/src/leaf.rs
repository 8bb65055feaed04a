//! The Merkle leaf scheme
//!
//! A leaf commits to everything a verifier needs to adjudicate one transfer:
//! where it happened, who paid whom, what was paid, and what reply was owed.

use crossflow_types::Transaction;
use sha3::{Digest, Keccak256};

/// Fields committed by one leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleLeaf {
    pub chain_id: u32,
    pub tx_hash: String,
    pub from: String,
    pub to: String,
    pub nonce: u64,
    pub value: String,
    pub token: String,
    /// Unix seconds
    pub timestamp: i64,
    /// Expected reply amount recorded at match time
    pub expect_value: String,
    pub route_id: String,
}

impl MerkleLeaf {
    pub fn from_transaction(tx: &Transaction, expect_value: &str) -> Self {
        Self {
            chain_id: tx.chain_id,
            tx_hash: tx.hash.clone(),
            from: tx.from.clone(),
            to: tx.to.clone(),
            nonce: tx.nonce,
            value: tx.value.clone(),
            token: tx.token.clone(),
            timestamp: tx.unix_time(),
            expect_value: expect_value.to_string(),
            route_id: tx.route_id.clone().unwrap_or_default(),
        }
    }

    /// Keccak-256 commitment. String fields are lowercased and
    /// length-prefixed so no two field sequences collide.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Keccak256::new();
        hasher.update(self.chain_id.to_be_bytes());
        for field in [
            &self.tx_hash,
            &self.from,
            &self.to,
            &self.value,
            &self.token,
            &self.expect_value,
            &self.route_id,
        ] {
            let bytes = field.trim().to_lowercase();
            hasher.update((bytes.len() as u32).to_be_bytes());
            hasher.update(bytes.as_bytes());
        }
        hasher.update(self.nonce.to_be_bytes());
        hasher.update(self.timestamp.to_be_bytes());
        hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf() -> MerkleLeaf {
        MerkleLeaf {
            chain_id: 1,
            tx_hash: "0xAbc".into(),
            from: "0xUser".into(),
            to: "0xMaker".into(),
            nonce: 7,
            value: "100000002".into(),
            token: "0xToken".into(),
            timestamp: 1_700_000_000,
            expect_value: "100000007".into(),
            route_id: "r1".into(),
        }
    }

    #[test]
    fn hash_ignores_address_case() {
        let mut other = leaf();
        other.tx_hash = "0xABC".into();
        other.from = "0xuser".into();
        assert_eq!(leaf().hash(), other.hash());
    }

    #[test]
    fn hash_is_sensitive_to_every_field() {
        let base = leaf().hash();

        let mut changed = leaf();
        changed.value = "100000003".into();
        assert_ne!(base, changed.hash());

        let mut changed = leaf();
        changed.nonce = 8;
        assert_ne!(base, changed.hash());

        let mut changed = leaf();
        changed.expect_value = "100000008".into();
        assert_ne!(base, changed.hash());

        let mut changed = leaf();
        changed.timestamp += 1;
        assert_ne!(base, changed.hash());
    }

    #[test]
    fn field_boundaries_do_not_collide() {
        // "ab" + "c" vs "a" + "bc" must hash differently
        let mut a = leaf();
        a.from = "ab".into();
        a.to = "c".into();
        let mut b = leaf();
        b.from = "a".into();
        b.to = "bc".into();
        assert_ne!(a.hash(), b.hash());
    }
}
