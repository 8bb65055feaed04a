//! Append-only Merkle tree over insertion-ordered leaves
//!
//! Shape is determined by insertion order alone. An odd node at any level is
//! paired with itself. Appends dedupe by leaf hash, so re-scanning the same
//! rows cannot grow the tree.

use sha3::{Digest, Keccak256};
use std::collections::HashMap;

/// One sibling on the path from a leaf to the root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofStep {
    /// The sibling sits to the left of the running hash
    pub is_left: bool,
    pub hash: [u8; 32],
}

fn parent(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Incremental Merkle tree with by-hash membership
#[derive(Debug, Default)]
pub struct MerkleTree {
    leaves: Vec<[u8; 32]>,
    index: HashMap<[u8; 32], usize>,
}

impl MerkleTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn contains(&self, leaf: &[u8; 32]) -> bool {
        self.index.contains_key(leaf)
    }

    /// Append a leaf unless it is already present. Returns whether the tree
    /// changed.
    pub fn append(&mut self, leaf: [u8; 32]) -> bool {
        if self.contains(&leaf) {
            return false;
        }
        self.index.insert(leaf, self.leaves.len());
        self.leaves.push(leaf);
        true
    }

    /// Root over the current leaves; `None` for an empty tree
    pub fn root(&self) -> Option<[u8; 32]> {
        if self.leaves.is_empty() {
            return None;
        }
        let mut layer = self.leaves.clone();
        while layer.len() > 1 {
            layer = layer
                .chunks(2)
                .map(|chunk| {
                    let left = chunk[0];
                    let right = chunk.get(1).copied().unwrap_or(left);
                    parent(&left, &right)
                })
                .collect();
        }
        layer.into_iter().next()
    }

    pub fn root_hex(&self) -> Option<String> {
        self.root().map(hex::encode)
    }

    /// Inclusion proof for a leaf, located by its hash
    pub fn proof(&self, leaf: &[u8; 32]) -> Option<Vec<ProofStep>> {
        let mut index = *self.index.get(leaf)?;
        let mut proof = Vec::new();
        let mut layer = self.leaves.clone();

        while layer.len() > 1 {
            let sibling = if index % 2 == 0 { index + 1 } else { index - 1 };
            if sibling < layer.len() {
                proof.push(ProofStep {
                    is_left: index % 2 == 1,
                    hash: layer[sibling],
                });
            } else {
                // odd tail pairs with itself
                proof.push(ProofStep {
                    is_left: false,
                    hash: layer[index],
                });
            }

            layer = layer
                .chunks(2)
                .map(|chunk| {
                    let left = chunk[0];
                    let right = chunk.get(1).copied().unwrap_or(left);
                    parent(&left, &right)
                })
                .collect();
            index /= 2;
        }

        Some(proof)
    }
}

/// Recompute the path committed by `proof` and compare against `root`
pub fn verify_proof(leaf: [u8; 32], proof: &[ProofStep], root: [u8; 32]) -> bool {
    let mut current = leaf;
    for step in proof {
        current = if step.is_left {
            parent(&step.hash, &current)
        } else {
            parent(&current, &step.hash)
        };
    }
    current == root
}
