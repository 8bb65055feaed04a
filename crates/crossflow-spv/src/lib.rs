//! Crossflow SPV - verifiable commitments over transfers still owed a response
//!
//! Two append-only Merkle trees per watched chain: deposits that remain
//! unpaid past their receipt window, and maker replies flagged late and
//! awaiting dispute resolution. Leaves are Keccak-256 commitments in
//! transaction-id insertion order (no canonical sorting), so a tree is
//! reproducible from the store alone. Roots are pushed through a contract
//! seam whenever the local tree diverges from the chain, and inclusion
//! proofs let an on-chain verifier check one transfer without replaying
//! history.

mod accumulator;
mod leaf;
mod poller;
mod tree;

pub use accumulator::{
    MerkleAccumulator, RootContract, SpvRow, SpvStore, TreeKind, POLL_INTERVAL,
};
pub use leaf::MerkleLeaf;
pub use poller::run_poller;
pub use tree::{verify_proof, MerkleTree, ProofStep};
