//! Crossflow Types - Canonical domain types for cross-chain transfer reconciliation
//!
//! This crate contains the foundational types shared by every crossflow crate,
//! with zero dependencies on the rest of the workspace:
//!
//! - Observed on-chain transfers and their status machine
//! - The pairing record linking a user deposit to its maker reply
//! - Per-chain profiles (amount bit widths, matching windows)
//! - The shared error taxonomy
//! - Deterministic transfer-id derivation

pub mod chain;
pub mod error;
pub mod pairing;
pub mod transfer;

pub use chain::*;
pub use error::*;
pub use pairing::*;
pub use transfer::*;
