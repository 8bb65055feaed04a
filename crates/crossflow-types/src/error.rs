//! Error types for crossflow
//!
//! Per-transaction failures are terminal and logged; infrastructure failures
//! surface to the transport so redelivery can retry them.

use thiserror::Error;

/// Result type for crossflow operations
pub type Result<T> = std::result::Result<T, CrossflowError>;

/// Crossflow error types
#[derive(Debug, Clone, Error)]
pub enum CrossflowError {
    // ========================================================================
    // Codec Errors
    // ========================================================================

    /// The chain has no amount profile
    #[error("Chain {chain_id} is not supported")]
    ChainUnsupported { chain_id: u32 },

    /// The amount has fewer digits than the flag is wide
    #[error("Amount {amount} is too short to carry a {width}-digit flag")]
    AmountTooSmall { amount: String, width: usize },

    /// The amount exceeds 2^bits - 1 for the chain
    #[error("Amount {amount} exceeds the representable range of chain {chain_id}")]
    AmountOutOfRange { amount: String, chain_id: u32 },

    /// The flag does not fit the fixed flag width
    #[error("Flag {flag} does not fit in {width} decimal digits")]
    FlagTooWide { flag: String, width: usize },

    /// The amount is not a plain decimal digit string
    #[error("Amount {amount} is not a decimal string")]
    MalformedAmount { amount: String },

    // ========================================================================
    // Matching Errors
    // ========================================================================

    /// A required transfer field is empty
    #[error("Transaction {chain_id}/{hash} is missing required field {field}")]
    MissingParameter {
        chain_id: u32,
        hash: String,
        field: &'static str,
    },

    /// No active route covers the transfer
    #[error("No active route for chain {from_chain} -> {to_chain} {symbol} at {timestamp}")]
    MissingRoute {
        from_chain: u32,
        to_chain: u32,
        symbol: String,
        timestamp: i64,
    },

    /// The pairing already references both sides
    #[error("Transfer {transfer_id} is already paired")]
    AlreadyPaired { transfer_id: String },

    /// A status write targeted a transition the state machine forbids
    #[error("Invalid status transition {from} -> {to} for transaction {id}")]
    InvalidTransition { id: i64, from: i16, to: i16 },

    // ========================================================================
    // Infrastructure Errors
    // ========================================================================

    /// Store/transaction failure, retried via transport redelivery
    #[error("Store error: {0}")]
    Store(String),

    /// RPC or signer failure while syncing an on-chain root
    #[error("Chain RPC error: {0}")]
    ChainRpc(String),
}

impl CrossflowError {
    /// Create a store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create a chain RPC error
    pub fn chain_rpc(message: impl Into<String>) -> Self {
        Self::ChainRpc(message.into())
    }

    /// Whether the transport should redeliver the batch carrying this failure.
    ///
    /// Validation, routing and codec failures are per-transaction terminal;
    /// only infrastructure failures are worth retrying.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::ChainRpc(_))
    }

    /// Whether the failure means "destination cannot be determined" and the
    /// transfer must be marked unroutable rather than guessed at.
    pub fn is_routing(&self) -> bool {
        matches!(
            self,
            Self::ChainUnsupported { .. }
                | Self::AmountTooSmall { .. }
                | Self::AmountOutOfRange { .. }
                | Self::FlagTooWide { .. }
                | Self::MalformedAmount { .. }
                | Self::MissingRoute { .. }
        )
    }
}
