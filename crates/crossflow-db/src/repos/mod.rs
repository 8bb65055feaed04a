//! Repositories backing the read-only query API

mod pairing;
mod transaction;

pub use pairing::PairingRepo;
pub use transaction::{TransactionRepo, TransferFilter};
