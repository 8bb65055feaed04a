//! The pairing record linking one deposit to its settling reply

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The 1:1 link between a user deposit and the maker reply that settles it.
///
/// Keyed by the deterministic transfer id, so repeated match attempts from
/// either side upsert the same row. `in_id`/`out_id`, once set, are only
/// rewritten by a process that discovers the true counterpart. A pairing
/// with both ids set implies both referenced transactions carry a terminal
/// matched status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pairing {
    /// Deterministic transfer id (see [`crate::transfer_id`])
    pub transfer_id: String,
    /// Internal id of the inbound (deposit) transaction
    pub in_id: Option<i64>,
    /// Internal id of the outbound (reply) transaction
    pub out_id: Option<i64>,
    pub from_chain: u32,
    pub to_chain: u32,
    /// Expected reply amount in raw units, nonce tag included
    pub expect_value: String,
    /// Maker address the reply must come from
    pub reply_sender: String,
    /// User address the reply must pay
    pub reply_account: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pairing {
    /// Both sides are linked
    pub fn is_settled(&self) -> bool {
        self.in_id.is_some() && self.out_id.is_some()
    }
}
