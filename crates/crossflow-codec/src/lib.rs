//! Crossflow Codec - routing flags embedded in decimal token amounts
//!
//! A bridge deposit carries its destination chain, and a maker reply carries
//! the deposit nonce, inside the decimal digits of the transferred amount —
//! no out-of-band side channel. This crate is the pure-function core that
//! tags and untags those flags and derives the expected reply amount:
//!
//! - [`tag`] / [`untag`] / [`valid_digit_count`] over decimal amount strings
//! - per-chain range checks against `2^bits - 1`, as explicit [`U256`]
//!   comparisons, never floating point and never string ordering
//! - [`FeeSchedule`] / [`expected_reply_value`] for the settlement amount a
//!   maker owes against a deposit
//!
//! [`U256`]: alloy_primitives::U256

mod amount;
mod fee;

pub use amount::{
    chain_flag, decode_chain_flag, max_amount, nonce_flag, tag, untag, valid_digit_count,
    Untagged, FLAG_WIDTH, UNTAGGED_FLAG,
};
pub use fee::{expected_reply_value, FeeSchedule};
