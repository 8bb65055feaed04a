//! Expected reply amount derivation
//!
//! Given a deposit's tagged value and the route's pool parameters, compute
//! the exact amount the maker must send back: strip the destination tag,
//! take the trading fee, take the per-mille gas fee of the remainder, and
//! tag the result with the deposit nonce.

use alloy_primitives::U256;
use crossflow_types::{ChainProfile, CrossflowError, Result};

use crate::amount::{nonce_flag, tag, untag, FLAG_WIDTH};

/// Pool-level fee parameters of a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeSchedule {
    /// Flat trading fee in raw destination-token units
    pub trading_fee: U256,
    /// Gas fee rate in thousandths of the post-trading-fee amount
    pub gas_fee_permille: u32,
}

impl FeeSchedule {
    pub fn new(trading_fee: U256, gas_fee_permille: u32) -> Self {
        Self {
            trading_fee,
            gas_fee_permille,
        }
    }

    /// Zero-fee schedule
    pub fn free() -> Self {
        Self {
            trading_fee: U256::ZERO,
            gas_fee_permille: 0,
        }
    }

    /// Net settlement value before the nonce tag is applied
    fn net_of(&self, real_value: U256) -> Option<U256> {
        let after_trading = real_value.checked_sub(self.trading_fee)?;
        let gas = after_trading
            .checked_mul(U256::from(self.gas_fee_permille))?
            .checked_div(U256::from(1000u32))?;
        after_trading.checked_sub(gas)
    }
}

/// Compute the exact reply amount a maker owes for a deposit.
///
/// `deposit_value` is the tagged amount observed on `from_profile`'s chain;
/// the result is tagged with `nonce` for `to_profile`'s chain. Fails when
/// the deposit does not cover the fees or the nonce does not fit the flag.
pub fn expected_reply_value(
    from_profile: &ChainProfile,
    to_profile: &ChainProfile,
    deposit_value: &str,
    fees: &FeeSchedule,
    nonce: u64,
) -> Result<String> {
    let untagged = untag(from_profile, deposit_value)?;
    let real = U256::from_str_radix(&untagged.amount, 10).map_err(|_| {
        CrossflowError::AmountOutOfRange {
            amount: untagged.amount.clone(),
            chain_id: from_profile.chain_id,
        }
    })?;

    let net = fees
        .net_of(real)
        .filter(|net| !net.is_zero())
        .ok_or_else(|| CrossflowError::AmountTooSmall {
            amount: deposit_value.to_string(),
            width: FLAG_WIDTH,
        })?;

    tag(to_profile, &net.to_string(), &nonce_flag(nonce)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossflow_types::ChainProfile;

    fn mainnet() -> ChainProfile {
        ChainProfile::new(1, "mainnet", 256, false)
    }

    fn arbitrum() -> ChainProfile {
        ChainProfile::new(2, "arbitrum", 256, false)
    }

    #[test]
    fn fee_free_reply_reuses_the_real_amount_with_the_nonce_tag() {
        let expected = expected_reply_value(
            &mainnet(),
            &arbitrum(),
            "100000002",
            &FeeSchedule::free(),
            7,
        )
        .unwrap();
        assert_eq!(expected, "100000007");
    }

    #[test]
    fn trading_and_gas_fees_come_off_before_the_tag() {
        // real 1_000_000_0000, minus 2_0000 trading fee, minus 1 permille gas
        let fees = FeeSchedule::new(U256::from(20_000u64), 1);
        let expected =
            expected_reply_value(&mainnet(), &arbitrum(), "10000000002", &fees, 42).unwrap();
        // (10_000_000_000 - 20_000) = 9_999_980_000; gas = 9_999_980; net = 9_989_980_020
        assert_eq!(expected, "9989980042");
    }

    #[test]
    fn deposit_below_the_fees_cannot_settle() {
        let fees = FeeSchedule::new(U256::from(10_000_000_000u64), 0);
        let err =
            expected_reply_value(&mainnet(), &arbitrum(), "100000002", &fees, 1).unwrap_err();
        assert!(matches!(err, CrossflowError::AmountTooSmall { .. }));
    }

    #[test]
    fn oversized_nonce_cannot_be_embedded() {
        let err = expected_reply_value(
            &mainnet(),
            &arbitrum(),
            "100000002",
            &FeeSchedule::free(),
            10_000,
        )
        .unwrap_err();
        assert!(matches!(err, CrossflowError::FlagTooWide { .. }));
    }
}
