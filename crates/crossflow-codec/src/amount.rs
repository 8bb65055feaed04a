//! Tagging and untagging of routing flags in decimal amount strings
//!
//! The flag is a fixed 4-digit window. Where it lives depends on the chain
//! class: limited-digit chains cannot represent every digit of a long amount,
//! so the flag replaces the tail of the chain's valid-digit prefix; on every
//! other chain it replaces the literal last 4 characters.

use alloy_primitives::U256;
use crossflow_types::{ChainProfile, CrossflowError, Result};

/// Fixed width of the embedded flag, in decimal digits
pub const FLAG_WIDTH: usize = 4;

/// Extracted flag value meaning "no tag present"
pub const UNTAGGED_FLAG: &str = "0000";

/// Result of stripping a flag out of a tagged amount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Untagged {
    /// The real amount, flag window zeroed
    pub amount: String,
    /// The extracted 4-digit flag; [`UNTAGGED_FLAG`] if none was embedded
    pub flag: String,
}

/// Largest value representable on the chain, `2^bits - 1`
pub fn max_amount(profile: &ChainProfile) -> U256 {
    if profile.max_bits >= 256 {
        U256::MAX
    } else {
        (U256::from(1u8) << profile.max_bits as usize) - U256::from(1u8)
    }
}

fn require_digits(amount: &str) -> Result<&str> {
    let trimmed = amount.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CrossflowError::MalformedAmount {
            amount: amount.to_string(),
        });
    }
    Ok(trimmed)
}

fn parse_decimal(digits: &str, chain_id: u32) -> Result<U256> {
    U256::from_str_radix(digits, 10).map_err(|_| CrossflowError::AmountOutOfRange {
        amount: digits.to_string(),
        chain_id,
    })
}

fn normalize_flag(flag: &str) -> Result<String> {
    let trimmed = flag.trim();
    if trimmed.is_empty()
        || trimmed.len() > FLAG_WIDTH
        || !trimmed.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(CrossflowError::FlagTooWide {
            flag: flag.to_string(),
            width: FLAG_WIDTH,
        });
    }
    Ok(format!("{trimmed:0>width$}", width = FLAG_WIDTH))
}

/// Number of leading digits of `amount` that fall within the chain's
/// representable range.
///
/// This is where the flag lives on limited-digit chains: the prefix of
/// `max_digits` characters is compared numerically against `2^bits - 1`;
/// if it overflows, one fewer digit is valid.
pub fn valid_digit_count(profile: &ChainProfile, amount: &str) -> Result<usize> {
    let digits = require_digits(amount)?;
    let max = max_amount(profile);
    let max_digits = max.to_string().len();
    if digits.len() < max_digits {
        return Ok(digits.len());
    }
    let prefix_value = parse_decimal(&digits[..max_digits], profile.chain_id)?;
    if prefix_value <= max {
        Ok(max_digits)
    } else {
        Ok(max_digits - 1)
    }
}

/// Embed `flag` into `real_amount` for `profile`'s chain.
///
/// The real amount's flag window is overwritten, so callers settle amounts
/// whose window digits are already zero; the loss is at most `10^4 - 1` raw
/// units and is part of the wire format.
pub fn tag(profile: &ChainProfile, real_amount: &str, flag: &str) -> Result<String> {
    let digits = require_digits(real_amount)?;
    let flag = normalize_flag(flag)?;
    if digits.len() < FLAG_WIDTH {
        return Err(CrossflowError::AmountTooSmall {
            amount: real_amount.to_string(),
            width: FLAG_WIDTH,
        });
    }
    let value = parse_decimal(digits, profile.chain_id)?;
    if value.is_zero() {
        return Err(CrossflowError::AmountTooSmall {
            amount: real_amount.to_string(),
            width: FLAG_WIDTH,
        });
    }

    let valid = valid_digit_count(profile, digits)?;
    if profile.limited_digits && digits.len() > valid {
        if valid < FLAG_WIDTH {
            return Err(CrossflowError::AmountTooSmall {
                amount: real_amount.to_string(),
                width: FLAG_WIDTH,
            });
        }
        Ok(format!(
            "{}{}{}",
            &digits[..valid - FLAG_WIDTH],
            flag,
            &digits[valid..]
        ))
    } else {
        if value > max_amount(profile) {
            return Err(CrossflowError::AmountOutOfRange {
                amount: digits.to_string(),
                chain_id: profile.chain_id,
            });
        }
        Ok(format!("{}{}", &digits[..digits.len() - FLAG_WIDTH], flag))
    }
}

/// Inverse of [`tag`]: recover the real amount and the embedded flag.
///
/// A flag of `"0000"` is a valid outcome meaning the amount carried no tag.
pub fn untag(profile: &ChainProfile, tagged_amount: &str) -> Result<Untagged> {
    let digits = require_digits(tagged_amount)?;
    if digits.len() < FLAG_WIDTH {
        return Err(CrossflowError::AmountTooSmall {
            amount: tagged_amount.to_string(),
            width: FLAG_WIDTH,
        });
    }

    let valid = valid_digit_count(profile, digits)?;
    if profile.limited_digits && digits.len() > valid {
        if valid < FLAG_WIDTH {
            return Err(CrossflowError::AmountTooSmall {
                amount: tagged_amount.to_string(),
                width: FLAG_WIDTH,
            });
        }
        Ok(Untagged {
            amount: format!(
                "{}{}{}",
                &digits[..valid - FLAG_WIDTH],
                "0".repeat(FLAG_WIDTH),
                &digits[valid..]
            ),
            flag: digits[valid - FLAG_WIDTH..valid].to_string(),
        })
    } else {
        let value = parse_decimal(digits, profile.chain_id)?;
        if value > max_amount(profile) {
            return Err(CrossflowError::AmountOutOfRange {
                amount: digits.to_string(),
                chain_id: profile.chain_id,
            });
        }
        Ok(Untagged {
            amount: format!(
                "{}{}",
                &digits[..digits.len() - FLAG_WIDTH],
                "0".repeat(FLAG_WIDTH)
            ),
            flag: digits[digits.len() - FLAG_WIDTH..].to_string(),
        })
    }
}

/// Flag carrying a destination chain id
pub fn chain_flag(chain_id: u32) -> Result<String> {
    if chain_id == 0 || chain_id > 9999 {
        return Err(CrossflowError::FlagTooWide {
            flag: chain_id.to_string(),
            width: FLAG_WIDTH,
        });
    }
    Ok(format!("{chain_id:04}"))
}

/// Recover a destination chain id from an extracted flag, if one is present
pub fn decode_chain_flag(flag: &str) -> Option<u32> {
    let flag = flag.trim();
    if flag == UNTAGGED_FLAG {
        return None;
    }
    flag.parse::<u32>().ok().filter(|id| *id > 0)
}

/// Flag carrying a deposit nonce; nonces past the flag width cannot be
/// embedded and the deposit cannot be settled
pub fn nonce_flag(nonce: u64) -> Result<String> {
    if nonce > 9999 {
        return Err(CrossflowError::FlagTooWide {
            flag: nonce.to_string(),
            width: FLAG_WIDTH,
        });
    }
    Ok(format!("{nonce:04}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossflow_types::ChainProfile;
    use proptest::prelude::*;

    fn mainnet() -> ChainProfile {
        ChainProfile::new(1, "mainnet", 256, false)
    }

    fn zksync() -> ChainProfile {
        ChainProfile::new(3, "zksync-lite", 35, true)
    }

    fn loopring() -> ChainProfile {
        ChainProfile::new(9, "loopring", 248, false)
    }

    #[test]
    fn tag_replaces_the_tail_on_full_width_chains() {
        let tagged = tag(&mainnet(), "100000123", "0002").unwrap();
        assert_eq!(tagged, "100000002");

        let untagged = untag(&mainnet(), &tagged).unwrap();
        assert_eq!(untagged.amount, "100000000");
        assert_eq!(untagged.flag, "0002");
    }

    #[test]
    fn tag_embeds_inside_the_valid_prefix_on_limited_chains() {
        // 2^35 - 1 = 34359738367 (11 digits); a 19-digit wei amount keeps
        // its last 8 digits untouched and carries the flag at offset 7..11.
        let profile = zksync();
        let real = "1234567000012345678";
        assert_eq!(valid_digit_count(&profile, real).unwrap(), 11);

        let tagged = tag(&profile, real, "123").unwrap();
        assert_eq!(tagged, "1234567012312345678");

        let untagged = untag(&profile, &tagged).unwrap();
        assert_eq!(untagged.amount, real);
        assert_eq!(untagged.flag, "0123");
    }

    #[test]
    fn valid_digit_count_shrinks_when_the_prefix_overflows() {
        // Prefix 99999999999 > 2^35 - 1, so only 10 digits are valid.
        assert_eq!(valid_digit_count(&zksync(), "9999999999912345678").unwrap(), 10);
        assert_eq!(valid_digit_count(&zksync(), "1234567").unwrap(), 7);
    }

    #[test]
    fn out_of_range_amounts_are_rejected_not_truncated() {
        // 2^248 - 1 has 75 digits; 76 digits can never fit.
        let amount = format!("1{}", "0".repeat(75));
        let err = tag(&loopring(), &amount, "0001").unwrap_err();
        assert!(matches!(err, CrossflowError::AmountOutOfRange { .. }));
        let err = untag(&loopring(), &amount).unwrap_err();
        assert!(matches!(err, CrossflowError::AmountOutOfRange { .. }));
    }

    #[test]
    fn short_and_zero_amounts_are_rejected() {
        assert!(matches!(
            tag(&mainnet(), "123", "0002").unwrap_err(),
            CrossflowError::AmountTooSmall { .. }
        ));
        assert!(matches!(
            tag(&mainnet(), "0000", "0002").unwrap_err(),
            CrossflowError::AmountTooSmall { .. }
        ));
        assert!(matches!(
            untag(&mainnet(), "12").unwrap_err(),
            CrossflowError::AmountTooSmall { .. }
        ));
    }

    #[test]
    fn wide_flags_are_rejected() {
        assert!(matches!(
            tag(&mainnet(), "100000000", "12345").unwrap_err(),
            CrossflowError::FlagTooWide { .. }
        ));
        assert!(nonce_flag(10_000).is_err());
        assert!(chain_flag(10_000).is_err());
    }

    #[test]
    fn malformed_amounts_are_rejected() {
        assert!(matches!(
            tag(&mainnet(), "12e4", "0001").unwrap_err(),
            CrossflowError::MalformedAmount { .. }
        ));
        assert!(matches!(
            untag(&mainnet(), "-1000").unwrap_err(),
            CrossflowError::MalformedAmount { .. }
        ));
    }

    #[test]
    fn zero_flag_means_untagged() {
        let untagged = untag(&mainnet(), "123450000").unwrap();
        assert_eq!(untagged.flag, UNTAGGED_FLAG);
        assert_eq!(untagged.amount, "123450000");
        assert_eq!(decode_chain_flag(&untagged.flag), None);
    }

    #[test]
    fn chain_flags_round_trip() {
        assert_eq!(chain_flag(2).unwrap(), "0002");
        assert_eq!(decode_chain_flag("0002"), Some(2));
        assert_eq!(nonce_flag(7).unwrap(), "0007");
    }

    proptest! {
        #[test]
        fn round_trip_on_full_width_chains(base in 1u64..=1_000_000_000_000u64, flag in 1u32..=9999u32) {
            let real = format!("{}0000", base);
            let flag_text = format!("{flag:04}");
            let tagged = tag(&mainnet(), &real, &flag_text).unwrap();
            let untagged = untag(&mainnet(), &tagged).unwrap();
            prop_assert_eq!(untagged.amount, real);
            prop_assert_eq!(untagged.flag, flag_text);
        }

        #[test]
        fn round_trip_on_limited_digit_chains(
            head in 1_000_000u64..=3_435_966u64,
            tail in 0u64..=99_999_999u64,
            flag in 1u32..=9999u32,
        ) {
            // head(7) + window(4) + tail(8) = 19 digits, prefix under 2^35 - 1
            let real = format!("{head}0000{tail:08}");
            let flag_text = format!("{flag:04}");
            let tagged = tag(&zksync(), &real, &flag_text).unwrap();
            let untagged = untag(&zksync(), &tagged).unwrap();
            prop_assert_eq!(untagged.amount, real);
            prop_assert_eq!(untagged.flag, flag_text);
        }
    }
}
