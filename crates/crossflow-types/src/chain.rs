//! Per-chain profiles and the chain registry
//!
//! A profile fixes the amount bit width used for codec range checks, the
//! limited-digit classification, and the matching windows. Defaults cover
//! the supported chains; deployments override them from configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default tolerance for a reply timestamped before its deposit (seconds)
pub const DEFAULT_LOOKBACK_SECS: i64 = 5 * 60;

/// Rollup chains settle with enough lag that a maker reply can be
/// timestamped far ahead of the deposit it answers
pub const ROLLUP_LOOKBACK_SECS: i64 = 120 * 60;

/// Default ceiling on reply delay before a pairing is classified late (seconds)
pub const DEFAULT_MAX_RECEIPT_SECS: i64 = 10 * 60;

/// Amount and timing profile for one chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainProfile {
    pub chain_id: u32,
    pub name: String,
    /// Amounts must fit `2^max_bits - 1`
    pub max_bits: u32,
    /// Limited-digit chains carry the amount flag inside the valid-digit
    /// prefix instead of the literal string tail
    pub limited_digits: bool,
    /// How far a reply may predate its deposit and still pair
    pub lookback_secs: i64,
    /// Reply delay beyond this is classified late
    pub max_receipt_secs: i64,
}

impl ChainProfile {
    pub fn new(chain_id: u32, name: &str, max_bits: u32, limited_digits: bool) -> Self {
        Self {
            chain_id,
            name: name.to_string(),
            max_bits,
            limited_digits,
            lookback_secs: DEFAULT_LOOKBACK_SECS,
            max_receipt_secs: DEFAULT_MAX_RECEIPT_SECS,
        }
    }

    pub fn with_lookback(mut self, lookback_secs: i64) -> Self {
        self.lookback_secs = lookback_secs;
        self
    }

    pub fn with_max_receipt(mut self, max_receipt_secs: i64) -> Self {
        self.max_receipt_secs = max_receipt_secs;
        self
    }
}

/// Lookup table of chain profiles
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    profiles: HashMap<u32, ChainProfile>,
}

impl ChainRegistry {
    /// Registry with the built-in profiles for the supported chains
    pub fn with_defaults() -> Self {
        let defaults = [
            ChainProfile::new(1, "mainnet", 256, false),
            ChainProfile::new(2, "arbitrum", 256, false),
            ChainProfile::new(3, "zksync-lite", 35, true),
            ChainProfile::new(4, "starknet", 251, false).with_lookback(ROLLUP_LOOKBACK_SECS),
            ChainProfile::new(6, "polygon", 256, false),
            ChainProfile::new(7, "optimism", 256, false),
            ChainProfile::new(8, "immutablex", 28, true),
            ChainProfile::new(9, "loopring", 248, false),
            ChainProfile::new(10, "metis", 256, false),
            ChainProfile::new(11, "dydx", 28, true),
            ChainProfile::new(12, "zkspace", 35, true),
            ChainProfile::new(13, "boba", 256, false),
            ChainProfile::new(14, "zksync-era", 256, false),
            ChainProfile::new(15, "bsc", 256, false),
        ];
        let mut registry = Self::default();
        for profile in defaults {
            registry.insert(profile);
        }
        registry
    }

    /// Empty registry, profiles supplied entirely by configuration
    pub fn from_profiles(profiles: impl IntoIterator<Item = ChainProfile>) -> Self {
        let mut registry = Self::default();
        for profile in profiles {
            registry.insert(profile);
        }
        registry
    }

    /// Insert or replace a profile
    pub fn insert(&mut self, profile: ChainProfile) {
        self.profiles.insert(profile.chain_id, profile);
    }

    pub fn get(&self, chain_id: u32) -> Option<&ChainProfile> {
        self.profiles.get(&chain_id)
    }

    pub fn contains(&self, chain_id: u32) -> bool {
        self.profiles.contains_key(&chain_id)
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.profiles.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
