//! Route configuration entries

use serde::{Deserialize, Serialize};

/// A directional trading pair a maker services.
///
/// `A -> B` and `B -> A` are separate entries. The active window is a closed
/// interval in unix seconds. Ambiguous (overlapping) configurations are a
/// configuration error; lookups take the first match in file order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub maker_id: String,
    pub from_chain: u32,
    pub from_symbol: String,
    pub from_token: String,
    pub to_chain: u32,
    pub to_symbol: String,
    pub to_token: String,
    /// Maker address replies are sent from, on the destination chain
    pub sender: String,
    /// Maker address deposits are paid to, on the origin chain
    pub recipient: String,
    /// Window start, unix seconds, inclusive
    pub start_time: i64,
    /// Window end, unix seconds, inclusive
    pub end_time: i64,
    /// Token decimals backing the fee parameters
    pub precision: u8,
    /// Flat trading fee in raw destination-token units, decimal string
    pub trading_fee: String,
    /// Gas fee rate in thousandths
    pub gas_fee_permille: u32,
}

impl Route {
    /// Whether the route services transfers observed at `unix` seconds
    pub fn is_active_at(&self, unix: i64) -> bool {
        self.start_time <= unix && unix <= self.end_time
    }
}

/// Case-insensitive address/symbol comparison; chains mix checksummed and
/// plain encodings
pub(crate) fn same(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route() -> Route {
        Route {
            id: "r1".into(),
            maker_id: "m1".into(),
            from_chain: 1,
            from_symbol: "USDT".into(),
            from_token: "0xdac17f958d2ee523a2206206994597c13d831ec7".into(),
            to_chain: 2,
            to_symbol: "USDT".into(),
            to_token: "0xfd086bc7cd5c481dcc9c85ebe478a1c0b69fcbb9".into(),
            sender: "0xMakerSender".into(),
            recipient: "0xMakerRecipient".into(),
            start_time: 1_000,
            end_time: 2_000,
            precision: 6,
            trading_fee: "0".into(),
            gas_fee_permille: 0,
        }
    }

    #[test]
    fn window_is_a_closed_interval() {
        let r = route();
        assert!(r.is_active_at(1_000));
        assert!(r.is_active_at(1_500));
        assert!(r.is_active_at(2_000));
        assert!(!r.is_active_at(999));
        assert!(!r.is_active_at(2_001));
    }

    #[test]
    fn comparison_ignores_case_and_padding() {
        assert!(same("0xABCDef", " 0xabcdef "));
        assert!(!same("0xabc", "0xabd"));
    }
}
