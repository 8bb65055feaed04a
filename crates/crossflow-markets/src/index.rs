//! Snapshot-swapped route lookups

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::route::{same, Route};

/// An immutable view of the route table plus the derived lookup sets.
///
/// Built once per refresh; never mutated afterwards.
#[derive(Debug, Default)]
pub struct RouteSnapshot {
    routes: Vec<Route>,
    maker_senders: HashSet<String>,
    maker_recipients: HashSet<String>,
}

impl RouteSnapshot {
    pub fn new(routes: Vec<Route>) -> Self {
        let maker_senders = routes
            .iter()
            .map(|r| r.sender.trim().to_lowercase())
            .collect();
        let maker_recipients = routes
            .iter()
            .map(|r| r.recipient.trim().to_lowercase())
            .collect();
        Self {
            routes,
            maker_senders,
            maker_recipients,
        }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Some route sends its replies from `address`
    pub fn is_maker_sender(&self, address: &str) -> bool {
        self.maker_senders
            .contains(&address.trim().to_lowercase())
    }

    /// Some route receives its deposits at `address`
    pub fn is_maker_recipient(&self, address: &str) -> bool {
        self.maker_recipients
            .contains(&address.trim().to_lowercase())
    }

    /// Route servicing a user deposit. All of origin chain, destination
    /// chain, symbol, token, recipient address and timestamp-in-window must
    /// match simultaneously; the first matching entry wins.
    pub fn deposit_route(
        &self,
        from_chain: u32,
        to_chain: u32,
        symbol: &str,
        token: &str,
        recipient: &str,
        unix: i64,
    ) -> Option<&Route> {
        self.routes.iter().find(|r| {
            r.from_chain == from_chain
                && r.to_chain == to_chain
                && same(&r.from_symbol, symbol)
                && same(&r.from_token, token)
                && same(&r.recipient, recipient)
                && r.is_active_at(unix)
        })
    }

    /// Route servicing a maker reply, identified by the sending address on
    /// the destination chain.
    pub fn reply_route(
        &self,
        to_chain: u32,
        sender: &str,
        symbol: &str,
        token: &str,
        unix: i64,
    ) -> Option<&Route> {
        self.routes.iter().find(|r| {
            r.to_chain == to_chain
                && same(&r.sender, sender)
                && same(&r.to_symbol, symbol)
                && same(&r.to_token, token)
                && r.is_active_at(unix)
        })
    }
}

/// The shared route table.
///
/// Readers pin an [`Arc<RouteSnapshot>`] and keep it for the duration of one
/// matching attempt; [`MarketIndex::replace`] swaps the reference without
/// touching pinned snapshots.
pub struct MarketIndex {
    snapshot: RwLock<Arc<RouteSnapshot>>,
}

impl MarketIndex {
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(RouteSnapshot::new(routes))),
        }
    }

    /// Current snapshot; cheap clone of an `Arc`
    pub fn snapshot(&self) -> Arc<RouteSnapshot> {
        self.snapshot.read().clone()
    }

    /// Swap in a freshly built snapshot
    pub fn replace(&self, routes: Vec<Route>) {
        let next = Arc::new(RouteSnapshot::new(routes));
        let count = next.len();
        *self.snapshot.write() = next;
        info!(routes = count, "route table refreshed");
    }
}

impl Default for MarketIndex {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(id: &str, from_chain: u32, to_chain: u32, start: i64, end: i64) -> Route {
        Route {
            id: id.into(),
            maker_id: "m1".into(),
            from_chain,
            from_symbol: "USDT".into(),
            from_token: "0xtokena".into(),
            to_chain,
            to_symbol: "USDT".into(),
            to_token: "0xtokenb".into(),
            sender: "0xSender".into(),
            recipient: "0xRecipient".into(),
            start_time: start,
            end_time: end,
            precision: 6,
            trading_fee: "0".into(),
            gas_fee_permille: 0,
        }
    }

    #[test]
    fn deposit_lookup_requires_every_field_to_match() {
        let snapshot = RouteSnapshot::new(vec![route("r1", 1, 2, 0, 10_000)]);

        assert!(snapshot
            .deposit_route(1, 2, "usdt", "0xTOKENA", "0xrecipient", 5_000)
            .is_some());
        // wrong destination chain
        assert!(snapshot
            .deposit_route(1, 3, "usdt", "0xtokena", "0xrecipient", 5_000)
            .is_none());
        // wrong token
        assert!(snapshot
            .deposit_route(1, 2, "usdt", "0xother", "0xrecipient", 5_000)
            .is_none());
        // outside the window
        assert!(snapshot
            .deposit_route(1, 2, "usdt", "0xtokena", "0xrecipient", 10_001)
            .is_none());
    }

    #[test]
    fn first_match_wins_in_file_order() {
        let snapshot = RouteSnapshot::new(vec![
            route("first", 1, 2, 0, 10_000),
            route("second", 1, 2, 0, 10_000),
        ]);
        let hit = snapshot
            .deposit_route(1, 2, "USDT", "0xtokena", "0xrecipient", 1)
            .unwrap();
        assert_eq!(hit.id, "first");
    }

    #[test]
    fn classification_sets_are_case_insensitive() {
        let snapshot = RouteSnapshot::new(vec![route("r1", 1, 2, 0, 10)]);
        assert!(snapshot.is_maker_sender("0xsender"));
        assert!(snapshot.is_maker_sender("0xSENDER"));
        assert!(snapshot.is_maker_recipient("0xrecipient"));
        assert!(!snapshot.is_maker_sender("0xrecipient"));
    }

    #[test]
    fn pinned_snapshots_survive_a_refresh() {
        let index = MarketIndex::new(vec![route("r1", 1, 2, 0, 10)]);
        let pinned = index.snapshot();

        index.replace(vec![route("r2", 3, 4, 0, 10)]);

        assert_eq!(pinned.routes()[0].id, "r1");
        assert_eq!(index.snapshot().routes()[0].id, "r2");
    }

    #[test]
    fn reply_lookup_matches_on_destination_fields() {
        let snapshot = RouteSnapshot::new(vec![route("r1", 1, 2, 0, 10_000)]);
        assert!(snapshot
            .reply_route(2, "0xsender", "USDT", "0xtokenb", 5_000)
            .is_some());
        assert!(snapshot
            .reply_route(2, "0xsender", "USDT", "0xtokena", 5_000)
            .is_none());
        assert!(snapshot
            .reply_route(1, "0xsender", "USDT", "0xtokenb", 5_000)
            .is_none());
    }
}
