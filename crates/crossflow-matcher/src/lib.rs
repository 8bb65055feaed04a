//! Crossflow Matcher - the deposit/reply matching engine
//!
//! Consumes normalized transfer records, classifies each as a user deposit
//! or maker reply against the route table, computes the expected settlement
//! amount through the codec, finds the counterpart transaction and drives
//! both sides' status machine — exactly once per transfer, under
//! at-least-once delivery.
//!
//! The engine owns the decisions; a [`MatchStore`] executes each settle as
//! one atomic unit (two status writes plus the pairing upsert) and
//! serializes operations that touch the same pairing. [`InMemoryStore`] is
//! the reference implementation used by the test suites; the PostgreSQL
//! implementation lives in `crossflow-db`.

mod engine;
mod memory;
mod store;

pub use engine::{Classification, EngineOutcome, MatchingEngine};
pub use memory::InMemoryStore;
pub use store::{DepositPlan, MatchStore, ReplyPlan, SettleOutcome};
