//! Crossflow Markets - the maker route table
//!
//! A route is a directional, time-bounded trading pair a maker services:
//! deposits of one token on an origin chain are settled with another token
//! on a destination chain, between two maker-controlled addresses, under
//! pool-level fee parameters.
//!
//! The table is read-mostly and refresh-rarely: a refresh builds a complete
//! new [`RouteSnapshot`] and swaps it behind an atomic reference, so readers
//! never observe a partially-updated table. In-flight matching keeps the
//! snapshot it started with; a stale-route race during refresh is accepted.

mod index;
mod route;

pub use index::{MarketIndex, RouteSnapshot};
pub use route::Route;
