//! Single-owner poll task per chain
//!
//! One task owns one chain's cadence, so a slow cycle delays the next tick
//! instead of overlapping it. Poll failures are logged and the next interval
//! still runs; the shutdown signal stops the task between cycles.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::accumulator::{MerkleAccumulator, RootContract, SpvStore};

/// Run the poll loop for one chain until `shutdown` flips to `true`.
pub async fn run_poller<S, C>(
    accumulator: Arc<MerkleAccumulator<S, C>>,
    chain_id: u32,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    S: SpvStore + 'static,
    C: RootContract + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = accumulator.poll_chain(chain_id).await {
                    error!(chain_id, %err, "poll cycle failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!(chain_id, "poller stopped");
}
