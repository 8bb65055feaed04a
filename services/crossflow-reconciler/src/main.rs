//! Crossflow reconciliation worker
//!
//! One process owns a shard of chains and runs the whole reconciliation
//! loop for them: batch intake feeding the matching engine through a
//! bounded worker pool, a per-chain SPV poller keeping the pending-transfer
//! trees and their on-chain roots current, a background route-table
//! refresh, and the read-only query API.

mod api;
mod config;
mod contract;
mod ingest;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crossflow_db::Database;
use crossflow_markets::MarketIndex;
use crossflow_matcher::MatchingEngine;
use crossflow_spv::{run_poller, MerkleAccumulator, POLL_INTERVAL};

use crate::api::ApiState;
use crate::config::{Args, ReconcilerConfig};
use crate::contract::InProcessRootRegistry;
use crate::ingest::{IngestQueue, Shard};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ReconcilerConfig::load(args)?;

    let db = Database::connect(&config.database).await?;
    db.migrate().await?;

    let routes = config::load_routes(&config.args.routes)?;
    info!(routes = routes.len(), "route table loaded");
    let markets = Arc::new(MarketIndex::new(routes));

    let engine = Arc::new(MatchingEngine::new(
        db.store(),
        markets.clone(),
        config.chains.clone(),
    ));

    let watched = config.watched_chains();
    info!(?watched, "chains owned by this instance");
    let accumulator = Arc::new(MerkleAccumulator::new(
        db.store(),
        InProcessRootRegistry::default(),
        config.chains.clone(),
        watched,
    ));
    accumulator.rebuild().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // one single-owner poll task per watched chain
    for chain_id in accumulator.watched().to_vec() {
        tokio::spawn(run_poller(
            accumulator.clone(),
            chain_id,
            POLL_INTERVAL,
            shutdown_rx.clone(),
        ));
    }

    // copy-on-refresh route table
    {
        let markets = markets.clone();
        let path = config.args.routes.clone();
        let every = Duration::from_secs(config.args.route_refresh_secs.max(5));
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => match config::load_routes(&path) {
                        Ok(routes) => markets.replace(routes),
                        Err(err) => {
                            warn!(%err, "route refresh failed; keeping the current table");
                        }
                    },
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    let shard = Shard {
        instance_id: config.args.instance_id,
        instance_count: config.args.instance_count,
    };
    let (queue, batch_rx) = IngestQueue::new(config.args.queue_capacity);
    let workers = ingest::spawn_workers(
        engine.clone(),
        batch_rx,
        shard,
        config.args.workers,
        shutdown_rx.clone(),
    );

    let state = Arc::new(ApiState {
        transactions: db.transaction_repo(),
        pairings: db.pairing_repo(),
        accumulator: accumulator.clone(),
        queue: queue.clone(),
    });
    let app = api::router(state);

    let addr = config.bind_addr();
    info!(%addr, instance = config.args.instance_id, "crossflow reconciler listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("termination signal received");
        })
        .await?;

    // stop accepting batches, then let in-flight settles finish
    drop(queue);
    let _ = shutdown_tx.send(true);
    for worker in workers {
        let _ = worker.await;
    }
    info!("shutdown complete");
    Ok(())
}
