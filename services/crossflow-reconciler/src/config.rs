//! Worker configuration
//!
//! Command-line arguments (with environment fallbacks) plus two optional
//! JSON files: the maker route table and per-chain profile overrides.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;

use crossflow_db::DatabaseConfig;
use crossflow_markets::Route;
use crossflow_types::{ChainProfile, ChainRegistry};

/// Crossflow reconciliation worker
#[derive(Parser, Debug)]
#[command(
    name = "crossflow-reconciler",
    about = "Pairs cross-chain deposits with maker replies and anchors unpaid transfers",
    version
)]
pub struct Args {
    /// Host to bind the query API to
    #[arg(long, default_value = "127.0.0.1", env = "CROSSFLOW_HOST")]
    pub host: String,

    /// Port for the query API
    #[arg(short, long, default_value = "8090", env = "CROSSFLOW_PORT")]
    pub port: u16,

    /// Maker route table (JSON array of routes)
    #[arg(long, env = "CROSSFLOW_ROUTES")]
    pub routes: PathBuf,

    /// Per-chain profile overrides (JSON array), on top of the defaults
    #[arg(long, env = "CROSSFLOW_CHAINS")]
    pub chains: Option<PathBuf>,

    /// This worker's shard: chains with id % instance_count == instance_id
    #[arg(long, default_value = "0", env = "CROSSFLOW_INSTANCE_ID")]
    pub instance_id: u32,

    /// Total worker instances sharing the chain set
    #[arg(long, default_value = "1", env = "CROSSFLOW_INSTANCE_COUNT")]
    pub instance_count: u32,

    /// Concurrent batch workers
    #[arg(long, default_value = "4", env = "CROSSFLOW_WORKERS")]
    pub workers: usize,

    /// Bounded inbound batch queue depth
    #[arg(long, default_value = "64", env = "CROSSFLOW_QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    /// Route file refresh interval in seconds
    #[arg(long, default_value = "60", env = "CROSSFLOW_ROUTE_REFRESH_SECS")]
    pub route_refresh_secs: u64,
}

/// Fully resolved worker configuration
pub struct ReconcilerConfig {
    pub args: Args,
    pub database: DatabaseConfig,
    pub chains: ChainRegistry,
}

impl ReconcilerConfig {
    pub fn load(args: Args) -> anyhow::Result<Self> {
        let mut chains = ChainRegistry::with_defaults();
        if let Some(path) = &args.chains {
            for profile in load_profiles(path)? {
                chains.insert(profile);
            }
        }
        if args.instance_count == 0 {
            anyhow::bail!("instance_count must be at least 1");
        }
        if args.instance_id >= args.instance_count {
            anyhow::bail!(
                "instance_id {} is outside 0..{}",
                args.instance_id,
                args.instance_count
            );
        }
        Ok(Self {
            args,
            database: DatabaseConfig::default(),
            chains,
        })
    }

    /// Chains this instance owns, by the shard rule
    pub fn watched_chains(&self) -> Vec<u32> {
        let mut chains: Vec<u32> = self
            .chains
            .chain_ids()
            .filter(|id| id % self.args.instance_count == self.args.instance_id)
            .collect();
        chains.sort_unstable();
        chains
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.args.host, self.args.port)
    }
}

/// Read the maker route table
pub fn load_routes(path: &Path) -> anyhow::Result<Vec<Route>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading route file {}", path.display()))?;
    let routes: Vec<Route> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing route file {}", path.display()))?;
    Ok(routes)
}

fn load_profiles(path: &Path) -> anyhow::Result<Vec<ChainProfile>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading chain file {}", path.display()))?;
    let profiles: Vec<ChainProfile> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing chain file {}", path.display()))?;
    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(instance_id: u32, instance_count: u32) -> Args {
        Args {
            host: "127.0.0.1".into(),
            port: 8090,
            routes: PathBuf::from("routes.json"),
            chains: None,
            instance_id,
            instance_count,
            workers: 4,
            queue_capacity: 64,
            route_refresh_secs: 60,
        }
    }

    #[test]
    fn sharding_partitions_the_chain_set() {
        let even = ReconcilerConfig::load(args(0, 2)).unwrap();
        let odd = ReconcilerConfig::load(args(1, 2)).unwrap();

        let evens = even.watched_chains();
        let odds = odd.watched_chains();
        assert!(evens.iter().all(|id| id % 2 == 0));
        assert!(odds.iter().all(|id| id % 2 == 1));

        let mut all: Vec<u32> = evens.into_iter().chain(odds).collect();
        all.sort_unstable();
        let mut expected: Vec<u32> = ChainRegistry::with_defaults().chain_ids().collect();
        expected.sort_unstable();
        assert_eq!(all, expected);
    }

    #[test]
    fn out_of_range_instance_id_is_rejected() {
        assert!(ReconcilerConfig::load(args(2, 2)).is_err());
        assert!(ReconcilerConfig::load(args(0, 0)).is_err());
    }
}
