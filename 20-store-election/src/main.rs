//! CLI entry point for one coordinating node.
//!
//! # Example usage
//!
//! Start three nodes against a local Redis, in separate terminals:
//! ```bash
//! cargo run --bin store-election
//! cargo run --bin store-election
//! cargo run --bin store-election -- --transport polling --queue-key jobs
//! ```
//!
//! Inspect and clear the simulated corruption log:
//! ```bash
//! cargo run --bin store-election -- --get-errors
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use store_election::config::{KeySpace, NodeConfig, Transport};
use store_election::drain::drain_errors;
use store_election::runtime::Node;
use store_election::store::RedisStore;

/// Command-line arguments for a node.
#[derive(Parser, Debug)]
#[command(author, version, about = "Elect a leader and replicate messages through Redis")]
struct Args {
    /// Redis connection URL
    #[arg(long, default_value = "redis://127.0.0.1:6379/")]
    redis_url: String,

    /// Print and clear the error log, then exit
    #[arg(long)]
    get_errors: bool,

    /// How the leader hands messages to followers
    #[arg(long, value_enum, default_value_t = TransportArg::Broadcast)]
    transport: TransportArg,

    /// Interval between leader messages; election and receive windows are two heartbeats
    #[arg(long, default_value_t = 500)]
    heartbeat_ms: u64,

    /// List holding candidate ids during an election
    #[arg(long, default_value = "leader")]
    candidates_key: String,

    /// Replication queue / dedup ledger
    #[arg(long, default_value = "messages")]
    queue_key: String,

    /// List collecting corrupted payloads
    #[arg(long, default_value = "errors")]
    errors_key: String,

    /// Pub/sub channel for the broadcast transport
    #[arg(long, default_value = "messages")]
    channel: String,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum TransportArg {
    Polling,
    Broadcast,
}

impl From<TransportArg> for Transport {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Polling => Transport::Polling,
            TransportArg::Broadcast => Transport::Broadcast,
        }
    }
}

impl Args {
    fn node_config(&self) -> NodeConfig {
        let mut config = NodeConfig::with_heartbeat(Duration::from_millis(self.heartbeat_ms));
        config.transport = self.transport.into();
        config.keys = KeySpace {
            candidates: self.candidates_key.clone(),
            queue: self.queue_key.clone(),
            errors: self.errors_key.clone(),
            channel: self.channel.clone(),
        };
        config
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = args.node_config();

    info!("starting");
    let mut store = RedisStore::connect(&args.redis_url)
        .with_context(|| format!("store unreachable at {}", args.redis_url))?;
    info!(url = %args.redis_url, "connected");

    if args.get_errors {
        let entries = drain_errors(&mut store, &config.keys.errors)?;
        info!(count = entries.len(), "error log drained");
        for entry in &entries {
            info!("{entry}");
        }
        return Ok(());
    }

    let node = Node::new(store, config)?;
    match node.run()? {}
}
