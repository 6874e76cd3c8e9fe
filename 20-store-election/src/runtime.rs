//! The per-node driver: follow, stand for election on silence, lead if won.
//!
//! ```text
//!   ┌────────────┐  timeout   ┌───────────┐   won   ┌────────────┐
//!   │  follow()  │ ─────────► │  elect()  │ ──────► │  lead()    │ (until process exit)
//!   └────────────┘            └───────────┘         └────────────┘
//!         ▲        lost / conflict  │
//!         └─────────────────────────┘
//! ```
//!
//! A node that wins keeps leading until the process dies; there is no
//! demotion path. A follower that times out goes straight into a new
//! election without checking whether a leader already exists, so under a
//! partial partition two leaders can coexist.

use std::convert::Infallible;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::config::NodeConfig;
use crate::election::{Ballot, Elector};
use crate::follower::{FollowReport, Follower};
use crate::leader::Leader;
use crate::store::Store;

/// Role a node ended up in after one [`Node::cycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Leader,
}

/// One coordinating process bound to its own store connection.
pub struct Node<S> {
    store: S,
    config: NodeConfig,
    elector: Elector<StdRng>,
    leader: Leader<StdRng>,
    rng: StdRng,
}

impl<S: Store> Node<S> {
    /// Creates a node seeded from OS entropy.
    pub fn new(store: S, config: NodeConfig) -> Result<Self> {
        Self::with_rng(store, config, StdRng::from_entropy())
    }

    /// Creates a node with a caller-provided random source.
    ///
    /// Clears the candidate list so that stale ids from crashed nodes cannot
    /// win the first round.
    pub fn with_rng(mut store: S, config: NodeConfig, mut rng: StdRng) -> Result<Self> {
        config.validate()?;
        store
            .delete(&config.keys.candidates)
            .context("failed to reset candidate list")?;

        let elector = Elector::new(&config, StdRng::seed_from_u64(rng.gen()));
        let leader = Leader::new(&config, StdRng::seed_from_u64(rng.gen()));
        Ok(Self {
            store,
            config,
            elector,
            leader,
            rng,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Receives from the current leader until it goes quiet.
    pub fn follow(&mut self) -> Result<FollowReport> {
        let mut follower = Follower::attach(&mut self.store, &self.config, &mut self.rng)?;
        follower.run(&mut self.store)
    }

    /// Runs one election round.
    pub fn elect(&mut self) -> Result<Ballot> {
        self.elector.elect(&mut self.store)
    }

    /// Produces messages forever; returns only on a store failure.
    pub fn lead(&mut self) -> Result<Infallible> {
        self.leader.run(&mut self.store)
    }

    /// One `follow -> elect` iteration of the outer loop.
    pub fn cycle(&mut self) -> Result<Role> {
        self.follow()?;
        let ballot = self.elect()?;
        let role = if ballot.is_leader() {
            Role::Leader
        } else {
            Role::Follower
        };
        info!(?ballot, ?role, "election finished");
        Ok(role)
    }

    /// Runs the node until a fatal store error.
    pub fn run(mut self) -> Result<Infallible> {
        loop {
            if self.cycle()? == Role::Leader {
                return self.lead();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Transport;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn config(transport: Transport) -> NodeConfig {
        let mut config = NodeConfig::with_heartbeat(Duration::from_millis(10));
        config.transport = transport;
        config
    }

    #[test]
    fn startup_clears_stale_candidates() -> Result<()> {
        let mut store = MemoryStore::new();
        store.push_tail("leader", "stale-candidate")?;
        let config = config(Transport::Polling);
        let _node = Node::with_rng(store.connect(), config, StdRng::seed_from_u64(1))?;
        assert_eq!(store.length("leader")?, 0);
        Ok(())
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut bad = config(Transport::Polling);
        bad.corruption_rate = -0.1;
        assert!(Node::with_rng(MemoryStore::new(), bad, StdRng::seed_from_u64(1)).is_err());
    }

    #[test]
    fn silent_cluster_elects_lone_node() -> Result<()> {
        for transport in [Transport::Polling, Transport::Broadcast] {
            let mut node =
                Node::with_rng(MemoryStore::new(), config(transport), StdRng::seed_from_u64(2))?;
            assert_eq!(node.cycle()?, Role::Leader);
            assert_eq!(node.store_mut().length("leader")?, 0);
        }
        Ok(())
    }
}
