//! Message production while this node holds leadership.
//!
//! Leadership is never given up voluntarily: [`Leader::run`] only returns on
//! a store failure, and that failure is meant to end the process. A leader
//! that cannot write must not quietly stop while followers still defer to it.

use std::convert::Infallible;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tracing::{debug, info};

use crate::config::{NodeConfig, Transport};
use crate::identity::random_payload;
use crate::store::Store;

pub struct Leader<R> {
    transport: Transport,
    queue: String,
    channel: String,
    heartbeat: Duration,
    max_payload_len: usize,
    rng: R,
}

impl<R: Rng> Leader<R> {
    pub fn new(config: &NodeConfig, rng: R) -> Self {
        Self {
            transport: config.transport,
            queue: config.keys.queue.clone(),
            channel: config.keys.channel.clone(),
            heartbeat: config.heartbeat,
            max_payload_len: config.max_payload_len,
            rng,
        }
    }

    /// Produces and sends one message, returning its payload.
    pub fn step<S: Store + ?Sized>(&mut self, store: &mut S) -> Result<String> {
        let payload = random_payload(&mut self.rng, self.max_payload_len);
        match self.transport {
            Transport::Polling => {
                let len = store
                    .push_tail(&self.queue, &payload)
                    .with_context(|| format!("leader failed to append to {}", self.queue))?;
                debug!(queue_len = len, "appended");
            }
            Transport::Broadcast => {
                let receivers = store
                    .publish(&self.channel, &payload)
                    .with_context(|| format!("leader failed to publish on {}", self.channel))?;
                debug!(receivers, "published");
            }
        }
        info!(%payload, "send");
        Ok(payload)
    }

    /// Sends one message per heartbeat until a write fails.
    pub fn run<S: Store + ?Sized>(&mut self, store: &mut S) -> Result<Infallible> {
        info!(transport = ?self.transport, "I am leader");
        loop {
            self.step(store)?;
            thread::sleep(self.heartbeat);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Subscription};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn leader(transport: Transport) -> Leader<StdRng> {
        let mut config = NodeConfig::with_heartbeat(Duration::from_millis(5));
        config.transport = transport;
        Leader::new(&config, StdRng::seed_from_u64(42))
    }

    #[test]
    fn polling_leader_appends_to_queue() -> Result<()> {
        let mut store = MemoryStore::new();
        let mut leader = leader(Transport::Polling);
        let first = leader.step(&mut store)?;
        let second = leader.step(&mut store)?;
        assert_eq!(store.read_range("messages", 0, -1)?, vec![first, second]);
        Ok(())
    }

    #[test]
    fn broadcast_leader_publishes_without_touching_queue() -> Result<()> {
        let mut store = MemoryStore::new();
        let mut subscription = store.subscribe("messages")?;
        let mut leader = leader(Transport::Broadcast);
        let sent = leader.step(&mut store)?;
        assert_eq!(subscription.recv(Duration::from_millis(50))?, Some(sent));
        assert_eq!(store.length("messages")?, 0);
        Ok(())
    }

    #[test]
    fn seeded_leaders_send_identical_streams() -> Result<()> {
        let mut store = MemoryStore::new();
        let mut a = leader(Transport::Polling);
        let mut b = leader(Transport::Polling);
        for _ in 0..5 {
            assert_eq!(a.step(&mut store)?, b.step(&mut store)?);
        }
        Ok(())
    }
}
