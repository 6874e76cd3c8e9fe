//! Leader election over a shared candidate list.
//!
//! A round works in three steps:
//!
//! 1. **Register**: push a fresh [`CandidateId`] onto the tail of the
//!    candidate list.
//! 2. **Settle**: sleep so that concurrent candidates can register too.
//! 3. **Decide**: watch the list and read its head. The node whose id is the
//!    head deletes the list and commits; everyone else aborts.
//!
//! The first id pushed wins. Because the winner's commit is conditional on
//! the list being untouched since the watch, at most one node per round sees
//! [`Ballot::Won`], and the list is empty again once it does.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tracing::{debug, info};

use crate::config::NodeConfig;
use crate::identity::CandidateId;
use crate::store::{Store, TxOutcome, Verdict, Write, transaction};

/// Result of one election round from this node's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ballot {
    /// This node was the head and cleared the list.
    Won,
    /// Someone else is head, or the list was already drained.
    Lost { head: Option<String> },
    /// The list changed between watch and commit.
    Conflict,
}

impl Ballot {
    pub fn is_leader(&self) -> bool {
        matches!(self, Ballot::Won)
    }
}

/// Runs election rounds for one node.
pub struct Elector<R> {
    candidates: String,
    settle_window: Duration,
    rng: R,
}

impl<R: Rng> Elector<R> {
    pub fn new(config: &NodeConfig, rng: R) -> Self {
        Self {
            candidates: config.keys.candidates.clone(),
            settle_window: config.settle_window,
            rng,
        }
    }

    /// Full round: register, wait out the settling window, decide.
    pub fn elect<S: Store + ?Sized>(&mut self, store: &mut S) -> Result<Ballot> {
        let id = self.register(store)?;
        thread::sleep(self.settle_window);
        self.decide(store, &id)
    }

    /// Announces candidacy under a fresh id.
    ///
    /// A failed push means the store is unreachable, and a node that cannot
    /// coordinate cannot continue, so the error is meant to end the process.
    pub fn register<S: Store + ?Sized>(&mut self, store: &mut S) -> Result<CandidateId> {
        let id = CandidateId::generate(&mut self.rng);
        info!(%id, "announcing candidacy");
        store
            .push_tail(&self.candidates, id.as_str())
            .context("failed to announce candidacy")?;
        Ok(id)
    }

    /// Decides the round for `id` inside a watch on the candidate list.
    pub fn decide<S: Store + ?Sized>(&self, store: &mut S, id: &CandidateId) -> Result<Ballot> {
        let candidates = self.candidates.as_str();
        let outcome = transaction(store, candidates, |store| {
            let count = store.length(candidates)?;
            let head = store.index_at(candidates, 0)?;
            info!(count, head = head.as_deref().unwrap_or("<none>"), "candidate list");

            match head {
                Some(head) if id.as_str() == head => {
                    Ok(Verdict::Commit(vec![Write::delete(candidates)], Some(head)))
                }
                head => Ok(Verdict::Abort(head)),
            }
        })?;

        let ballot = match outcome {
            TxOutcome::Committed(_) => Ballot::Won,
            TxOutcome::Aborted(head) => Ballot::Lost { head },
            TxOutcome::Conflict => Ballot::Conflict,
        };
        debug!(%id, ?ballot, "election decided");
        Ok(ballot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn elector(seed: u64) -> Elector<StdRng> {
        let config = NodeConfig::with_heartbeat(Duration::from_millis(5));
        Elector::new(&config, StdRng::seed_from_u64(seed))
    }

    #[test]
    fn lone_candidate_wins_and_clears_list() -> Result<()> {
        let mut store = MemoryStore::new();
        let ballot = elector(1).elect(&mut store)?;
        assert_eq!(ballot, Ballot::Won);
        assert_eq!(store.length("leader")?, 0);
        Ok(())
    }

    #[test]
    fn second_candidate_loses_to_head() -> Result<()> {
        let mut store = MemoryStore::new();
        let mut first = elector(1);
        let mut second = elector(2);

        let first_id = first.register(&mut store)?;
        let second_id = second.register(&mut store)?;

        assert_eq!(
            second.decide(&mut store, &second_id)?,
            Ballot::Lost {
                head: Some(first_id.to_string())
            }
        );
        assert_eq!(first.decide(&mut store, &first_id)?, Ballot::Won);
        assert_eq!(store.length("leader")?, 0);
        Ok(())
    }

    #[test]
    fn drained_list_means_not_leader() -> Result<()> {
        let mut store = MemoryStore::new();
        let mut candidate = elector(3);
        let id = candidate.register(&mut store)?;
        store.delete("leader")?;
        assert_eq!(
            candidate.decide(&mut store, &id)?,
            Ballot::Lost { head: None }
        );
        Ok(())
    }

    #[test]
    fn failed_registration_is_an_error() {
        struct Unreachable;
        impl crate::store::Subscription for Unreachable {
            fn recv(&mut self, _: Duration) -> Result<Option<String>> {
                anyhow::bail!("unreachable")
            }
        }
        impl Store for Unreachable {
            type Subscription = Unreachable;
            fn ping(&mut self) -> Result<()> {
                anyhow::bail!("unreachable")
            }
            fn push_tail(&mut self, _: &str, _: &str) -> Result<usize> {
                anyhow::bail!("unreachable")
            }
            fn pop_head_blocking(&mut self, _: &str, _: Duration) -> Result<Option<String>> {
                anyhow::bail!("unreachable")
            }
            fn read_range(&mut self, _: &str, _: isize, _: isize) -> Result<Vec<String>> {
                anyhow::bail!("unreachable")
            }
            fn length(&mut self, _: &str) -> Result<usize> {
                anyhow::bail!("unreachable")
            }
            fn index_at(&mut self, _: &str, _: isize) -> Result<Option<String>> {
                anyhow::bail!("unreachable")
            }
            fn delete(&mut self, _: &str) -> Result<()> {
                anyhow::bail!("unreachable")
            }
            fn remove_one(&mut self, _: &str, _: &str) -> Result<usize> {
                anyhow::bail!("unreachable")
            }
            fn watch(&mut self, _: &str) -> Result<()> {
                anyhow::bail!("unreachable")
            }
            fn unwatch(&mut self) -> Result<()> {
                anyhow::bail!("unreachable")
            }
            fn exec(&mut self, _: &[Write]) -> Result<bool> {
                anyhow::bail!("unreachable")
            }
            fn publish(&mut self, _: &str, _: &str) -> Result<usize> {
                anyhow::bail!("unreachable")
            }
            fn subscribe(&mut self, _: &str) -> Result<Unreachable> {
                anyhow::bail!("unreachable")
            }
        }

        let err = elector(4)
            .register(&mut Unreachable)
            .expect_err("push to an unreachable store must fail");
        assert!(err.to_string().contains("announce candidacy"));
    }
}
