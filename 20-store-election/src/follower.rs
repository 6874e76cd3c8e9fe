//! Message consumption while another node leads.
//!
//! Two transports share one contract: keep receiving until the leader goes
//! quiet for a full receive timeout, then hand control back so the node can
//! stand for election.
//!
//! - **Polling**: blocking pop on the queue. The pop both receives and
//!   consumes, so no separate dedup step is needed.
//! - **Broadcast**: payloads arrive on a pub/sub channel and the queue acts
//!   as a dedup ledger, updated inside a watch transaction
//!   (see [`register_payload`]).

use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{NodeConfig, Transport};
use crate::store::{Store, Subscription, TxOutcome, Verdict, Write, transaction};

/// Outcome of a single receive attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// New payload, now recorded as seen (broadcast) or consumed (polling).
    Delivered(String),
    /// Payload was already in the ledger; its marker was consumed and nothing shown.
    Duplicate(String),
    /// Simulated corruption: payload went to the error log, not the ledger.
    Corrupted(String),
    /// Another node changed the ledger mid-transaction; treated as not ours.
    Conflict(String),
    /// Nothing arrived within the receive timeout.
    Timeout,
}

/// Counters accumulated over one [`Follower::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FollowReport {
    pub delivered: usize,
    pub duplicates: usize,
    pub corrupted: usize,
    pub conflicts: usize,
}

impl FollowReport {
    fn record(&mut self, delivery: &Delivery) {
        match delivery {
            Delivery::Delivered(_) => self.delivered += 1,
            Delivery::Duplicate(_) => self.duplicates += 1,
            Delivery::Corrupted(_) => self.corrupted += 1,
            Delivery::Conflict(_) => self.conflicts += 1,
            Delivery::Timeout => {}
        }
    }
}

enum Source<Sub> {
    Queue,
    Channel(Sub),
}

/// Receives from the current leader until it falls silent.
pub struct Follower<Sub, R> {
    source: Source<Sub>,
    queue: String,
    errors: String,
    receive_timeout: Duration,
    corruption_rate: f64,
    rng: R,
}

impl<Sub: Subscription, R: Rng> Follower<Sub, R> {
    /// Prepares to follow. The broadcast transport subscribes here, so
    /// payloads published from now on are buffered for [`Follower::step`].
    pub fn attach<S>(store: &mut S, config: &NodeConfig, rng: R) -> Result<Self>
    where
        S: Store<Subscription = Sub> + ?Sized,
    {
        let source = match config.transport {
            Transport::Polling => Source::Queue,
            Transport::Broadcast => {
                let subscription = store.subscribe(&config.keys.channel)?;
                info!(channel = %config.keys.channel, "subscribed");
                Source::Channel(subscription)
            }
        };
        Ok(Self {
            source,
            queue: config.keys.queue.clone(),
            errors: config.keys.errors.clone(),
            receive_timeout: config.receive_timeout,
            corruption_rate: config.corruption_rate,
            rng,
        })
    }

    /// Waits for one payload and processes it.
    pub fn step<S: Store + ?Sized>(&mut self, store: &mut S) -> Result<Delivery> {
        let delivery = match &mut self.source {
            Source::Queue => match store.pop_head_blocking(&self.queue, self.receive_timeout)? {
                Some(payload) => Delivery::Delivered(payload),
                None => Delivery::Timeout,
            },
            Source::Channel(subscription) => match subscription.recv(self.receive_timeout)? {
                Some(payload) => register_payload(
                    store,
                    &self.queue,
                    &self.errors,
                    payload,
                    self.corruption_rate,
                    &mut self.rng,
                )?,
                None => Delivery::Timeout,
            },
        };

        match &delivery {
            Delivery::Delivered(payload) => info!(%payload, "received"),
            Delivery::Duplicate(payload) => debug!(%payload, "duplicate ignored"),
            Delivery::Corrupted(payload) => {
                warn!(%payload, "corrupted message (simulated), recorded in error log")
            }
            Delivery::Conflict(payload) => debug!(%payload, "ledger changed concurrently"),
            Delivery::Timeout => {}
        }
        Ok(delivery)
    }

    /// Steps until the leader has been silent for a full receive timeout.
    pub fn run<S: Store + ?Sized>(&mut self, store: &mut S) -> Result<FollowReport> {
        info!("I am follower");
        let mut report = FollowReport::default();
        loop {
            let delivery = self.step(store)?;
            if delivery == Delivery::Timeout {
                info!(timeout = ?self.receive_timeout, ?report, "no leader traffic");
                return Ok(report);
            }
            report.record(&delivery);
        }
    }
}

/// Dedup-and-requeue for one broadcast payload, under a watch on `queue`.
///
/// - Payload found in the ledger: one occurrence is removed and the payload
///   is a duplicate.
/// - Otherwise, with probability `corruption_rate`, the payload is appended
///   to `errors` and the transaction aborted, so it is not marked seen.
/// - Otherwise the payload is appended to the ledger and committed.
pub fn register_payload<S, R>(
    store: &mut S,
    queue: &str,
    errors: &str,
    payload: String,
    corruption_rate: f64,
    rng: &mut R,
) -> Result<Delivery>
where
    S: Store + ?Sized,
    R: Rng + ?Sized,
{
    let outcome = transaction(store, queue, |store| {
        if store.remove_one(queue, &payload)? > 0 {
            return Ok(Verdict::Abort(Delivery::Duplicate(payload.clone())));
        }
        if rng.gen_bool(corruption_rate) {
            store.push_tail(errors, &payload)?;
            return Ok(Verdict::Abort(Delivery::Corrupted(payload.clone())));
        }
        Ok(Verdict::Commit(
            vec![Write::push_tail(queue, payload.as_str())],
            Delivery::Delivered(payload.clone()),
        ))
    })?;

    Ok(match outcome {
        TxOutcome::Committed(delivery) | TxOutcome::Aborted(delivery) => delivery,
        TxOutcome::Conflict => Delivery::Conflict(payload),
    })
}
