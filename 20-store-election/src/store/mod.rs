//! The shared store every node coordinates through.
//!
//! Nodes never talk to each other directly. All decisions (who leads, which
//! payloads were already seen) rest on the store's atomic list operations
//! and on its optimistic transaction: watch a key, read, then commit a batch
//! of writes that is rejected if anyone touched the watched key meanwhile.
//!
//! Two implementations are provided:
//!
//! - [`MemoryStore`]: in-process and linearizable, shared between threads.
//!   Tests use it to simulate a cluster.
//! - [`RedisStore`]: a Redis server, for running real nodes as processes.

use std::time::Duration;

use anyhow::Result;
use tracing::debug;

pub mod memory;
pub mod redis;

pub use self::memory::{MemoryStore, MemorySubscription};
pub use self::redis::RedisStore;

/// A write queued inside an optimistic transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    PushTail { key: String, value: String },
    Delete { key: String },
}

impl Write {
    pub fn push_tail(key: impl Into<String>, value: impl Into<String>) -> Self {
        Write::PushTail {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Write::Delete { key: key.into() }
    }
}

/// A live subscription to a broadcast channel.
pub trait Subscription {
    /// Waits up to `timeout` for the next payload. `None` means nothing arrived.
    fn recv(&mut self, timeout: Duration) -> Result<Option<String>>;
}

/// Primitives consumed from the shared store.
///
/// One value corresponds to one client connection: watch state is per value,
/// so every node needs its own handle.
pub trait Store {
    type Subscription: Subscription;

    /// Checks that the store is reachable.
    fn ping(&mut self) -> Result<()>;

    /// Appends `value` to the list at `key`, returning the new length.
    fn push_tail(&mut self, key: &str, value: &str) -> Result<usize>;

    /// Removes and returns the head of `key`, waiting up to `timeout` for one.
    fn pop_head_blocking(&mut self, key: &str, timeout: Duration) -> Result<Option<String>>;

    /// Snapshot of elements `start..=stop`; negative indices count from the tail.
    fn read_range(&mut self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    fn length(&mut self, key: &str) -> Result<usize>;

    /// Element at `index`, negative counting from the tail.
    fn index_at(&mut self, key: &str, index: isize) -> Result<Option<String>>;

    fn delete(&mut self, key: &str) -> Result<()>;

    /// Removes the first occurrence of `value` from `key`; returns 0 or 1.
    fn remove_one(&mut self, key: &str, value: &str) -> Result<usize>;

    /// Starts watching `key` for the next [`Store::exec`].
    fn watch(&mut self, key: &str) -> Result<()>;

    /// Drops the current watch without committing.
    fn unwatch(&mut self) -> Result<()>;

    /// Applies `writes` atomically unless a watched key changed since
    /// [`Store::watch`]. Returns `false` when the commit was rejected.
    /// The watch is released either way.
    fn exec(&mut self, writes: &[Write]) -> Result<bool>;

    /// Fire-and-forget broadcast. Returns the number of receivers.
    fn publish(&mut self, channel: &str, value: &str) -> Result<usize>;

    fn subscribe(&mut self, channel: &str) -> Result<Self::Subscription>;
}

/// What a transaction body decided after reading the watched state.
#[derive(Debug)]
pub enum Verdict<T> {
    Commit(Vec<Write>, T),
    Abort(T),
}

/// How a transaction ended.
#[derive(Debug, PartialEq, Eq)]
pub enum TxOutcome<T> {
    Committed(T),
    /// The body chose not to commit.
    Aborted(T),
    /// The watched key changed before commit: another node won the race.
    Conflict,
}

/// Runs `body` under a watch on `watch_key` and commits what it returns.
///
/// A conflict is reported, not retried; callers defer to their next outer
/// iteration.
pub fn transaction<S, T, F>(store: &mut S, watch_key: &str, body: F) -> Result<TxOutcome<T>>
where
    S: Store + ?Sized,
    F: FnOnce(&mut S) -> Result<Verdict<T>>,
{
    store.watch(watch_key)?;
    let verdict = match body(store) {
        Ok(verdict) => verdict,
        Err(err) => {
            if let Err(unwatch_err) = store.unwatch() {
                debug!(error = %unwatch_err, key = watch_key, "unwatch after failed body");
            }
            return Err(err);
        }
    };

    match verdict {
        Verdict::Abort(value) => {
            store.unwatch()?;
            Ok(TxOutcome::Aborted(value))
        }
        Verdict::Commit(writes, value) => {
            if store.exec(&writes)? {
                Ok(TxOutcome::Committed(value))
            } else {
                Ok(TxOutcome::Conflict)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_applies_writes() -> Result<()> {
        let mut store = MemoryStore::new();
        let outcome = transaction(&mut store, "k", |_| {
            Ok(Verdict::Commit(vec![Write::push_tail("k", "a")], 1))
        })?;
        assert_eq!(outcome, TxOutcome::Committed(1));
        assert_eq!(store.read_range("k", 0, -1)?, vec!["a".to_string()]);
        Ok(())
    }

    #[test]
    fn abort_leaves_store_untouched() -> Result<()> {
        let mut store = MemoryStore::new();
        store.push_tail("k", "a")?;
        let outcome = transaction(&mut store, "k", |_| Ok(Verdict::<()>::Abort(())))?;
        assert_eq!(outcome, TxOutcome::Aborted(()));
        assert_eq!(store.length("k")?, 1);
        Ok(())
    }

    #[test]
    fn concurrent_write_is_reported_as_conflict() -> Result<()> {
        let mut store = MemoryStore::new();
        let mut other = store.connect();
        let outcome = transaction(&mut store, "k", |_| {
            other.push_tail("k", "intruder")?;
            Ok(Verdict::Commit(vec![Write::delete("k")], ()))
        })?;
        assert_eq!(outcome, TxOutcome::Conflict);
        assert_eq!(store.read_range("k", 0, -1)?, vec!["intruder".to_string()]);
        Ok(())
    }

    #[test]
    fn failed_body_releases_watch() -> Result<()> {
        let mut store = MemoryStore::new();
        let outcome = transaction(&mut store, "k", |_| -> Result<Verdict<()>> {
            anyhow::bail!("read failed")
        });
        assert!(outcome.is_err());

        // A stale watch would turn this commit into a conflict.
        store.connect().push_tail("k", "a")?;
        let outcome = transaction(&mut store, "other", |_| {
            Ok(Verdict::Commit(vec![Write::delete("k")], ()))
        })?;
        assert_eq!(outcome, TxOutcome::Committed(()));
        Ok(())
    }
}
