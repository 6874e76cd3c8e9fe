//! In-process store shared by every node handle in a test cluster.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use super::{Store, Subscription, Write};

#[derive(Default)]
struct State {
    lists: HashMap<String, VecDeque<String>>,
    /// Bumped on every mutation of a key, including deletion.
    versions: HashMap<String, u64>,
    channels: HashMap<String, Vec<Sender<String>>>,
}

impl State {
    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn touch(&mut self, key: &str) {
        *self.versions.entry(key.to_string()).or_default() += 1;
    }

    fn push_tail(&mut self, key: &str, value: &str) -> usize {
        let list = self.lists.entry(key.to_string()).or_default();
        list.push_back(value.to_string());
        let len = list.len();
        self.touch(key);
        len
    }

    fn pop_head(&mut self, key: &str) -> Option<String> {
        let list = self.lists.get_mut(key)?;
        let value = list.pop_front();
        if list.is_empty() {
            self.lists.remove(key);
        }
        if value.is_some() {
            self.touch(key);
        }
        value
    }

    fn delete(&mut self, key: &str) {
        if self.lists.remove(key).is_some() {
            self.touch(key);
        }
    }

    fn remove_one(&mut self, key: &str, value: &str) -> usize {
        let Some(list) = self.lists.get_mut(key) else {
            return 0;
        };
        let Some(pos) = list.iter().position(|item| item == value) else {
            return 0;
        };
        list.remove(pos);
        if list.is_empty() {
            self.lists.remove(key);
        }
        self.touch(key);
        1
    }

    fn list(&self, key: &str) -> Option<&VecDeque<String>> {
        self.lists.get(key)
    }
}

struct Shared {
    state: Mutex<State>,
    pushed: Condvar,
}

/// A linearizable list store living in this process.
///
/// Every operation takes one mutex, so each call is atomic with respect to
/// every other handle. [`MemoryStore::connect`] hands out another client
/// with independent watch state over the same data.
pub struct MemoryStore {
    shared: Arc<Shared>,
    watched: Vec<(String, u64)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                pushed: Condvar::new(),
            }),
            watched: Vec::new(),
        }
    }

    /// Opens another client on the same data.
    pub fn connect(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            watched: Vec::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves a possibly negative index against `len`.
fn resolve_index(len: usize, index: isize) -> Option<usize> {
    let resolved = if index < 0 {
        len as isize + index
    } else {
        index
    };
    (0..len as isize)
        .contains(&resolved)
        .then_some(resolved as usize)
}

impl Store for MemoryStore {
    type Subscription = MemorySubscription;

    fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    fn push_tail(&mut self, key: &str, value: &str) -> Result<usize> {
        let len = self.state().push_tail(key, value);
        self.shared.pushed.notify_all();
        Ok(len)
    }

    fn pop_head_blocking(&mut self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state();
        loop {
            if let Some(value) = state.pop_head(key) {
                return Ok(Some(value));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = self
                .shared
                .pushed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    fn read_range(&mut self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let state = self.state();
        let Some(list) = state.list(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as isize;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    fn length(&mut self, key: &str) -> Result<usize> {
        Ok(self.state().list(key).map_or(0, VecDeque::len))
    }

    fn index_at(&mut self, key: &str, index: isize) -> Result<Option<String>> {
        let state = self.state();
        Ok(state.list(key).and_then(|list| {
            resolve_index(list.len(), index).and_then(|i| list.get(i).cloned())
        }))
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.state().delete(key);
        Ok(())
    }

    fn remove_one(&mut self, key: &str, value: &str) -> Result<usize> {
        Ok(self.state().remove_one(key, value))
    }

    fn watch(&mut self, key: &str) -> Result<()> {
        let version = self.state().version(key);
        self.watched.push((key.to_string(), version));
        Ok(())
    }

    fn unwatch(&mut self) -> Result<()> {
        self.watched.clear();
        Ok(())
    }

    fn exec(&mut self, writes: &[Write]) -> Result<bool> {
        let watched = std::mem::take(&mut self.watched);
        let mut state = self.state();
        if watched
            .iter()
            .any(|(key, version)| state.version(key) != *version)
        {
            return Ok(false);
        }

        let mut pushed = false;
        for write in writes {
            match write {
                Write::PushTail { key, value } => {
                    state.push_tail(key, value);
                    pushed = true;
                }
                Write::Delete { key } => state.delete(key),
            }
        }
        drop(state);

        if pushed {
            self.shared.pushed.notify_all();
        }
        Ok(true)
    }

    fn publish(&mut self, channel: &str, value: &str) -> Result<usize> {
        let mut state = self.state();
        let Some(subscribers) = state.channels.get_mut(channel) else {
            return Ok(0);
        };
        subscribers.retain(|tx| tx.send(value.to_string()).is_ok());
        Ok(subscribers.len())
    }

    fn subscribe(&mut self, channel: &str) -> Result<MemorySubscription> {
        let (tx, rx) = unbounded();
        self.state()
            .channels
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(MemorySubscription { rx })
    }
}

/// Receiving end of a [`MemoryStore`] channel. Dropping it unsubscribes.
pub struct MemorySubscription {
    rx: Receiver<String>,
}

impl Subscription for MemorySubscription {
    fn recv(&mut self, timeout: Duration) -> Result<Option<String>> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Ok(Some(value)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => bail!("memory store was dropped"),
        }
    }
}
