//! Node configuration.
//!
//! Every component receives the key names and timings it needs from here
//! rather than hard-coding them, so several independent clusters can share
//! one store under different key spaces.

use std::time::Duration;

use anyhow::{Result, ensure};

/// Base interval between leader messages.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(500);

/// Probability that a fresh broadcast payload is treated as corrupted.
pub const DEFAULT_CORRUPTION_RATE: f64 = 0.05;

/// Exclusive upper bound on synthesized payload length.
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 80;

/// Names of the shared structures in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    /// List of candidate ids for the current election round.
    pub candidates: String,
    /// Replication queue (polling transport) or dedup ledger (broadcast transport).
    pub queue: String,
    /// Payloads flagged as corrupted, drained by `--get-errors`.
    pub errors: String,
    /// Pub/sub channel used by the broadcast transport.
    pub channel: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self {
            candidates: "leader".to_string(),
            queue: "messages".to_string(),
            errors: "errors".to_string(),
            channel: "messages".to_string(),
        }
    }
}

/// How the leader hands messages to followers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// Leader appends to the queue, followers consume with a blocking pop.
    Polling,
    /// Leader publishes on the channel, followers dedup against the queue.
    #[default]
    Broadcast,
}

/// Everything a node needs to take part in elections and replication.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub keys: KeySpace,
    pub transport: Transport,
    /// Leader sleeps this long between messages.
    pub heartbeat: Duration,
    /// How long a candidate waits for peers to register before deciding.
    pub settle_window: Duration,
    /// Silence from the leader for this long triggers a new election.
    pub receive_timeout: Duration,
    pub corruption_rate: f64,
    pub max_payload_len: usize,
}

impl NodeConfig {
    /// Builds a config whose derived windows are multiples of `heartbeat`.
    ///
    /// The settling window and the receive timeout are both two heartbeats:
    /// long enough for concurrent candidates to land, short enough that a
    /// dead leader is replaced within a couple of missed messages.
    pub fn with_heartbeat(heartbeat: Duration) -> Self {
        Self {
            keys: KeySpace::default(),
            transport: Transport::default(),
            heartbeat,
            settle_window: heartbeat * 2,
            receive_timeout: heartbeat * 2,
            corruption_rate: DEFAULT_CORRUPTION_RATE,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.heartbeat.is_zero(), "heartbeat must be non-zero");
        ensure!(!self.settle_window.is_zero(), "settle window must be non-zero");
        ensure!(
            !self.receive_timeout.is_zero(),
            "receive timeout must be non-zero"
        );
        ensure!(
            (0.0..=1.0).contains(&self.corruption_rate),
            "corruption rate {} is outside [0, 1]",
            self.corruption_rate
        );
        ensure!(
            self.max_payload_len > 1,
            "max payload length must leave room for at least one character"
        );
        for (name, key) in [
            ("candidates", &self.keys.candidates),
            ("queue", &self.keys.queue),
            ("errors", &self.keys.errors),
            ("channel", &self.keys.channel),
        ] {
            ensure!(!key.is_empty(), "{name} key must not be empty");
        }
        // The channel lives in the pub/sub namespace and may share the queue's name.
        let lists = [
            ("candidates", &self.keys.candidates),
            ("queue", &self.keys.queue),
            ("errors", &self.keys.errors),
        ];
        for (i, (name, key)) in lists.iter().enumerate() {
            for (other, other_key) in &lists[i + 1..] {
                ensure!(key != other_key, "{name} and {other} keys must differ, both are {key:?}");
            }
        }
        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::with_heartbeat(DEFAULT_HEARTBEAT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_windows_are_two_heartbeats() {
        let config = NodeConfig::default();
        assert_eq!(config.heartbeat, Duration::from_millis(500));
        assert_eq!(config.settle_window, Duration::from_secs(1));
        assert_eq!(config.receive_timeout, Duration::from_secs(1));
        assert_eq!(config.transport, Transport::Broadcast);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_keys_share_queue_and_channel_name() {
        let keys = KeySpace::default();
        assert_eq!(keys.candidates, "leader");
        assert_eq!(keys.queue, "messages");
        assert_eq!(keys.channel, "messages");
        assert_eq!(keys.errors, "errors");
    }

    #[test]
    fn rejects_invalid_settings() {
        let mut config = NodeConfig::default();
        config.corruption_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.heartbeat = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.keys.errors.clear();
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.max_payload_len = 1;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.keys.errors = config.keys.queue.clone();
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.keys.candidates = config.keys.queue.clone();
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.keys.errors = config.keys.candidates.clone();
        assert!(config.validate().is_err());
    }
}
