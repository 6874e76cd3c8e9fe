//! Store backed by a Redis server.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use redis::{Client, Commands, Connection, Msg};
use tracing::debug;

use super::{Store, Subscription, Write};

/// One synchronous Redis connection plus the client used to open
/// dedicated subscriber connections.
pub struct RedisStore {
    client: Client,
    conn: Connection,
}

impl RedisStore {
    /// Opens a connection and verifies it with a PING.
    pub fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).with_context(|| format!("invalid redis url {url}"))?;
        let conn = client
            .get_connection()
            .with_context(|| format!("failed to connect to {url}"))?;
        let mut store = Self { client, conn };
        store.ping()?;
        Ok(store)
    }
}

impl Store for RedisStore {
    type Subscription = RedisSubscription;

    fn ping(&mut self) -> Result<()> {
        redis::cmd("PING")
            .query::<String>(&mut self.conn)
            .context("PING failed")?;
        Ok(())
    }

    fn push_tail(&mut self, key: &str, value: &str) -> Result<usize> {
        self.conn
            .rpush(key, value)
            .with_context(|| format!("RPUSH {key} failed"))
    }

    fn pop_head_blocking(&mut self, key: &str, timeout: Duration) -> Result<Option<String>> {
        // BLPOP replies with [key, value], or nil once the timeout elapses.
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(key)
            .arg(timeout.as_secs_f64())
            .query(&mut self.conn)
            .with_context(|| format!("BLPOP {key} failed"))?;
        Ok(popped.map(|(_, value)| value))
    }

    fn read_range(&mut self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        self.conn
            .lrange(key, start, stop)
            .with_context(|| format!("LRANGE {key} failed"))
    }

    fn length(&mut self, key: &str) -> Result<usize> {
        self.conn
            .llen(key)
            .with_context(|| format!("LLEN {key} failed"))
    }

    fn index_at(&mut self, key: &str, index: isize) -> Result<Option<String>> {
        self.conn
            .lindex(key, index)
            .with_context(|| format!("LINDEX {key} failed"))
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let _: usize = self
            .conn
            .del(key)
            .with_context(|| format!("DEL {key} failed"))?;
        Ok(())
    }

    fn remove_one(&mut self, key: &str, value: &str) -> Result<usize> {
        self.conn
            .lrem(key, 1, value)
            .with_context(|| format!("LREM {key} failed"))
    }

    fn watch(&mut self, key: &str) -> Result<()> {
        redis::cmd("WATCH")
            .arg(key)
            .query::<()>(&mut self.conn)
            .with_context(|| format!("WATCH {key} failed"))
    }

    fn unwatch(&mut self) -> Result<()> {
        redis::cmd("UNWATCH")
            .query::<()>(&mut self.conn)
            .context("UNWATCH failed")
    }

    fn exec(&mut self, writes: &[Write]) -> Result<bool> {
        if writes.is_empty() {
            self.unwatch()?;
            return Ok(true);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for write in writes {
            match write {
                Write::PushTail { key, value } => pipe.rpush(key, value).ignore(),
                Write::Delete { key } => pipe.del(key).ignore(),
            };
        }
        // EXEC answers nil when a watched key was modified.
        let reply: Option<()> = pipe.query(&mut self.conn).context("EXEC failed")?;
        Ok(reply.is_some())
    }

    fn publish(&mut self, channel: &str, value: &str) -> Result<usize> {
        self.conn
            .publish(channel, value)
            .with_context(|| format!("PUBLISH {channel} failed"))
    }

    fn subscribe(&mut self, channel: &str) -> Result<RedisSubscription> {
        let mut conn = self
            .client
            .get_connection()
            .context("failed to open subscriber connection")?;
        let subscribe = redis::cmd("SUBSCRIBE").arg(channel).get_packed_command();
        conn.send_packed_command(&subscribe)
            .with_context(|| format!("SUBSCRIBE {channel} failed"))?;
        Ok(RedisSubscription { conn })
    }
}

/// A connection dedicated to one SUBSCRIBE. Dropping it closes the socket,
/// which unsubscribes on the server side.
pub struct RedisSubscription {
    conn: Connection,
}

impl Subscription for RedisSubscription {
    fn recv(&mut self, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.conn
                .set_read_timeout(Some(remaining))
                .context("failed to set subscriber read timeout")?;

            let value = match self.conn.recv_response() {
                Ok(value) => value,
                Err(err) if err.is_timeout() => return Ok(None),
                Err(err) => return Err(err).context("subscriber connection failed"),
            };

            // Subscribe confirmations are not messages; keep waiting.
            match Msg::from_value(&value) {
                Some(msg) => {
                    let payload: String =
                        msg.get_payload().context("non-utf8 payload on channel")?;
                    return Ok(Some(payload));
                }
                None => debug!(?value, "subscription control reply"),
            }
        }
    }
}
