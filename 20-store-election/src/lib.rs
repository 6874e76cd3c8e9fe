//! Leader election and message replication through a shared store.
//!
//! A set of symmetric nodes elect exactly one leader per round without ever
//! talking to each other: every decision goes through a transactional
//! key/list store (Redis in production, [`store::MemoryStore`] in tests).
//! The leader emits a stream of messages; followers consume them and fall
//! back to a new election when the stream goes quiet.
//!
//! # Architecture
//!
//! Each node is one process with one thread. Blocking store calls with
//! bounded timeouts are the only waiting primitive, and the store's
//! watch-and-commit transaction is the only compare-and-swap:
//!
//! - **Election**: candidates push random ids onto a list, wait a settling
//!   window, then the head of the list commits a delete of the whole list.
//!   First pushed wins.
//! - **Replication**: either a queue drained by blocking pops, or a pub/sub
//!   channel plus a dedup ledger updated transactionally. A small fraction of
//!   broadcast payloads is routed to an error log to simulate corruption.
//!
//! # Modules
//!
//! - [`config`]: key names, transport and timings
//! - [`identity`]: candidate ids and payload synthesis
//! - [`store`]: the `Store` trait, transaction helper, memory and Redis backends
//! - [`election`]: candidacy registration and winner determination
//! - [`leader`]: message production
//! - [`follower`]: message consumption, dedup and corruption simulation
//! - [`drain`]: reading out and clearing the error log
//! - [`runtime`]: the outer follow/elect/lead loop

pub mod config;
pub mod drain;
pub mod election;
pub mod follower;
pub mod identity;
pub mod leader;
pub mod runtime;
pub mod store;
