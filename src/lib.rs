//! An in-memory, multi-database key/value store speaking RESP2 and RESP3.
//!
//! The crate implements the command-execution engine and protocol front end
//! of a Valkey/Redis-compatible server:
//!
//! - Strings, lists, hashes, sets, sorted sets, and streams, with per-key
//!   TTLs, lazy and sampled active expiry
//! - MULTI/EXEC transactions with WATCH optimistic concurrency
//! - Pub/Sub over channels and glob patterns
//! - Blocking commands (BLPOP family, blocking XREAD) with fair wake-ups
//! - Per-user ACLs covering commands, keys, and channels
//!
//! Connections are one Tokio task each; the keyspace lives behind a single
//! async mutex, so every command (and every EXEC batch) is observed
//! atomically by other clients.

pub mod acl;
pub mod commands;
pub mod config;
pub mod connection;
pub mod effects;
pub mod pubsub;
pub mod registry;
pub mod resp;
pub mod server;
pub mod session;
pub mod store;
