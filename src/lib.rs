//! Notification and task-dispatch server.
//!
//! This crate consists of three main components:
//!
//! 1. **Executor ([`executor`] module)**: submits, runs, cancels and tracks
//!    task instances, enforcing the singleton-per-command policy and
//!    persisting snapshots between runs.
//! 2. **Router ([`router`] module)**: hands outgoing notifications to the
//!    notifier they're addressed to, decoupling task execution from
//!    Telegram transport.
//! 3. **Notifier ([`notifier`] module)**: one per configured chat — long-polls
//!    for commands, dispatches them, and drains an outbound queue through the
//!    bot client with rate limiting and retry/fallback.
//!
//! Snapshot storage ([`snapshot`] module) is pluggable; an in-memory and a
//! Redis-backed implementation are provided.

pub mod bot_client;
pub mod config;
pub mod error;
pub mod executor;
pub mod ids;
pub mod notification;
pub mod notifier;
pub mod router;
pub mod snapshot;

pub use error::{Error, Result};
