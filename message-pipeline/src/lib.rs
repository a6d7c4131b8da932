//! Notification enrichment, HTML-escaping discipline and UTF-8-safe chunking
//! for the wire format the remote bot API expects.
//!
//! Kept as a separate, dependency-free crate (in the spirit of the teacher's
//! `telegram-message-builder`) because every function here is a pure string
//! transform: no I/O, no async, trivially unit-testable in isolation from the
//! notifier runtime that calls it.

mod chunk;
mod enrich;
mod escape;

pub use chunk::{chunk_message, safe_split};
pub use enrich::{EnrichInput, enrich};
pub use escape::{html_escape, truncate_runes};

/// Safety margin under Telegram's 4096-byte hard limit (see spec §4.7).
pub const CHUNK_LIMIT: usize = 3900;
