//! Upstream feed client
//!
//! Owns the single connection to the source stream. The client probes the
//! feed, opens a long-lived streaming request and hands every network read to
//! a callback as one [`Chunk`](crate::Chunk). When the stream fails or ends it
//! waits a fixed delay and connects again, forever.
//!
//! ```text
//!  Disconnected ──probe ok──► Probing ──connect ok──► Connected
//!       ▲  │                    ▲  │                      │
//!       └──┘ probe failed       │  └─ connect failed ─┐   │ read error / end
//!                               │                     ▼   ▼
//!                               └──── delay elapsed ── Reconnecting
//! ```

pub mod client;
pub mod config;
pub mod state;

pub use client::{ProbeResult, StreamEnded, UpstreamClient, READ_TIMED_OUT};
pub use config::UpstreamConfig;
pub use state::{ConnectionEvent, ConnectionState};
