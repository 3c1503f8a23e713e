//! Listener registry and admission control
//!
//! The registry holds every attached listener and enforces the admission
//! ceiling. Each listener owns a bounded queue; the broadcaster pushes chunks
//! into it without waiting and the HTTP response drains it at the client's
//! pace.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<ListenerRegistry>
//!                  ┌─────────────────────────────┐
//!                  │ listeners: BTreeMap<Id,     │
//!                  │   Arc<Listener> {           │
//!                  │     sink: mpsc::Sender,     │
//!                  │   }                         │
//!                  │ >                           │
//!                  └──────────────┬──────────────┘
//!                                 │ snapshot()
//!         ┌───────────────────────┼───────────────────────┐
//!         ▼                       ▼                       ▼
//!   [ListenerStream]        [ListenerStream]        [ListenerStream]
//!    rx.poll_recv()          rx.poll_recv()          rx.poll_recv()
//!         │                       │                       │
//!         └──► HTTP body ──► TCP  └──► HTTP body ──► TCP  └──► ...
//! ```
//!
//! # Zero-Copy Design
//!
//! Chunks are `bytes::Bytes`, so every listener queue shares the allocation
//! made by the upstream read; delivering a chunk only bumps a reference count.

pub mod error;
pub mod listener;
pub mod store;

pub use error::AdmissionError;
pub use listener::{Delivery, Listener, ListenerId, ListenerStream};
pub use store::ListenerRegistry;
