//! Relay for a single continuous HTTP audio stream
//!
//! One upstream feed is fetched and every chunk read from it is fanned out
//! to any number of HTTP listeners, with a ceiling on concurrent listeners
//! and monthly byte accounting.
//!
//! ```text
//!  UpstreamClient ──chunk──► Broadcaster ──► ListenerRegistry sinks ──► listeners
//!        │                        │                  ▲
//!        └── reconnect loop       └─► RelayStats ◄───┤
//!                                                    │
//!                               AdmissionGateway (HTTP) ◄── requests
//! ```
//!
//! # Example
//! ```no_run
//! use foreverfm_relay::{Relay, RelayConfig};
//!
//! # async fn example() -> foreverfm_relay::Result<()> {
//! let config = RelayConfig::load("config.json")?.with_env_overrides()?;
//! let relay = Relay::new(config)?;
//! relay
//!     .run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod registry;
pub mod relay;
pub mod server;
pub mod stats;
pub mod upstream;

pub use error::{Error, Result, UpstreamError};
pub use registry::{AdmissionError, ListenerRegistry};
pub use relay::{Broadcaster, Relay, RelayState};
pub use server::{RelayConfig, RelayServer};
pub use stats::{RelayStats, StatsSnapshot, StatsStore};
pub use upstream::{ConnectionState, UpstreamClient, UpstreamConfig};

/// One read from the upstream feed
///
/// Reference counted, so handing it to every listener never copies the data.
pub type Chunk = bytes::Bytes;
