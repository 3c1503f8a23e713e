//! Error types for the relay
//!
//! Only start-up failures (unreadable or invalid configuration, a stats file
//! that cannot be parsed, a port that cannot be bound) surface through
//! [`Error`]. Everything that goes wrong at runtime is contained in the
//! component that saw it and logged there.

use std::io;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("statistics record error: {0}")]
    Stats(#[from] serde_json::Error),
}

/// Failure talking to the upstream feed
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Upstream answered with a non-success status
    #[error("upstream returned status {0}")]
    Status(u16),

    /// Request could not be sent or the connection failed
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl UpstreamError {
    /// Status code carried by the error, if the upstream answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Status(code) => Some(*code),
            UpstreamError::Transport(e) => e.status().map(|s| s.as_u16()),
        }
    }
}
