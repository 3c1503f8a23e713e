//! Registry error types
//!
//! Admission outcomes other than `Accepted`. A full registry is an expected
//! result, reported to the client as a redirect rather than logged as a fault.

use super::listener::ListenerId;

/// Reason a listener was not attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// The registry already holds `limit` listeners
    CapacityExceeded { limit: usize },
    /// A listener with this id is already attached
    AlreadyAttached(ListenerId),
    /// The registry is shutting down
    Closed,
}

impl std::fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmissionError::CapacityExceeded { limit } => {
                write!(f, "Listener limit exceeded: {}", limit)
            }
            AdmissionError::AlreadyAttached(id) => write!(f, "Listener already attached: {}", id),
            AdmissionError::Closed => write!(f, "Relay is shutting down"),
        }
    }
}

impl std::error::Error for AdmissionError {}
