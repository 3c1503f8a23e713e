//! Upstream connection state machine
//!
//! There is exactly one connection state per relay and only the upstream
//! client changes it. Transitions are driven by completion events rather
//! than by nested callbacks, so each can be tested on its own.

/// Lifecycle of the upstream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Nothing known about the upstream yet, or the start-up probe failed
    #[default]
    Disconnected,
    /// Upstream reachable, a streaming request is being opened
    Probing,
    /// Receiving chunks
    Connected,
    /// Last attempt failed or the stream ended, waiting out the retry delay
    Reconnecting,
}

/// Things that happen to the upstream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// HEAD probe answered with an acceptable status
    ProbeSucceeded,
    /// HEAD probe failed or answered with an error status
    ProbeFailed,
    /// Streaming request answered with a success status
    Connected,
    /// Streaming request failed before any data
    ConnectFailed,
    /// Upstream closed the stream or the read failed
    StreamEnded,
    /// Retry delay is over
    DelayElapsed,
}

impl ConnectionState {
    /// Next state after `event`, or `None` if the event is not valid here
    pub fn on_event(self, event: ConnectionEvent) -> Option<ConnectionState> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self, event) {
            (S::Disconnected, E::ProbeSucceeded) => Some(S::Probing),
            (S::Disconnected, E::ProbeFailed) => Some(S::Disconnected),
            (S::Probing, E::Connected) => Some(S::Connected),
            (S::Probing, E::ConnectFailed) => Some(S::Reconnecting),
            (S::Connected, E::StreamEnded) => Some(S::Reconnecting),
            (S::Reconnecting, E::DelayElapsed) => Some(S::Probing),
            _ => None,
        }
    }

    /// Whether chunks are currently flowing
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    /// Name used in logs and the status payload
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Probing => "probing",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
