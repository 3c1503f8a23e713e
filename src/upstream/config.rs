//! Upstream client configuration

use std::time::Duration;

/// `User-Agent` announced to the upstream feed
pub const USER_AGENT: &str = "foreverfm-relay";

/// Settings for [`UpstreamClient`](super::UpstreamClient)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    /// Full URL of the feed (e.g. `http://forever.fm:80/all.mp3`)
    pub url: String,

    /// Value of the `X-Relay-Addr` header
    pub relay_addr: String,

    /// Value of the `X-Relay-Port` header
    pub relay_port: u16,

    /// Fixed delay between a failure and the next attempt
    pub retry_delay: Duration,

    /// TCP connect timeout for each attempt
    pub connect_timeout: Duration,

    /// Longest wait for the next read once streaming; a silent upstream is
    /// treated as an ended stream after this
    pub read_timeout: Duration,
}

impl UpstreamConfig {
    /// Create a config for the given feed URL with default relay identity
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            relay_addr: "localhost".into(),
            relay_port: 80,
            retry_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(5),
        }
    }
}
