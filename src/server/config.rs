//! Relay configuration
//!
//! Loaded from a JSON file whose required keys are `port`, `listener_limit`,
//! `save_interval`, `timeout`, `relay_url` and `relay_port`. Durations are in
//! milliseconds. A few environment variables override the file afterwards.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::upstream::UpstreamConfig;

/// Environment variable overriding the upstream host
pub const ENV_UPSTREAM_HOST: &str = "URL";
/// Environment variable overriding the relay identity sent upstream
pub const ENV_RELAY_URL: &str = "RELAY_URL";
/// Environment variable overriding the listening port
pub const ENV_PORT: &str = "PORT";

/// Relay configuration options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Port the HTTP surface listens on
    pub port: u16,

    /// Maximum number of concurrently attached listeners
    pub listener_limit: usize,

    /// Statistics save interval in milliseconds
    pub save_interval: u64,

    /// Delay before retrying the upstream, in milliseconds
    pub timeout: u64,

    /// Public address of this relay, announced upstream as `X-Relay-Addr`
    pub relay_url: String,

    /// Public port of this relay, announced upstream as `X-Relay-Port`
    pub relay_port: u16,

    /// Upstream feed host
    #[serde(default = "default_upstream_host")]
    pub upstream_host: String,

    /// Upstream feed port
    #[serde(default = "default_upstream_port")]
    pub upstream_port: u16,

    /// Upstream feed path
    #[serde(default = "default_upstream_path")]
    pub upstream_path: String,

    /// Where rejected listeners are redirected
    #[serde(default = "default_fallback_url")]
    pub fallback_url: String,

    /// Per-listener queue capacity, in chunks
    #[serde(default = "default_listener_buffer")]
    pub listener_buffer: usize,

    /// Upstream connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Milliseconds without upstream data before the stream counts as dead
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,

    /// Static cross-domain policy file
    #[serde(default = "default_crossdomain_path")]
    pub crossdomain_path: PathBuf,

    /// Statistics file
    #[serde(default = "default_stats_path")]
    pub stats_path: PathBuf,
}

fn default_upstream_host() -> String {
    "forever.fm".into()
}

fn default_upstream_port() -> u16 {
    80
}

fn default_upstream_path() -> String {
    "/all.mp3".into()
}

fn default_fallback_url() -> String {
    "http://relay01.forever.fm/all.mp3".into()
}

fn default_listener_buffer() -> usize {
    64
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_read_timeout() -> u64 {
    5_000
}

fn default_crossdomain_path() -> PathBuf {
    PathBuf::from("./crossdomain.xml")
}

fn default_stats_path() -> PathBuf {
    PathBuf::from("./stats.json")
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 8192,
            listener_limit: 200,
            save_interval: 60_000,
            timeout: 1_000,
            relay_url: "localhost".into(),
            relay_port: 8192,
            upstream_host: default_upstream_host(),
            upstream_port: default_upstream_port(),
            upstream_path: default_upstream_path(),
            fallback_url: default_fallback_url(),
            listener_buffer: default_listener_buffer(),
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            crossdomain_path: default_crossdomain_path(),
            stats_path: default_stats_path(),
        }
    }
}

impl RelayConfig {
    /// Parse a configuration from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| Error::Config(format!("invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Apply `URL`, `RELAY_URL` and `PORT` overrides from the process environment
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_UPSTREAM_HOST).filter(|v| !v.is_empty()) {
            self.upstream_host = host;
        }
        if let Some(relay_url) = lookup(ENV_RELAY_URL).filter(|v| !v.is_empty()) {
            self.relay_url = relay_url;
        }
        if let Some(port) = lookup(ENV_PORT).filter(|v| !v.is_empty()) {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{} is not a valid port: {:?}", ENV_PORT, port)))?;
        }
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.listener_buffer == 0 {
            return Err(Error::Config("listener_buffer must be at least 1".into()));
        }
        if self.save_interval == 0 {
            return Err(Error::Config("save_interval must be positive".into()));
        }
        if self.read_timeout == 0 {
            return Err(Error::Config("read_timeout must be positive".into()));
        }
        Ok(())
    }

    /// Set the listening port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the admission ceiling
    pub fn listener_limit(mut self, limit: usize) -> Self {
        self.listener_limit = limit;
        self
    }

    /// Set the upstream retry delay
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.timeout = delay.as_millis() as u64;
        self
    }

    /// Set how long the upstream may stay silent before reconnecting
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = (timeout.as_millis() as u64).max(1);
        self
    }

    /// Set the statistics save interval
    pub fn save_every(mut self, interval: Duration) -> Self {
        self.save_interval = (interval.as_millis() as u64).max(1);
        self
    }

    /// Point the relay at a different upstream
    pub fn upstream(mut self, host: impl Into<String>, port: u16) -> Self {
        self.upstream_host = host.into();
        self.upstream_port = port;
        self
    }

    /// Set the per-listener queue capacity
    pub fn listener_buffer(mut self, chunks: usize) -> Self {
        self.listener_buffer = chunks.max(1);
        self
    }

    /// Set the redirect target used on capacity rejection
    pub fn fallback_url(mut self, url: impl Into<String>) -> Self {
        self.fallback_url = url.into();
        self
    }

    /// Address the HTTP surface binds to
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }

    /// Upstream retry delay
    pub fn retry_delay_duration(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Statistics save interval
    pub fn save_interval_duration(&self) -> Duration {
        Duration::from_millis(self.save_interval)
    }

    /// Full URL of the upstream feed
    pub fn upstream_url(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.upstream_host, self.upstream_port, self.upstream_path
        )
    }

    /// Settings for the upstream client
    pub fn upstream_config(&self) -> UpstreamConfig {
        UpstreamConfig {
            url: self.upstream_url(),
            relay_addr: self.relay_url.clone(),
            relay_port: self.relay_port,
            retry_delay: self.retry_delay_duration(),
            connect_timeout: Duration::from_millis(self.connect_timeout),
            read_timeout: Duration::from_millis(self.read_timeout),
        }
    }
}
