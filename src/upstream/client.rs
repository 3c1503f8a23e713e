//! Upstream feed client
//!
//! `probe()` checks that the feed exists, `connect()` streams it once, and
//! `run()` keeps connecting forever with a fixed delay between attempts.

use futures_util::StreamExt;
use reqwest::{Method, RequestBuilder, StatusCode};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, UpstreamError};
use crate::Chunk;

use super::config::{UpstreamConfig, USER_AGENT};
use super::state::{ConnectionEvent, ConnectionState};

/// `StreamEnded::error` when the upstream went silent
pub const READ_TIMED_OUT: &str = "read timed out";

/// Outcome of a HEAD probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// Feed exists
    Ready,
    /// Feed answered with an unusable status, or not at all (`None`)
    Unavailable(Option<u16>),
}

/// Summary of a streaming session that ended after a successful connect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamEnded {
    /// Chunks handed to the callback
    pub chunks: u64,
    /// Bytes handed to the callback
    pub bytes: u64,
    /// Read error that ended the stream, `None` if the upstream closed it
    pub error: Option<String>,
}

impl StreamEnded {
    /// Whether the upstream closed the stream without a read error
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

/// Client for the single upstream feed
pub struct UpstreamClient {
    config: UpstreamConfig,
    http: reqwest::Client,
    state: watch::Sender<ConnectionState>,
}

impl UpstreamClient {
    /// Create a client; no request is made until `probe` or `connect`
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(UpstreamError::from)?;

        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            config,
            http,
            state,
        })
    }

    /// Get the client configuration
    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn request(&self, method: Method) -> RequestBuilder {
        self.http
            .request(method, &self.config.url)
            .header("Connection", "keep-alive")
            .header("X-Relay-Addr", &self.config.relay_addr)
            .header("X-Relay-Port", self.config.relay_port.to_string())
    }

    fn advance(&self, event: ConnectionEvent) {
        self.state.send_if_modified(|state| match state.on_event(event) {
            Some(next) => {
                let changed = *state != next;
                if changed {
                    tracing::debug!(from = %state, to = %next, ?event, "Upstream state change");
                }
                *state = next;
                changed
            }
            None => {
                tracing::debug!(state = %state, ?event, "Ignoring upstream event");
                false
            }
        });
    }

    /// Check that the feed exists without fetching any body
    ///
    /// `200` and `405` both count as ready; some upstreams refuse HEAD on a
    /// path that does exist.
    pub async fn probe(&self) -> ProbeResult {
        match self.request(Method::HEAD).send().await {
            Ok(response) => match response.status() {
                StatusCode::OK | StatusCode::METHOD_NOT_ALLOWED => ProbeResult::Ready,
                status => ProbeResult::Unavailable(Some(status.as_u16())),
            },
            Err(e) => {
                tracing::debug!(error = %e, "Upstream probe failed");
                ProbeResult::Unavailable(e.status().map(|s| s.as_u16()))
            }
        }
    }

    /// Probe until the upstream is ready
    ///
    /// Returns `false` if cancelled first. Returns immediately once the
    /// client has left `Disconnected`.
    pub async fn wait_until_ready(&self, cancel: &CancellationToken) -> bool {
        while self.state() == ConnectionState::Disconnected {
            tracing::info!(url = %self.config.url, "Attempting to connect to upstream");

            let result = tokio::select! {
                _ = cancel.cancelled() => return false,
                result = self.probe() => result,
            };

            match result {
                ProbeResult::Ready => {
                    tracing::info!(url = %self.config.url, "Got response back from upstream");
                    self.advance(ConnectionEvent::ProbeSucceeded);
                }
                ProbeResult::Unavailable(status) => {
                    tracing::warn!(
                        url = %self.config.url,
                        status = ?status,
                        retry_ms = self.config.retry_delay.as_millis() as u64,
                        "Upstream unavailable"
                    );
                    self.advance(ConnectionEvent::ProbeFailed);

                    tokio::select! {
                        _ = cancel.cancelled() => return false,
                        _ = tokio::time::sleep(self.config.retry_delay) => {}
                    }
                }
            }
        }

        true
    }

    /// Open one streaming request and feed every read to `on_chunk`
    ///
    /// Fails with [`UpstreamError`] if the request cannot be made or the
    /// status is not a success. Once streaming has started, the end of the
    /// stream (clean or not) is reported as [`StreamEnded`]. No data for
    /// `read_timeout` also ends the stream.
    pub async fn connect<F>(&self, mut on_chunk: F) -> std::result::Result<StreamEnded, UpstreamError>
    where
        F: FnMut(Chunk),
    {
        tracing::info!(url = %self.config.url, "Attempting to listen to upstream");

        let response = self.request(Method::GET).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        tracing::info!(url = %self.config.url, "Listening to upstream");
        self.advance(ConnectionEvent::Connected);

        let mut ended = StreamEnded::default();
        let mut body = response.bytes_stream();

        loop {
            let item = match tokio::time::timeout(self.config.read_timeout, body.next()).await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(_) => {
                    ended.error = Some(READ_TIMED_OUT.to_owned());
                    break;
                }
            };

            match item {
                Ok(chunk) if chunk.is_empty() => {}
                Ok(chunk) => {
                    ended.chunks += 1;
                    ended.bytes += chunk.len() as u64;
                    on_chunk(chunk);
                }
                Err(e) => {
                    ended.error = Some(e.to_string());
                    break;
                }
            }
        }

        Ok(ended)
    }

    /// Relay the upstream forever
    ///
    /// Probes first if the client is still `Disconnected`. After every
    /// failure or end of stream waits `retry_delay` and connects again; there
    /// is no backoff growth and no retry limit. Returns only when cancelled.
    pub async fn run<F>(&self, mut on_chunk: F, cancel: CancellationToken)
    where
        F: FnMut(Chunk),
    {
        if !self.wait_until_ready(&cancel).await {
            return;
        }

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.connect(&mut on_chunk) => outcome,
            };

            match outcome {
                Ok(ended) => {
                    tracing::warn!(
                        chunks = ended.chunks,
                        bytes = ended.bytes,
                        error = ended.error.as_deref().unwrap_or("none"),
                        "Stream ended, restarting upstream listener"
                    );
                    self.advance(ConnectionEvent::StreamEnded);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream connect failed");
                    self.advance(ConnectionEvent::ConnectFailed);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.retry_delay) => {}
            }
            self.advance(ConnectionEvent::DelayElapsed);
        }

        tracing::debug!("Upstream loop stopped");
    }
}
