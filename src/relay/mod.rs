//! Relay engine
//!
//! Couples the upstream client to the listener registry. Start-up probes the
//! upstream until it answers, then runs three tasks side by side until
//! shutdown: the upstream read loop feeding the [`Broadcaster`], the
//! statistics saver and the HTTP surface.

pub mod broadcaster;
pub mod state;

pub use broadcaster::{Broadcaster, Dispatch};
pub use state::RelayState;

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::server::config::RelayConfig;
use crate::server::RelayServer;
use crate::stats::{current_period, RelayStats, StatsStore};
use crate::upstream::UpstreamClient;

/// A complete relay: upstream, registry, statistics and HTTP surface
pub struct Relay {
    state: Arc<RelayState>,
    upstream: Arc<UpstreamClient>,
    store: Option<StatsStore>,
    crossdomain: Bytes,
}

impl Relay {
    /// Build a relay from `config`
    ///
    /// Seeds statistics from `config.stats_path` and reads the cross-domain
    /// policy from `config.crossdomain_path` (an unreadable policy file is
    /// served as empty).
    pub fn new(config: RelayConfig) -> Result<Self> {
        let store = StatsStore::new(&config.stats_path);
        let stats = store.load()?.into_stats();

        let crossdomain = match std::fs::read(&config.crossdomain_path) {
            Ok(content) => Bytes::from(content),
            Err(e) => {
                tracing::warn!(
                    path = %config.crossdomain_path.display(),
                    error = %e,
                    "Cross-domain policy unavailable, serving empty file"
                );
                Bytes::new()
            }
        };

        Self::with_parts(config, stats, Some(store), crossdomain)
    }

    /// Build a relay from already-loaded parts
    ///
    /// Without a store, statistics are kept in memory only. Counters seeded
    /// from an earlier period are rolled over before anything is counted.
    pub fn with_parts(
        config: RelayConfig,
        stats: RelayStats,
        store: Option<StatsStore>,
        crossdomain: Bytes,
    ) -> Result<Self> {
        let period = current_period();
        if stats.roll_period(period) {
            tracing::info!(period = period, "Saved statistics belong to an earlier period, starting over");
        }

        let upstream = Arc::new(UpstreamClient::new(config.upstream_config())?);
        let state = Arc::new(RelayState::new(config, stats, upstream.subscribe_state()));

        Ok(Self {
            state,
            upstream,
            store,
            crossdomain,
        })
    }

    /// Shared relay state
    pub fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    /// Upstream client
    pub fn upstream(&self) -> &Arc<UpstreamClient> {
        &self.upstream
    }

    /// Run until `shutdown` resolves, binding the configured port
    ///
    /// The port is only bound once the upstream has answered a probe.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = shutdown_token(shutdown);

        if !self.upstream.wait_until_ready(&cancel).await {
            tracing::info!("Shutdown before upstream became ready");
            return Ok(());
        }

        let addr = self.state.config().bind_addr();
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %addr, "Relay listening");

        self.serve(listener, cancel).await
    }

    /// Run until `shutdown` resolves, serving on an already-bound listener
    ///
    /// Connections queue in the listener backlog until the upstream is ready.
    pub async fn run_with_listener<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = shutdown_token(shutdown);

        if !self.upstream.wait_until_ready(&cancel).await {
            tracing::info!("Shutdown before upstream became ready");
            return Ok(());
        }

        self.serve(listener, cancel).await
    }

    async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        let upstream_task = self.spawn_upstream(cancel.child_token());

        let persist_task = self.store.as_ref().map(|store| {
            store.spawn_persist_task(
                Arc::clone(self.state.stats()),
                self.state.config().save_interval_duration(),
                cancel.child_token(),
            )
        });

        let server = RelayServer::new(Arc::clone(&self.state), self.crossdomain.clone());
        let result = server.serve(listener, cancel.clone().cancelled_owned()).await;

        // Server may have stopped on its own
        cancel.cancel();

        if let Err(e) = upstream_task.await {
            tracing::error!(error = %e, "Upstream task failed");
        }
        if let Some(task) = persist_task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Statistics task failed");
            }
        }
        if let Some(store) = &self.store {
            store.persist(self.state.stats()).await;
        }

        tracing::info!("Relay stopped");
        result
    }

    fn spawn_upstream(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let upstream = Arc::clone(&self.upstream);
        let broadcaster = Broadcaster::from_state(&self.state);

        tokio::spawn(async move {
            upstream
                .run(
                    move |chunk| {
                        broadcaster.on_chunk(&chunk);
                    },
                    cancel,
                )
                .await;
        })
    }
}

/// Token cancelled when `shutdown` resolves
fn shutdown_token<F>(shutdown: F) -> CancellationToken
where
    F: Future<Output = ()> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                trigger.cancel();
            }
            _ = trigger.cancelled() => {}
        }
    });

    cancel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::ConnectionState;

    fn unreachable_config() -> RelayConfig {
        RelayConfig::default()
            .port(0)
            .upstream("127.0.0.1", 1)
            .retry_delay(std::time::Duration::from_millis(10))
    }

    #[test]
    fn test_with_parts() {
        let relay =
            Relay::with_parts(unreachable_config(), RelayStats::new(), None, Bytes::new()).unwrap();

        assert_eq!(relay.state().connection_state(), ConnectionState::Disconnected);
        assert_eq!(relay.state().registry().count(), 0);
        assert_eq!(relay.upstream().config().url, "http://127.0.0.1:1/all.mp3");
    }

    #[tokio::test]
    async fn test_shutdown_while_upstream_unavailable() {
        let relay =
            Relay::with_parts(unreachable_config(), RelayStats::new(), None, Bytes::new()).unwrap();

        let shutdown = tokio::time::sleep(std::time::Duration::from_millis(50));
        relay.run_until(shutdown).await.unwrap();

        assert_eq!(relay.state().connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_new_with_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = unreachable_config();
        config.stats_path = dir.path().join("stats.json");
        config.crossdomain_path = dir.path().join("crossdomain.xml");

        let relay = Relay::new(config).unwrap();
        assert_eq!(relay.state().stats().snapshot().bytes_received, 0);
    }

    #[test]
    fn test_stale_stats_roll_over_at_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = unreachable_config();
        config.stats_path = dir.path().join("stats.json");
        config.crossdomain_path = dir.path().join("crossdomain.xml");

        // Same month a year ago
        let (year, month0) = crate::stats::period_parts(current_period() - 12);
        let saved = format!(
            r#"{{"bytes_in_month":500,"bytes_out_month":9000,"month":{},"year":{},
                "peaks":{{"listeners":12,"bytes_out_month":4000}}}}"#,
            month0, year
        );
        std::fs::write(&config.stats_path, saved).unwrap();

        let relay = Relay::new(config).unwrap();
        let snapshot = relay.state().stats().snapshot();

        assert_eq!(snapshot.period, current_period());
        assert_eq!(snapshot.bytes_received, 0);
        assert_eq!(snapshot.bytes_sent, 0);
        assert_eq!(snapshot.peak_listeners, 12);
        assert_eq!(snapshot.peak_bytes_sent, 9000);
    }

    #[test]
    fn test_current_stats_kept_at_start() {
        let stats = RelayStats::seeded(500, 9000, 12, 4000, current_period());
        let relay = Relay::with_parts(unreachable_config(), stats, None, Bytes::new()).unwrap();

        let snapshot = relay.state().stats().snapshot();
        assert_eq!(snapshot.bytes_received, 500);
        assert_eq!(snapshot.bytes_sent, 9000);
    }
}
