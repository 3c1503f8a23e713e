//! Shared relay state
//!
//! One [`RelayState`] is created at start-up and handed to every component
//! that needs the registry, the counters or the upstream connection state.

use std::sync::Arc;

use tokio::sync::watch;

use crate::registry::ListenerRegistry;
use crate::server::config::RelayConfig;
use crate::stats::RelayStats;
use crate::upstream::ConnectionState;

/// Registry, statistics and connection state of one relay
pub struct RelayState {
    config: Arc<RelayConfig>,
    registry: Arc<ListenerRegistry>,
    stats: Arc<RelayStats>,
    connection: watch::Receiver<ConnectionState>,
}

impl RelayState {
    /// Build the aggregate; the registry is sized from `config`
    pub fn new(
        config: RelayConfig,
        stats: RelayStats,
        connection: watch::Receiver<ConnectionState>,
    ) -> Self {
        let stats = Arc::new(stats);
        let registry = Arc::new(ListenerRegistry::new(
            config.listener_limit,
            config.listener_buffer,
            Arc::clone(&stats),
        ));

        Self {
            config: Arc::new(config),
            registry,
            stats,
            connection,
        }
    }

    /// Effective configuration
    pub fn config(&self) -> &Arc<RelayConfig> {
        &self.config
    }

    /// Listener registry
    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    /// Relay counters
    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Current upstream connection state
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Watch upstream connection state transitions
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_sized_from_config() {
        let (_tx, rx) = watch::channel(ConnectionState::Disconnected);
        let config = RelayConfig::default().listener_limit(7).listener_buffer(3);
        let state = RelayState::new(config, RelayStats::new(), rx);

        assert_eq!(state.registry().limit(), 7);
        assert_eq!(state.registry().buffer(), 3);
        assert_eq!(state.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connection_state_follows_sender() {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        let state = RelayState::new(RelayConfig::default(), RelayStats::new(), rx);

        tx.send(ConnectionState::Connected).unwrap();
        assert!(state.connection_state().is_connected());
    }
}
