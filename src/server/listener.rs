//! Relay HTTP server
//!
//! Serves the gateway router on a bound socket until shutdown. Streaming
//! responses never finish on their own, so shutdown closes every listener
//! sink to let the connections drain.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;

use crate::error::Result;
use crate::relay::RelayState;

use super::gateway;

/// HTTP server for one relay
pub struct RelayServer {
    state: Arc<RelayState>,
    crossdomain: Bytes,
}

impl RelayServer {
    /// Create a server over `state`, serving `crossdomain` as the policy file
    pub fn new(state: Arc<RelayState>, crossdomain: Bytes) -> Self {
        Self { state, crossdomain }
    }

    /// Gateway router for this server
    pub fn router(&self) -> Router {
        gateway::router(Arc::clone(&self.state), self.crossdomain.clone())
    }

    /// Serve on `listener` until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let registry = Arc::clone(self.state.registry());
        let signal = async move {
            shutdown.await;
            registry.close_all();
        };

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await?;

        Ok(())
    }
}
