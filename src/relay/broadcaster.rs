//! Chunk fan-out
//!
//! Every chunk read from upstream is queued to each attached listener
//! without waiting. A listener whose queue is full or whose client is gone is
//! detached on the spot; the others still get the chunk.

use std::sync::Arc;

use crate::registry::{Delivery, ListenerRegistry};
use crate::stats::RelayStats;
use crate::Chunk;

use super::state::RelayState;

/// Outcome of one broadcast pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dispatch {
    /// Listeners the chunk was queued to
    pub delivered: usize,
    /// Listeners detached during this pass
    pub evicted: usize,
}

/// Pushes upstream chunks to every registered listener
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ListenerRegistry>,
    stats: Arc<RelayStats>,
}

impl Broadcaster {
    /// Create a broadcaster over `registry`, accounting into `stats`
    pub fn new(registry: Arc<ListenerRegistry>, stats: Arc<RelayStats>) -> Self {
        Self { registry, stats }
    }

    /// Broadcaster for the registry and counters of `state`
    pub fn from_state(state: &RelayState) -> Self {
        Self::new(Arc::clone(state.registry()), Arc::clone(state.stats()))
    }

    /// Queue `chunk` to every listener attached when the pass starts
    ///
    /// Never waits on a listener. `bytes_received` grows by the chunk length
    /// once; `bytes_sent` grows by the chunk length per successful delivery.
    pub fn on_chunk(&self, chunk: &Chunk) -> Dispatch {
        let mut dispatch = Dispatch::default();

        for listener in self.registry.snapshot() {
            match listener.deliver(chunk) {
                Delivery::Sent => dispatch.delivered += 1,
                Delivery::Full => {
                    tracing::warn!(
                        listener = %listener.id(),
                        remote = %listener.remote_addr(),
                        queued = listener.queued(),
                        "Listener cannot keep up, disconnecting"
                    );
                    if self.registry.detach(listener.id()) {
                        dispatch.evicted += 1;
                    }
                }
                Delivery::Closed => {
                    tracing::debug!(
                        listener = %listener.id(),
                        remote = %listener.remote_addr(),
                        "Listener sink closed"
                    );
                    if self.registry.detach(listener.id()) {
                        dispatch.evicted += 1;
                    }
                }
                Delivery::Detached => {}
            }
        }

        self.stats.record_chunk(chunk.len(), dispatch.delivered);
        dispatch
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::registry::{Listener, ListenerStream};

    fn setup(limit: usize, buffer: usize) -> (Arc<ListenerRegistry>, Arc<RelayStats>, Broadcaster) {
        let stats = Arc::new(RelayStats::new());
        let registry = Arc::new(ListenerRegistry::new(limit, buffer, Arc::clone(&stats)));
        let broadcaster = Broadcaster::new(Arc::clone(&registry), Arc::clone(&stats));
        (registry, stats, broadcaster)
    }

    fn drain(stream: &mut ListenerStream) -> Vec<Bytes> {
        std::iter::from_fn(|| stream.try_recv()).collect()
    }

    #[test]
    fn test_no_listeners_counts_received_only() {
        let (_registry, stats, broadcaster) = setup(4, 8);

        let sizes = [100, 250, 4096];
        for size in sizes {
            let dispatch = broadcaster.on_chunk(&Bytes::from(vec![0u8; size]));
            assert_eq!(dispatch, Dispatch::default());
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.bytes_received, sizes.iter().sum::<usize>() as u64);
        assert_eq!(snapshot.bytes_sent, 0);
    }

    #[test]
    fn test_every_listener_gets_chunks_in_order() {
        let (registry, stats, broadcaster) = setup(4, 16);
        let mut x = registry.admit("10.0.0.1").unwrap();
        let mut y = registry.admit("10.0.0.2").unwrap();

        let chunks = [
            Bytes::from_static(b"A"),
            Bytes::from_static(b"BB"),
            Bytes::from_static(b"CCC"),
        ];
        for chunk in &chunks {
            assert_eq!(broadcaster.on_chunk(chunk).delivered, 2);
        }

        assert_eq!(drain(&mut x), chunks.to_vec());
        assert_eq!(drain(&mut y), chunks.to_vec());

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.bytes_received, 6);
        assert_eq!(snapshot.bytes_sent, 12);
    }

    #[test]
    fn test_closed_sink_is_isolated() {
        let (registry, stats, broadcaster) = setup(4, 16);

        let id = registry.next_id();
        let (listener, rx) = Listener::channel(id, "10.0.0.1", 16);
        registry.try_attach(listener).unwrap();
        drop(rx);

        let mut healthy = registry.admit("10.0.0.2").unwrap();

        let dispatch = broadcaster.on_chunk(&Bytes::from_static(b"data"));
        assert_eq!(dispatch, Dispatch { delivered: 1, evicted: 1 });
        assert_eq!(registry.count(), 1);
        assert_eq!(drain(&mut healthy), vec![Bytes::from_static(b"data")]);
        assert_eq!(stats.snapshot().bytes_sent, 4);
    }

    #[test]
    fn test_slow_listener_is_disconnected() {
        let (registry, _stats, broadcaster) = setup(4, 2);
        let mut slow = registry.admit("10.0.0.1").unwrap();
        let mut fast = registry.admit("10.0.0.2").unwrap();

        let mut received = Vec::new();
        for i in 0..5u8 {
            broadcaster.on_chunk(&Bytes::from(vec![i]));
            // Only the fast listener keeps draining
            received.extend(drain(&mut fast));
        }

        assert_eq!(registry.count(), 1);
        assert_eq!(registry.snapshot()[0].id(), fast.id());
        assert_eq!(received.len(), 5);

        // Slow listener gets what was queued before eviction, then ends
        assert_eq!(drain(&mut slow).len(), 2);
        assert_eq!(tokio_test::block_on(slow.recv()), None);
    }

    #[test]
    fn test_no_delivery_after_detach() {
        let (registry, _stats, broadcaster) = setup(4, 8);
        let mut stream = registry.admit("10.0.0.1").unwrap();

        broadcaster.on_chunk(&Bytes::from_static(b"before"));
        registry.detach(stream.id());
        broadcaster.on_chunk(&Bytes::from_static(b"after"));

        assert_eq!(drain(&mut stream), vec![Bytes::from_static(b"before")]);
    }
}
