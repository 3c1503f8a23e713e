//! Listener registry implementation
//!
//! Holds every attached listener and decides admissions. The capacity check
//! and the insert happen under one write lock, so concurrent attach attempts
//! can never push the registry past its limit.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::stats::RelayStats;

use super::error::AdmissionError;
use super::listener::{Listener, ListenerId, ListenerStream};

/// Registry of attached listeners
///
/// Thread-safe via `RwLock`. Broadcast passes only take the read lock long
/// enough to copy out the current listener set.
pub struct ListenerRegistry {
    /// Attached listeners, in attach order
    listeners: RwLock<BTreeMap<ListenerId, Arc<Listener>>>,

    /// Admission ceiling
    limit: usize,

    /// Per-listener queue capacity, in chunks
    buffer: usize,

    next_id: AtomicU64,

    /// Set by `close_all`; only changed under the write lock
    closed: AtomicBool,

    stats: Arc<RelayStats>,
}

impl ListenerRegistry {
    /// Create a registry admitting at most `limit` listeners
    pub fn new(limit: usize, buffer: usize, stats: Arc<RelayStats>) -> Self {
        Self {
            listeners: RwLock::new(BTreeMap::new()),
            limit,
            buffer: buffer.max(1),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            stats,
        }
    }

    /// Admission ceiling
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Per-listener queue capacity
    pub fn buffer(&self) -> usize {
        self.buffer
    }

    /// Allocate a fresh listener id
    pub fn next_id(&self) -> ListenerId {
        ListenerId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Whether one more listener would currently be admitted
    ///
    /// Advisory only; used for HEAD probes that do not take a slot.
    pub fn has_capacity(&self) -> bool {
        self.listeners.read().len() < self.limit
    }

    /// Attach a listener if the registry is below its limit
    ///
    /// On success the listener peak in the stats is raised to the new count.
    pub fn try_attach(&self, listener: Listener) -> Result<Arc<Listener>, AdmissionError> {
        let mut listeners = self.listeners.write();

        if self.closed.load(Ordering::Relaxed) {
            return Err(AdmissionError::Closed);
        }
        if listeners.len() >= self.limit {
            return Err(AdmissionError::CapacityExceeded { limit: self.limit });
        }
        if listeners.contains_key(&listener.id()) {
            return Err(AdmissionError::AlreadyAttached(listener.id()));
        }

        let listener = Arc::new(listener);
        listeners.insert(listener.id(), Arc::clone(&listener));
        let count = listeners.len();
        self.stats.record_listeners(count);

        tracing::info!(
            listener = %listener.id(),
            remote = %listener.remote_addr(),
            listeners = count,
            "Added listener"
        );

        Ok(listener)
    }

    /// Create, attach and wrap a listener for `remote_addr`
    ///
    /// The returned stream is the response body; dropping it detaches.
    pub fn admit(
        self: &Arc<Self>,
        remote_addr: impl Into<String>,
    ) -> Result<ListenerStream, AdmissionError> {
        let id = self.next_id();
        let (listener, rx) = Listener::channel(id, remote_addr, self.buffer);
        self.try_attach(listener)?;
        Ok(ListenerStream::new(id, rx, Arc::clone(self)))
    }

    /// Remove a listener and close its sink
    ///
    /// Idempotent: returns `false` if the listener was not attached. Once
    /// this returns, no further chunk reaches the listener.
    pub fn detach(&self, id: ListenerId) -> bool {
        let removed = self.listeners.write().remove(&id);

        match removed {
            Some(listener) => {
                listener.close();
                tracing::info!(
                    listener = %id,
                    remote = %listener.remote_addr(),
                    connected_secs = listener.connected_for().as_secs(),
                    "Removed listener"
                );
                true
            }
            None => false,
        }
    }

    /// Number of attached listeners
    pub fn count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Attached listeners in attach order
    pub fn snapshot(&self) -> Vec<Arc<Listener>> {
        self.listeners.read().values().cloned().collect()
    }

    /// Detach every listener and refuse new ones; returns how many were attached
    pub fn close_all(&self) -> usize {
        let drained = {
            let mut listeners = self.listeners.write();
            self.closed.store(true, Ordering::Relaxed);
            std::mem::take(&mut *listeners)
        };
        for listener in drained.values() {
            listener.close();
        }

        if !drained.is_empty() {
            tracing::info!(listeners = drained.len(), "Closed all listeners");
        }
        drained.len()
    }
}
