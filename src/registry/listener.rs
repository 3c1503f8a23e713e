//! Listener entries
//!
//! A [`Listener`] is the registry's view of one downstream connection: an id,
//! the client address and the sending half of its chunk queue. The receiving
//! half becomes the HTTP response body through [`ListenerStream`].

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::Chunk;

use super::store::ListenerRegistry;

/// Unique identifier of an attached listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Wrap a raw id
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of handing one chunk to a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Chunk queued for the client
    Sent,
    /// Queue is full, the client is not keeping up
    Full,
    /// Receiving side is gone, the client disconnected
    Closed,
    /// Listener was already detached, nothing was attempted
    Detached,
}

/// One attached downstream connection
#[derive(Debug)]
pub struct Listener {
    id: ListenerId,
    remote_addr: String,
    attached_at: Instant,
    capacity: usize,
    /// `None` once detached; taken under the lock so no delivery can follow
    sink: Mutex<Option<mpsc::Sender<Chunk>>>,
}

impl Listener {
    /// Create a listener and the receiving end of its bounded queue
    pub fn channel(
        id: ListenerId,
        remote_addr: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Chunk>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        let listener = Self {
            id,
            remote_addr: remote_addr.into(),
            attached_at: Instant::now(),
            capacity,
            sink: Mutex::new(Some(tx)),
        };

        (listener, rx)
    }

    /// Listener id
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Client address label
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// When the listener was created
    pub fn attached_at(&self) -> Instant {
        self.attached_at
    }

    /// Time since the listener was created
    pub fn connected_for(&self) -> Duration {
        self.attached_at.elapsed()
    }

    /// Whether the sink is still open
    pub fn is_open(&self) -> bool {
        self.sink.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Chunks waiting in the queue
    pub fn queued(&self) -> usize {
        match self.sink.lock().as_ref() {
            Some(tx) => self.capacity - tx.capacity(),
            None => 0,
        }
    }

    /// Queue a chunk without waiting
    pub fn deliver(&self, chunk: &Chunk) -> Delivery {
        let sink = self.sink.lock();
        let Some(tx) = sink.as_ref() else {
            return Delivery::Detached;
        };

        match tx.try_send(chunk.clone()) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Drop the sending half; returns `false` if it was already closed
    ///
    /// The client still receives whatever is queued, then its body ends.
    pub(super) fn close(&self) -> bool {
        self.sink.lock().take().is_some()
    }
}

/// Response body of an attached listener
///
/// Yields queued chunks until the listener is detached. Dropping it (the
/// client went away) detaches the listener from the registry.
pub struct ListenerStream {
    id: ListenerId,
    rx: mpsc::Receiver<Chunk>,
    registry: Arc<ListenerRegistry>,
}

impl ListenerStream {
    pub(super) fn new(
        id: ListenerId,
        rx: mpsc::Receiver<Chunk>,
        registry: Arc<ListenerRegistry>,
    ) -> Self {
        Self { id, rx, registry }
    }

    /// Id of the listener this stream drains
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Next chunk, or `None` once detached and drained
    pub async fn recv(&mut self) -> Option<Chunk> {
        self.rx.recv().await
    }

    /// Next queued chunk without waiting
    pub fn try_recv(&mut self) -> Option<Chunk> {
        self.rx.try_recv().ok()
    }
}

impl std::fmt::Debug for ListenerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerStream").field("id", &self.id).finish()
    }
}

impl Stream for ListenerStream {
    type Item = Result<Chunk, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|chunk| chunk.map(Ok))
    }
}

impl Drop for ListenerStream {
    fn drop(&mut self) {
        self.registry.detach(self.id);
    }
}
