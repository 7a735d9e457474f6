//! Queue-backed connection for transports with their own writer task.
//!
//! [`QueuedConnection`] is the outbound half handed to routers; the
//! matching [`OutboundQueue`] is drained by whatever task owns the socket.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

use crate::traits::{Connection, ConnectionId, TransportError};

enum Outgoing {
    Data(Bytes),
    Close,
}

/// A connection whose sends are queued for a writer task.
#[derive(Clone)]
pub struct QueuedConnection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outgoing>,
    is_open: Arc<AtomicBool>,
    remote_addr: Option<String>,
}

impl QueuedConnection {
    /// Create a connection and the queue its writer task drains.
    #[must_use]
    pub fn new(remote_addr: Option<String>) -> (Self, OutboundQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let is_open = Arc::new(AtomicBool::new(true));
        let conn = Self {
            id: ConnectionId::generate(),
            tx,
            is_open: is_open.clone(),
            remote_addr,
        };
        (conn, OutboundQueue { rx, is_open })
    }

    /// Mark the connection closed from the I/O side, e.g. when the reader
    /// sees the peer go away. Returns `true` if it was open.
    pub fn mark_closed(&self) -> bool {
        let was_open = self.is_open.swap(false, Ordering::SeqCst);
        if was_open {
            let _ = self.tx.send(Outgoing::Close);
        }
        was_open
    }
}

#[async_trait]
impl Connection for QueuedConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }

        trace!(connection = %self.id, bytes = data.len(), "Queued frame");
        self.tx
            .send(Outgoing::Data(data))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.mark_closed();
        Ok(())
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.clone()
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}

/// The writer side of a [`QueuedConnection`].
pub struct OutboundQueue {
    rx: mpsc::UnboundedReceiver<Outgoing>,
    is_open: Arc<AtomicBool>,
}

impl OutboundQueue {
    /// Wait for the next frame to write.
    ///
    /// Returns `None` once the connection has been closed or every
    /// connection handle has been dropped; frames queued before the close
    /// are still returned first.
    pub async fn next(&mut self) -> Option<Bytes> {
        match self.rx.recv().await {
            Some(Outgoing::Data(data)) => Some(data),
            Some(Outgoing::Close) | None => {
                self.is_open.store(false, Ordering::SeqCst);
                self.rx.close();
                None
            }
        }
    }
}
