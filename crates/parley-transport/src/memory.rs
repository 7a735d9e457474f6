//! In-process connection pair.
//!
//! Frames sent on one side arrive as [`ConnectionEvent::Data`] on the
//! other, unchanged and in order. Closing or dropping either side
//! delivers [`ConnectionEvent::Closed`] to both inbound streams.
//!
//! ```rust
//! use parley_transport::{Connection, ConnectionEvent, MemoryConnection};
//!
//! let (a, mut b) = MemoryConnection::pair();
//! a.connection.send("hello".into()).unwrap();
//! assert_eq!(b.inbound.try_recv().unwrap(), ConnectionEvent::Data("hello".into()));
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::traits::{Connection, ConnectionEvent, ConnectionId, InboundSender, Link, TransportError};

/// One end of an in-process connection.
pub struct MemoryConnection {
    id: ConnectionId,
    /// The peer's inbound stream.
    peer: InboundSender,
    /// Our own inbound stream, so a local close is observed locally too.
    local: InboundSender,
    /// Shared by both ends.
    is_open: Arc<AtomicBool>,
}

impl MemoryConnection {
    /// Create a connected pair of in-memory links.
    ///
    /// Returns (A, B) where frames sent on A are received on B and vice versa.
    #[must_use]
    pub fn pair() -> (Link, Link) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let is_open = Arc::new(AtomicBool::new(true));

        let a = Self {
            id: ConnectionId::generate(),
            peer: tx_b.clone(),
            local: tx_a.clone(),
            is_open: is_open.clone(),
        };
        let b = Self {
            id: ConnectionId::generate(),
            peer: tx_a,
            local: tx_b,
            is_open,
        };

        (
            Link {
                connection: Arc::new(a),
                inbound: rx_a,
            },
            Link {
                connection: Arc::new(b),
                inbound: rx_b,
            },
        )
    }

    fn shutdown(&self) {
        if self.is_open.swap(false, Ordering::SeqCst) {
            debug!(connection = %self.id, "Memory connection closed");
            let _ = self.peer.send(ConnectionEvent::Closed);
            let _ = self.local.send(ConnectionEvent::Closed);
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        self.peer
            .send(ConnectionEvent::Data(data))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shutdown();
        Ok(())
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (a, mut b) = MemoryConnection::pair();

        a.connection.send(Bytes::from_static(b"1")).unwrap();
        a.connection.send(Bytes::from_static(b"2")).unwrap();

        assert_eq!(
            b.inbound.recv().await,
            Some(ConnectionEvent::Data(Bytes::from_static(b"1")))
        );
        assert_eq!(
            b.inbound.recv().await,
            Some(ConnectionEvent::Data(Bytes::from_static(b"2")))
        );
    }

    #[tokio::test]
    async fn test_close_reaches_both_sides() {
        let (mut a, mut b) = MemoryConnection::pair();

        b.connection.close().await.unwrap();

        assert_eq!(a.inbound.recv().await, Some(ConnectionEvent::Closed));
        assert_eq!(b.inbound.recv().await, Some(ConnectionEvent::Closed));
        assert!(!a.connection.is_open());
        assert!(matches!(
            a.connection.send(Bytes::from_static(b"x")),
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_drop_closes_peer() {
        let (mut a, b) = MemoryConnection::pair();
        drop(b);
        assert_eq!(a.inbound.recv().await, Some(ConnectionEvent::Closed));
    }
}
