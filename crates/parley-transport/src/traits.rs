//! Transport abstraction traits for Parley.
//!
//! A connection moves opaque byte frames between two peers. Outbound data
//! is handed over with [`Connection::send`]; inbound data and disconnects
//! arrive as [`ConnectionEvent`]s on the receiver returned alongside the
//! connection.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Identifies one connection for logs and peer tables. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Arc<str>);

impl ConnectionId {
    /// Allocate an id unique within this process, formatted as
    /// `conn-<epoch secs hex>-<sequence>`.
    #[must_use]
    pub fn generate() -> Self {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let seq = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn-{:x}-{}", epoch, seq).into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is closed; nothing more can be sent.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The WebSocket handshake or connect step failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),
}

/// Something that happened on the inbound side of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// One frame of raw bytes arrived.
    Data(Bytes),
    /// The connection is gone; no further events follow.
    Closed,
}

/// Receiving half for a connection's inbound events.
pub type Inbound = mpsc::UnboundedReceiver<ConnectionEvent>;

/// Sending half for a connection's inbound events, held by the I/O side.
pub type InboundSender = mpsc::UnboundedSender<ConnectionEvent>;

/// An active connection to a peer.
///
/// `send` never blocks: implementations enqueue the frame and deliver it
/// from their own I/O task.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Queue one frame of raw bytes for the peer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the connection is closed.
    fn send(&self, data: Bytes) -> Result<(), TransportError>;

    /// Close the connection gracefully. Closing twice is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}

/// A connection together with its inbound event stream.
pub struct Link {
    /// Outbound side, shareable between tasks.
    pub connection: Arc<dyn Connection>,
    /// Inbound events for this connection.
    pub inbound: Inbound,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("connection", self.connection.id())
            .finish_non_exhaustive()
    }
}

/// A transport that can accept connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Accept a new connection.
    ///
    /// This method waits until a new connection is available or an error occurs.
    async fn accept(&self) -> Result<Link, TransportError>;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}
