//! Events a router emits to the application layer.

use bytes::Bytes;
use tokio::sync::mpsc;

/// An event emitted by a [`Router`](crate::Router).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// A well-formed request or notification arrived. Holds the raw frame;
    /// the application decodes `command` and `payload` itself.
    MessageReady(Bytes),
    /// Bytes that could not be decoded as a packet.
    UnknownPacket(Bytes),
    /// The reply for request `id` arrived and the gate was released.
    ReplyReady {
        /// Correlation id of the resolved request.
        id: u64,
    },
}

/// Receiving half of a router's event stream.
pub type RouterEvents = mpsc::UnboundedReceiver<RouterEvent>;
