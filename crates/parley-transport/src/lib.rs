//! # parley-transport
//!
//! Connection abstraction layer for Parley routers.
//!
//! A router only needs two capabilities from its transport: sending a
//! frame of raw bytes, and a stream of "data arrived" / "closed" events.
//! This crate provides those over:
//!
//! - **Memory** - An in-process pair, for tests and local play
//! - **WebSocket** - One binary message per frame
//!
//! ## Transport Abstraction
//!
//! All connections implement the `Connection` trait and come paired with
//! an inbound event receiver in a `Link`.
//!
//! ```rust,ignore
//! use parley_transport::{ConnectionEvent, Link};
//!
//! async fn drain(mut link: Link) {
//!     while let Some(ConnectionEvent::Data(frame)) = link.inbound.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod memory;
pub mod queued;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::MemoryConnection;
pub use queued::{OutboundQueue, QueuedConnection};
pub use traits::{
    Connection, ConnectionEvent, ConnectionId, Inbound, InboundSender, Link, Transport,
    TransportError,
};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
