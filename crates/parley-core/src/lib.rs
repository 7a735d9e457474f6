//! # parley-core
//!
//! Request/reply correlation and packet dispatch for Parley.
//!
//! This crate provides the per-connection [`Router`]:
//!
//! - **Request tracker** - Issues requests and waits for the matching reply
//! - **Dispatcher** - Classifies inbound frames and forwards them
//! - **Settle** - Wakes every waiter of a request on reply, timeout or cancellation
//!
//! ## Architecture
//!
//! ```text
//! caller ──request()──▶ ┌─────────┐ ──send()──▶ ┌────────────┐
//!                       │ Router  │             │ Connection │
//! caller ◀─wait_for_reply() ─┤    │ ◀─handle_packet()─ └────────────┘
//!                       └─────────┘
//!                            │
//!                            ▼
//!                      RouterEvent (message ready / unknown / reply ready)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use parley_core::{ReplyOutcome, Role, Router};
//! use parley_protocol::PacketType;
//! use parley_transport::MemoryConnection;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let (client, _server) = MemoryConnection::pair();
//! let (router, _events) = Router::new(Role::Initiator, client.connection);
//!
//! router.request(PacketType::REQUEST, "ping", "{}", 5).unwrap();
//! router.cancel_request();
//! assert_eq!(router.wait_for_reply().await, ReplyOutcome::Cancelled);
//! # });
//! ```

mod correlation;
pub mod event;
pub mod outcome;
pub mod router;

pub use event::{RouterEvent, RouterEvents};
pub use outcome::ReplyOutcome;
pub use router::{Role, Router, RouterError};
