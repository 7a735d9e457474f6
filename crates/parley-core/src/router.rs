//! Per-connection request/reply router.
//!
//! A router issues requests and waits for their replies, answers and
//! notifies the peer, and dispatches inbound frames. The I/O side feeds
//! it through [`Router::handle_packet`] (or [`Router::run`]); callers wait
//! through [`Router::wait_for_reply`]. Both sides share one mutex over the
//! correlation state. Each request settles through its own channel, so
//! the mutex is never held while waiting and a waiter only ever observes
//! the request it started waiting on.

use bytes::Bytes;
use parley_protocol::{codec, Kind, Packet, PacketType, Peer, ProtocolError};
use parley_transport::{Connection, ConnectionEvent, Inbound, TransportError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::correlation::{deadline_after, next_request_id, CorrelationState, Ticket};
use crate::event::{RouterEvent, RouterEvents};
use crate::outcome::ReplyOutcome;

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Another request is still awaiting its reply.
    #[error("Request {0} is still awaiting a reply")]
    RequestPending(u64),

    /// The packet could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection refused the frame.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Which side of the connection a router sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Client side.
    Initiator,
    /// Server side.
    Responder,
}

impl Role {
    /// Origin and destination used when a packet type leaves them empty.
    #[must_use]
    pub fn default_route(self) -> (Peer, Peer) {
        match self {
            Role::Initiator => (Peer::Client, Peer::Server),
            Role::Responder => (Peer::Server, Peer::Client),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Responder => "responder",
        }
    }
}

/// A request/reply endpoint bound to one connection.
///
/// Only one request may await a reply at a time; a second
/// [`request`](Self::request) is rejected with
/// [`RouterError::RequestPending`] until the first is resolved, times out
/// or is cancelled.
///
/// A settled request can be observed two ways: the return value of
/// [`wait_for_reply`](Self::wait_for_reply), and
/// [`RouterEvent::ReplyReady`]. Both come from the same settle step; use
/// one of them per request.
pub struct Router {
    role: Role,
    connection: RwLock<Arc<dyn Connection>>,
    state: Mutex<CorrelationState>,
    events: mpsc::UnboundedSender<RouterEvent>,
}

impl Router {
    /// Create a router bound to `connection`.
    ///
    /// Returns the router and the receiver for its events.
    #[must_use]
    pub fn new(role: Role, connection: Arc<dyn Connection>) -> (Self, RouterEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        debug!(role = role.as_str(), connection = %connection.id(), "Creating router");
        let router = Self {
            role,
            connection: RwLock::new(connection),
            state: Mutex::new(CorrelationState::new()),
            events,
        };
        (router, rx)
    }

    /// The role fixed at construction.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// The connection currently bound.
    #[must_use]
    pub fn connection(&self) -> Arc<dyn Connection> {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rebind to a new connection, e.g. after a reconnect. A pending
    /// request stays pending; its reply may arrive on the new connection.
    pub fn set_connection(&self, connection: Arc<dyn Connection>) {
        debug!(role = self.role.as_str(), connection = %connection.id(), "Rebinding router");
        *self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner) = connection;
    }

    /// Set a secondary gate that gains one permit whenever a request
    /// settles by reply or cancellation. Several routers may share one.
    pub fn set_reply_ready_gate(&self, gate: Option<Arc<Semaphore>>) {
        self.lock_state().set_reply_ready_gate(gate);
    }

    /// Send a request and start tracking it.
    ///
    /// The kind bits of `ty` are forced to `Request`; missing origin and
    /// destination come from the router's role. `timeout_secs <= 0` waits
    /// indefinitely.
    ///
    /// Returns the correlation id.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::RequestPending`] if a request is already
    /// awaiting its reply, or an encoding or transport error. On error no
    /// request is tracked.
    pub fn request(
        &self,
        ty: PacketType,
        command: &str,
        payload: &str,
        timeout_secs: i64,
    ) -> Result<u64, RouterError> {
        let id = {
            let mut state = self.lock_state();
            if let Some(pending) = state.pending_id() {
                warn!(
                    role = self.role.as_str(),
                    pending,
                    command = %command,
                    "Rejected request while another is pending"
                );
                return Err(RouterError::RequestPending(pending));
            }
            let id = next_request_id();
            state.begin(id, timeout_secs, Instant::now());
            id
        };

        let packet = Packet::request(self.route(ty), id, command, payload);
        if let Err(e) = self.transmit(&packet) {
            self.lock_state().abandon(id);
            return Err(e);
        }

        debug!(role = self.role.as_str(), id, command = %command, timeout_secs, "Request sent");
        Ok(id)
    }

    /// Answer the peer's request `correlation_id`.
    ///
    /// The kind bits of `ty` are forced to `Reply`. Local tracking is not
    /// touched.
    ///
    /// # Errors
    ///
    /// Returns an encoding or transport error.
    pub fn reply(
        &self,
        ty: PacketType,
        command: &str,
        payload: &str,
        correlation_id: u64,
    ) -> Result<(), RouterError> {
        let packet = Packet::reply(self.route(ty), correlation_id, command, payload);
        self.transmit(&packet)?;
        trace!(role = self.role.as_str(), id = correlation_id, command = %command, "Reply sent");
        Ok(())
    }

    /// Send a fire-and-forget notification.
    ///
    /// The kind bits of `ty` are forced to `Notification`.
    ///
    /// # Errors
    ///
    /// Returns an encoding or transport error.
    pub fn notify(&self, ty: PacketType, command: &str, payload: &str) -> Result<(), RouterError> {
        let packet = Packet::notification(self.route(ty), command, payload);
        self.transmit(&packet)?;
        trace!(role = self.role.as_str(), command = %command, "Notification sent");
        Ok(())
    }

    /// The timeout in seconds given to the most recent request.
    #[must_use]
    pub fn timeout(&self) -> i64 {
        self.lock_state().timeout_secs()
    }

    /// The correlation id currently awaiting a reply.
    #[must_use]
    pub fn active_request(&self) -> Option<u64> {
        self.lock_state().pending_id()
    }

    /// When the last matching reply arrived.
    #[must_use]
    pub fn last_reply_at(&self) -> Option<Instant> {
        self.lock_state().received_at()
    }

    /// Wait for the reply to the most recent request, until the deadline
    /// set by [`request`](Self::request).
    ///
    /// If that request has already settled its outcome is returned at once.
    /// Returns [`ReplyOutcome::Cancelled`] if no request was ever made.
    pub async fn wait_for_reply(&self) -> ReplyOutcome {
        let ticket = self.lock_state().ticket();
        match ticket {
            Some(ticket) => {
                let deadline = ticket.deadline;
                self.wait_on(ticket, deadline).await
            }
            None => ReplyOutcome::Cancelled,
        }
    }

    /// Wait for the reply with a timeout measured from now, overriding the
    /// one given to [`request`](Self::request). `timeout_secs <= 0` waits
    /// indefinitely.
    pub async fn wait_for_reply_within(&self, timeout_secs: i64) -> ReplyOutcome {
        let ticket = self.lock_state().ticket();
        match ticket {
            Some(ticket) => {
                self.wait_on(ticket, deadline_after(Instant::now(), timeout_secs))
                    .await
            }
            None => ReplyOutcome::Cancelled,
        }
    }

    /// Stop waiting for the pending request. Blocked waiters resume with
    /// [`ReplyOutcome::Cancelled`]. No-op when nothing is pending.
    pub fn cancel_request(&self) {
        if let Some(id) = self.settle_cancelled() {
            debug!(role = self.role.as_str(), id, "Request cancelled");
        }
    }

    /// Like [`cancel_request`](Self::cancel_request), for when the
    /// connection is lost.
    pub fn abort_request(&self) {
        if let Some(id) = self.settle_cancelled() {
            warn!(role = self.role.as_str(), id, "Request aborted");
        }
    }

    /// Classify one inbound frame and route it.
    ///
    /// - the awaited reply settles the pending request;
    /// - any other reply is dropped;
    /// - requests and notifications are forwarded as
    ///   [`RouterEvent::MessageReady`];
    /// - undecodable bytes are forwarded as [`RouterEvent::UnknownPacket`].
    pub fn handle_packet(&self, raw: Bytes) {
        let packet = match codec::decode(&raw) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(role = self.role.as_str(), error = %e, bytes = raw.len(), "Unknown packet");
                self.emit(RouterEvent::UnknownPacket(raw));
                return;
            }
        };

        match (packet.kind(), packet.correlation_id) {
            (Some(Kind::Reply), Some(id)) => self.handle_reply(id, packet.payload),
            _ => {
                trace!(
                    role = self.role.as_str(),
                    ty = %packet.type_mask,
                    command = %packet.command,
                    "Forwarding packet"
                );
                self.emit(RouterEvent::MessageReady(raw));
            }
        }
    }

    /// Feed inbound connection events into the router until the connection
    /// closes, then abort any pending request.
    pub async fn run(&self, mut inbound: Inbound) {
        while let Some(event) = inbound.recv().await {
            match event {
                ConnectionEvent::Data(raw) => self.handle_packet(raw),
                ConnectionEvent::Closed => break,
            }
        }
        debug!(role = self.role.as_str(), "Connection closed");
        self.abort_request();
    }

    fn handle_reply(&self, id: u64, payload: String) {
        let resolved = self.lock_state().resolve(id, payload, Instant::now());
        if resolved {
            debug!(role = self.role.as_str(), id, "Reply received");
            self.emit(RouterEvent::ReplyReady { id });
        } else {
            debug!(role = self.role.as_str(), id, "Dropped unmatched reply");
        }
    }

    async fn wait_on(&self, mut ticket: Ticket, deadline: Option<Instant>) -> ReplyOutcome {
        let Some(deadline) = deadline else {
            return ticket.settled().await;
        };

        if let Ok(outcome) = tokio::time::timeout_at(deadline, ticket.settled()).await {
            return outcome;
        }

        // Whoever settles first under the lock wins; a late timer is inert.
        if self.lock_state().expire(ticket.id) {
            debug!(role = self.role.as_str(), id = ticket.id, "Reply timed out");
            return ReplyOutcome::TimedOut;
        }
        ticket.current().unwrap_or(ReplyOutcome::Cancelled)
    }

    fn settle_cancelled(&self) -> Option<u64> {
        self.lock_state().cancel()
    }

    fn route(&self, ty: PacketType) -> PacketType {
        let (origin, destination) = self.role.default_route();
        ty.with_default_route(origin, destination)
    }

    fn transmit(&self, packet: &Packet) -> Result<(), RouterError> {
        let frame = codec::encode(packet)?;
        self.connection().send(frame).map_err(|e| {
            warn!(role = self.role.as_str(), error = %e, command = %packet.command, "Send failed");
            RouterError::from(e)
        })
    }

    fn emit(&self, event: RouterEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn lock_state(&self) -> MutexGuard<'_, CorrelationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.cancel_request();
    }
}
