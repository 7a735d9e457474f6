//! Connection handlers for Parley server.
//!
//! Every WebSocket connection gets its own responder [`Router`]. This module
//! wires the socket to the router and acts as the application layer for the
//! frames the router forwards: it answers `ping`, fans `chat` out to the other
//! peers, and greets new clients with a `hello` request.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Router as HttpRouter,
};
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parley_core::{ReplyOutcome, Role, Router, RouterEvent};
use parley_protocol::{codec, Kind, Packet, PacketType};
use parley_transport::{Connection, ConnectionEvent, ConnectionId, Link, QueuedConnection};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Live routers by connection.
    pub peers: DashMap<ConnectionId, Arc<Router>>,
    /// Server configuration.
    pub config: Config,
    admitted: AtomicUsize,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            peers: DashMap::new(),
            config,
            admitted: AtomicUsize::new(0),
        }
    }

    /// Claim one of the `limits.max_connections` slots.
    ///
    /// Returns `None` when every slot is taken. The slot is freed when the
    /// returned guard drops.
    pub fn try_admit(&self) -> Option<Admission<'_>> {
        let limit = self.config.limits.max_connections;
        self.admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |admitted| {
                (admitted < limit).then_some(admitted + 1)
            })
            .ok()
            .map(|_| Admission { state: self })
    }

    /// Connections currently holding a slot.
    #[must_use]
    pub fn admitted(&self) -> usize {
        self.admitted.load(Ordering::Acquire)
    }
}

/// A claimed connection slot. Dropping it frees the slot.
pub struct Admission<'a> {
    state: &'a AppState,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        self.state.admitted.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = HttpRouter::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Parley server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "peers": state.peers.len(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let max_message_size = state.config.limits.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, addr, state))
}

/// Handle a WebSocket connection for its whole lifetime.
async fn handle_websocket(socket: WebSocket, addr: SocketAddr, state: Arc<AppState>) {
    let Some(_admission) = state.try_admit() else {
        warn!(remote = %addr, "Connection limit reached, closing");
        metrics::record_error("connection_limit");
        return;
    };

    let _metrics_guard = ConnectionMetricsGuard::new();

    let Link {
        connection,
        inbound,
    } = link_socket(socket, addr);
    let connection_id = connection.id().clone();
    let (router, mut events) = Router::new(Role::Responder, connection);
    let router = Arc::new(router);
    state.peers.insert(connection_id.clone(), router.clone());

    debug!(connection = %connection_id, remote = %addr, "WebSocket connected");

    let mut io = tokio::spawn({
        let router = router.clone();
        async move { router.run(inbound).await }
    });

    if state.config.router.hello {
        spawn_hello(router.clone(), &connection_id, state.config.router.request_timeout_secs);
    }

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                handle_event(&state, &connection_id, &router, event);
            }
            _ = &mut io => break,
        }
    }

    // Deliver whatever the router forwarded before the connection closed.
    while let Ok(event) = events.try_recv() {
        handle_event(&state, &connection_id, &router, event);
    }

    state.peers.remove(&connection_id);
    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Bridge an axum WebSocket to a queued connection and inbound events.
fn link_socket(socket: WebSocket, addr: SocketAddr) -> Link {
    let (conn, mut outbound) = QueuedConnection::new(Some(addr.to_string()));
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (mut sender, mut receiver) = socket.split();

    let connection_id = conn.id().clone();
    tokio::spawn(async move {
        while let Some(data) = outbound.next().await {
            metrics::record_bytes(data.len(), "outbound");
            if let Err(e) = sender.send(Message::Binary(data.to_vec())).await {
                warn!(connection = %connection_id, error = %e, "WebSocket send failed");
                metrics::record_error("websocket");
                break;
            }
        }
        let _ = sender.close().await;
    });

    let reader_conn = conn.clone();
    tokio::spawn(async move {
        let connection_id = reader_conn.id().clone();
        loop {
            let data = match receiver.next().await {
                Some(Ok(Message::Binary(data))) => Bytes::from(data),
                // Treat text as binary
                Some(Ok(Message::Text(text))) => Bytes::from(text.into_bytes()),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %connection_id, "Received close frame");
                    break;
                }
                Some(Err(e)) => {
                    warn!(connection = %connection_id, error = %e, "WebSocket error");
                    metrics::record_error("websocket");
                    break;
                }
                None => {
                    debug!(connection = %connection_id, "WebSocket stream ended");
                    break;
                }
            };

            metrics::record_bytes(data.len(), "inbound");
            if inbound_tx.send(ConnectionEvent::Data(data)).is_err() {
                break;
            }
        }

        reader_conn.mark_closed();
        let _ = inbound_tx.send(ConnectionEvent::Closed);
    });

    Link {
        connection: Arc::new(conn),
        inbound: inbound_rx,
    }
}

/// Ask a new client to introduce itself and log the answer.
fn spawn_hello(router: Arc<Router>, connection_id: &ConnectionId, timeout_secs: i64) {
    let payload = serde_json::json!({ "connection": connection_id.as_str() }).to_string();
    let connection_id = connection_id.clone();

    tokio::spawn(async move {
        if let Err(e) = router.request(PacketType::REQUEST, "hello", &payload, timeout_secs) {
            warn!(connection = %connection_id, error = %e, "Failed to send hello");
            metrics::record_error("request");
            return;
        }
        metrics::record_packet("request", "outbound");

        let outcome = router.wait_for_reply().await;
        metrics::record_request_outcome(&outcome);
        match outcome {
            ReplyOutcome::Resolved(reply) => {
                info!(connection = %connection_id, reply = %reply, "Client said hello");
            }
            ReplyOutcome::TimedOut => {
                warn!(connection = %connection_id, timeout_secs, "Client did not answer hello");
            }
            ReplyOutcome::Cancelled => {
                debug!(connection = %connection_id, "Hello cancelled");
            }
        }
    });
}

/// Act on one event emitted by a peer's router.
fn handle_event(state: &AppState, connection_id: &ConnectionId, router: &Router, event: RouterEvent) {
    match event {
        RouterEvent::MessageReady(raw) => {
            // The router only forwards frames that already decoded.
            let packet = match codec::decode(&raw) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!(connection = %connection_id, error = %e, "Forwarded frame did not decode");
                    metrics::record_error("decode");
                    return;
                }
            };
            handle_packet(state, connection_id, router, packet);
        }
        RouterEvent::UnknownPacket(raw) => {
            warn!(connection = %connection_id, bytes = raw.len(), "Unknown packet");
            metrics::record_unknown_packet();
        }
        RouterEvent::ReplyReady { id } => {
            debug!(connection = %connection_id, id, "Reply ready");
            metrics::record_packet("reply", "inbound");
        }
    }
}

/// Handle a decoded request or notification.
fn handle_packet(state: &AppState, connection_id: &ConnectionId, router: &Router, packet: Packet) {
    match (packet.kind(), packet.correlation_id) {
        (Some(Kind::Request), Some(id)) => {
            metrics::record_packet("request", "inbound");
            let (command, reply) = match packet.command.as_str() {
                "ping" => ("pong", packet.payload.clone()),
                other => {
                    debug!(connection = %connection_id, command = %other, "Unknown command");
                    (
                        "error",
                        serde_json::json!({ "error": "unknown command", "command": other })
                            .to_string(),
                    )
                }
            };

            match router.reply(PacketType::REPLY, command, &reply, id) {
                Ok(()) => metrics::record_reply(),
                Err(e) => {
                    warn!(connection = %connection_id, error = %e, "Reply failed");
                    metrics::record_error("reply");
                }
            }
        }
        (Some(Kind::Notification), _) => {
            metrics::record_packet("notification", "inbound");
            if packet.command == "chat" {
                let recipients = broadcast_chat(state, connection_id, &packet.payload);
                debug!(connection = %connection_id, recipients, "Chat relayed");
            } else {
                debug!(connection = %connection_id, command = %packet.command, "Ignored notification");
            }
        }
        _ => {
            warn!(connection = %connection_id, ty = %packet.type_mask, "Unexpected packet");
        }
    }
}

/// Send a chat notification to every peer except the sender.
///
/// Returns the number of peers it was delivered to.
fn broadcast_chat(state: &AppState, from: &ConnectionId, payload: &str) -> usize {
    let targets: Vec<Arc<Router>> = state
        .peers
        .iter()
        .filter(|entry| entry.key() != from)
        .map(|entry| entry.value().clone())
        .collect();

    targets
        .iter()
        .filter(|peer| match peer.notify(PacketType::NOTIFICATION, "chat", payload) {
            Ok(()) => {
                metrics::record_packet("notification", "outbound");
                true
            }
            Err(e) => {
                debug!(error = %e, "Chat delivery failed");
                false
            }
        })
        .count()
}
