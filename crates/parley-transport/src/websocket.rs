//! WebSocket transport implementation.
//!
//! This module provides a WebSocket-based transport using tokio-tungstenite.
//! Each binary WebSocket message carries exactly one frame.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    accept_async, connect_async,
    tungstenite::{Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::queued::QueuedConnection;
use crate::traits::{Connection, ConnectionEvent, Link, Transport, TransportError};

/// Default maximum message size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// WebSocket transport.
pub struct WebSocketTransport {
    listener: TcpListener,
    config: WebSocketConfig,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(TransportError::Io)?;

        info!("WebSocket transport listening on {}", config.bind_addr);

        Ok(Self { listener, config })
    }

    /// Create a new WebSocket transport with default config.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(WebSocketConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn accept(&self) -> Result<Link, TransportError> {
        let (stream, addr) = self.listener.accept().await.map_err(TransportError::Io)?;

        debug!("Accepted TCP connection from {}", addr);

        let ws_stream = accept_async(stream).await.map_err(|e| {
            error!("WebSocket handshake failed: {}", e);
            TransportError::Handshake(e.to_string())
        })?;

        debug!("WebSocket handshake completed with {}", addr);

        Ok(spawn_link(
            ws_stream,
            Some(addr.to_string()),
            self.config.max_message_size,
        ))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Connect to a WebSocket endpoint as a client.
///
/// # Errors
///
/// Returns an error if the TCP connection or the handshake fails.
pub async fn connect(url: &str) -> Result<Link, TransportError> {
    let (ws_stream, _response) = connect_async(url)
        .await
        .map_err(|e| TransportError::Handshake(e.to_string()))?;

    debug!(url = %url, "WebSocket client connected");

    Ok(spawn_link(
        ws_stream,
        Some(url.to_string()),
        DEFAULT_MAX_MESSAGE_SIZE,
    ))
}

/// Drive a WebSocket stream with a writer and a reader task.
///
/// Must be called from within a tokio runtime.
pub fn spawn_link<S>(
    ws_stream: WebSocketStream<S>,
    remote_addr: Option<String>,
    max_message_size: usize,
) -> Link
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (conn, mut outbound) = QueuedConnection::new(remote_addr);
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (mut sink, mut stream) = ws_stream.split();

    let connection_id = conn.id().clone();
    tokio::spawn(async move {
        while let Some(data) = outbound.next().await {
            if let Err(e) = sink.send(Message::Binary(data.to_vec())).await {
                warn!(connection = %connection_id, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader_conn = conn.clone();
    tokio::spawn(async move {
        let connection_id = reader_conn.id().clone();
        loop {
            let data = match stream.next().await {
                Some(Ok(Message::Binary(data))) => Bytes::from(data),
                // For compatibility, treat text as binary
                Some(Ok(Message::Text(text))) => Bytes::from(text.into_bytes()),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %connection_id, "Received close frame");
                    break;
                }
                Some(Err(WsError::ConnectionClosed)) | None => {
                    debug!(connection = %connection_id, "WebSocket stream ended");
                    break;
                }
                Some(Err(e)) => {
                    warn!(connection = %connection_id, error = %e, "WebSocket error");
                    break;
                }
            };

            if data.len() > max_message_size {
                warn!(
                    connection = %connection_id,
                    "Message too large: {} bytes (max: {})",
                    data.len(),
                    max_message_size
                );
                continue;
            }

            if inbound_tx.send(ConnectionEvent::Data(data)).is_err() {
                break;
            }
        }

        reader_conn.mark_closed();
        let _ = inbound_tx.send(ConnectionEvent::Closed);
    });

    Link {
        connection: std::sync::Arc::new(conn),
        inbound: inbound_rx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.max_message_size, 64 * 1024);
    }

    #[tokio::test]
    async fn test_websocket_loopback() {
        let transport = WebSocketTransport::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();

        let server = tokio::spawn(async move { transport.accept().await.unwrap() });
        let mut client = connect(&format!("ws://{}", addr)).await.unwrap();
        let mut accepted = server.await.unwrap();

        client.connection.send(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(
            accepted.inbound.recv().await,
            Some(ConnectionEvent::Data(Bytes::from_static(b"hello")))
        );

        accepted.connection.close().await.unwrap();
        assert_eq!(client.inbound.recv().await, Some(ConnectionEvent::Closed));
    }
}
