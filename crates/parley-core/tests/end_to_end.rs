//! Two routers talking over an in-memory connection pair.

use bytes::Bytes;
use parley_core::{ReplyOutcome, Role, Router, RouterEvent, RouterEvents};
use parley_protocol::{codec, Kind, PacketType, Peer};
use parley_transport::{Connection, MemoryConnection};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;

struct Peers {
    client: Arc<Router>,
    client_events: RouterEvents,
    server: Arc<Router>,
    server_events: RouterEvents,
}

fn connect() -> Peers {
    let (a, b) = MemoryConnection::pair();

    let (client, client_events) = Router::new(Role::Initiator, a.connection);
    let (server, server_events) = Router::new(Role::Responder, b.connection);
    let client = Arc::new(client);
    let server = Arc::new(server);

    tokio::spawn({
        let client = client.clone();
        async move { client.run(a.inbound).await }
    });
    tokio::spawn({
        let server = server.clone();
        async move { server.run(b.inbound).await }
    });

    Peers {
        client,
        client_events,
        server,
        server_events,
    }
}

/// Answer every `ping` with `pong` and pass every other forwarded frame on.
fn spawn_ponger(
    router: Arc<Router>,
    mut events: RouterEvents,
    answer: &'static str,
) -> mpsc::UnboundedReceiver<RouterEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let RouterEvent::MessageReady(raw) = &event {
                let packet = codec::decode(raw).unwrap();
                if packet.kind() == Some(Kind::Request) && packet.command == "ping" {
                    let id = packet.correlation_id.unwrap();
                    router
                        .reply(PacketType::REPLY, "pong", answer, id)
                        .unwrap();
                    continue;
                }
            }
            if tx.send(event).is_err() {
                break;
            }
        }
    });
    rx
}

#[tokio::test]
async fn ping_pong_resolves() {
    let peers = connect();
    let _others = spawn_ponger(peers.server.clone(), peers.server_events, r#"{"ok":true}"#);

    peers
        .client
        .request(PacketType::REQUEST, "ping", "{}", 5)
        .unwrap();

    assert_eq!(
        peers.client.wait_for_reply().await,
        ReplyOutcome::Resolved(r#"{"ok":true}"#.to_string())
    );
    assert_eq!(peers.client.active_request(), None);
}

#[tokio::test]
async fn reply_ready_event_follows_resolution() {
    let mut peers = connect();
    let _others = spawn_ponger(peers.server.clone(), peers.server_events, "{}");

    let id = peers
        .client
        .request(PacketType::REQUEST, "ping", "{}", 5)
        .unwrap();

    assert_eq!(
        peers.client_events.recv().await,
        Some(RouterEvent::ReplyReady { id })
    );
    assert!(peers.client.last_reply_at().is_some());
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out() {
    let peers = connect();
    // The server receives the request but never answers.
    let mut server_events = peers.server_events;

    peers
        .client
        .request(PacketType::REQUEST, "ping", "{}", 5)
        .unwrap();

    let start = Instant::now();
    assert_eq!(peers.client.wait_for_reply().await, ReplyOutcome::TimedOut);
    assert!(start.elapsed() >= Duration::from_secs(5));
    assert!(start.elapsed() < Duration::from_secs(5) + Duration::from_millis(100));
    assert_eq!(peers.client.timeout(), 5);

    assert!(matches!(
        server_events.recv().await,
        Some(RouterEvent::MessageReady(_))
    ));
}

#[tokio::test]
async fn notification_reaches_peer_without_gate() {
    let mut peers = connect();

    peers
        .client
        .notify(PacketType::NOTIFICATION, "chat", r#"{"msg":"hi"}"#)
        .unwrap();

    let raw = match peers.server_events.recv().await {
        Some(RouterEvent::MessageReady(raw)) => raw,
        other => panic!("Expected MessageReady, got {:?}", other),
    };
    let packet = codec::decode(&raw).unwrap();
    assert_eq!(
        packet.type_mask,
        PacketType::new(Kind::Notification, Peer::Client, Peer::Server)
    );
    assert_eq!(packet.command, "chat");
    assert_eq!(packet.payload, r#"{"msg":"hi"}"#);
    assert_eq!(packet.correlation_id, None);

    assert_eq!(peers.server.active_request(), None);
    assert_eq!(peers.server.wait_for_reply().await, ReplyOutcome::Cancelled);
}

#[tokio::test]
async fn server_can_request_client() {
    let peers = connect();
    let _others = spawn_ponger(peers.client.clone(), peers.client_events, "\"yes\"");

    let id = peers
        .server
        .request(PacketType::REQUEST, "ping", "{}", 5)
        .unwrap();

    assert_eq!(
        peers.server.wait_for_reply().await,
        ReplyOutcome::Resolved("\"yes\"".to_string())
    );
    assert!(id >= 1);
}

#[tokio::test]
async fn sequential_requests_match_their_own_replies() {
    let peers = connect();
    let _others = spawn_ponger(peers.server.clone(), peers.server_events, "{}");

    let mut last = 0;
    for _ in 0..10 {
        let id = peers
            .client
            .request(PacketType::REQUEST, "ping", "{}", 5)
            .unwrap();
        assert!(id > last);
        last = id;
        assert!(peers.client.wait_for_reply().await.is_resolved());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_waiters_resolve_on_multi_thread_runtime() {
    let mut peers = connect();
    let _others = spawn_ponger(peers.server.clone(), peers.server_events, "\"pong\"");

    for _ in 0..50 {
        let id = peers
            .client
            .request(PacketType::REQUEST, "ping", "{}", 5)
            .unwrap();
        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let client = peers.client.clone();
                tokio::spawn(async move { client.wait_for_reply().await })
            })
            .collect();

        assert_eq!(
            peers.client_events.recv().await,
            Some(RouterEvent::ReplyReady { id })
        );
        for waiter in waiters {
            assert_eq!(
                waiter.await.unwrap(),
                ReplyOutcome::Resolved("\"pong\"".to_string())
            );
        }
    }
}

#[tokio::test]
async fn disconnect_unblocks_waiter() {
    let peers = connect();
    let mut server_events = peers.server_events;

    peers
        .client
        .request(PacketType::REQUEST, "ping", "{}", 0)
        .unwrap();
    assert!(server_events.recv().await.is_some());

    peers.server.connection().close().await.unwrap();

    assert_eq!(peers.client.wait_for_reply().await, ReplyOutcome::Cancelled);
}

#[tokio::test]
async fn garbage_on_the_wire_keeps_connection_open() {
    let mut peers = connect();
    let _others = spawn_ponger(peers.server.clone(), peers.server_events, "{}");

    peers
        .server
        .connection()
        .send(Bytes::from_static(b"not a packet"))
        .unwrap();

    assert_eq!(
        peers.client_events.recv().await,
        Some(RouterEvent::UnknownPacket(Bytes::from_static(b"not a packet")))
    );

    peers
        .client
        .request(PacketType::REQUEST, "ping", "{}", 5)
        .unwrap();
    assert!(peers.client.wait_for_reply().await.is_resolved());
}

#[tokio::test]
async fn relay_waits_on_first_of_several_peers() {
    let relay_gate = Arc::new(Semaphore::new(0));

    let slow = connect();
    let fast = connect();
    // Only the fast peer answers.
    let _slow_server_events = slow.server_events;
    let _others = spawn_ponger(fast.server.clone(), fast.server_events, "\"first\"");

    for peer in [&slow.client, &fast.client] {
        peer.set_reply_ready_gate(Some(relay_gate.clone()));
        peer.request(PacketType::REQUEST | PacketType::SRC_RELAY, "ping", "{}", 0)
            .unwrap();
    }

    relay_gate.acquire().await.unwrap().forget();

    assert_eq!(
        fast.client.wait_for_reply().await,
        ReplyOutcome::Resolved("\"first\"".to_string())
    );
    assert!(slow.client.active_request().is_some());

    slow.client.cancel_request();
    relay_gate.acquire().await.unwrap().forget();
    assert_eq!(slow.client.wait_for_reply().await, ReplyOutcome::Cancelled);
}
