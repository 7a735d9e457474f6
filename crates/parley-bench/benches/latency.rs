//! Latency benchmarks for Parley.
//!
//! These benchmarks focus on the cost of one request/reply round trip.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use parley_core::{Role, Router, RouterEvent};
use parley_protocol::{codec, Kind, Packet, PacketType, Peer};
use parley_transport::{Connection, MemoryConnection};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

/// Benchmark round-trip encode/decode latency.
fn bench_codec_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_roundtrip");

    let ty = PacketType::new(Kind::Request, Peer::Client, Peer::Server);
    let packet = Packet::request(ty, 7, "ping", "x".repeat(256));

    group.bench_function("256B", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&packet)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        });
    });

    group.finish();
}

/// Benchmark request, synthetic reply and wakeup on a single router.
fn bench_request_reply(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_reply");
    let rt = runtime();

    group.bench_function("in_process", |b| {
        b.iter_custom(|iters| {
            let (local, mut remote) = MemoryConnection::pair();
            let (router, _events) = Router::new(Role::Initiator, local.connection);
            let reply_ty = PacketType::new(Kind::Reply, Peer::Server, Peer::Client);

            let start = Instant::now();
            rt.block_on(async {
                for _ in 0..iters {
                    let id = router.request(PacketType::REQUEST, "ping", "{}", 5).unwrap();
                    let _ = remote.inbound.try_recv();
                    let reply = codec::encode(&Packet::reply(reply_ty, id, "pong", "{}")).unwrap();
                    router.handle_packet(reply);
                    black_box(router.wait_for_reply().await);
                }
            });
            start.elapsed()
        });
    });

    group.finish();
}

/// Benchmark a full round trip between two routers with a responder task.
fn bench_peer_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("peer_roundtrip");
    let rt = runtime();

    group.bench_function("memory_pair", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let (client_link, server_link) = MemoryConnection::pair();
                let (client, _client_events) = Router::new(Role::Initiator, client_link.connection);
                let (server, mut server_events) = Router::new(Role::Responder, server_link.connection);
                let client = Arc::new(client);
                let server = Arc::new(server);

                tokio::spawn({
                    let client = client.clone();
                    async move { client.run(client_link.inbound).await }
                });
                tokio::spawn({
                    let server = server.clone();
                    async move { server.run(server_link.inbound).await }
                });
                let responder = tokio::spawn(async move {
                    while let Some(RouterEvent::MessageReady(raw)) = server_events.recv().await {
                        let packet = codec::decode(&raw).unwrap();
                        if let Some(id) = packet.correlation_id {
                            let _ = server.reply(PacketType::REPLY, "pong", &packet.payload, id);
                        }
                    }
                });

                let start = Instant::now();
                for _ in 0..iters {
                    client.request(PacketType::REQUEST, "ping", "{}", 5).unwrap();
                    black_box(client.wait_for_reply().await);
                }
                let elapsed = start.elapsed();

                let _ = client.connection().close().await;
                responder.abort();
                elapsed
            })
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_codec_roundtrip,
    bench_request_reply,
    bench_peer_roundtrip,
);
criterion_main!(benches);
