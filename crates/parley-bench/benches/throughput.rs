//! Throughput benchmarks for Parley.
//!
//! These benchmarks measure how fast a router classifies and sends packets.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use parley_core::{Role, Router};
use parley_protocol::{codec, Kind, Packet, PacketType, Peer};
use parley_transport::MemoryConnection;

/// Benchmark inbound dispatch by packet kind.
fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    let (local, _remote) = MemoryConnection::pair();
    let (router, mut events) = Router::new(Role::Responder, local.connection);

    let request = codec::encode(&Packet::request(
        PacketType::new(Kind::Request, Peer::Client, Peer::Server),
        1,
        "ping",
        "{}",
    ))
    .unwrap();
    group.bench_function("request", |b| {
        b.iter(|| {
            router.handle_packet(black_box(request.clone()));
            let _ = events.try_recv();
        });
    });

    // Nothing is pending, so every reply is dropped.
    let reply = codec::encode(&Packet::reply(
        PacketType::new(Kind::Reply, Peer::Client, Peer::Server),
        99,
        "pong",
        "{}",
    ))
    .unwrap();
    group.bench_function("unmatched_reply", |b| {
        b.iter(|| router.handle_packet(black_box(reply.clone())));
    });

    let garbage = Bytes::from_static(b"\x00\x00\x00\x03abc");
    group.bench_function("unknown", |b| {
        b.iter(|| {
            router.handle_packet(black_box(garbage.clone()));
            let _ = events.try_recv();
        });
    });

    group.finish();
}

/// Benchmark outbound notifications by payload size.
fn bench_notify(c: &mut Criterion) {
    let mut group = c.benchmark_group("notify");

    for size in [64usize, 1024, 65536].iter() {
        let payload = "x".repeat(*size);
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            let (local, mut remote) = MemoryConnection::pair();
            let (router, _events) = Router::new(Role::Initiator, local.connection);

            b.iter(|| {
                router
                    .notify(PacketType::NOTIFICATION, "chat", black_box(&payload))
                    .unwrap();
                let _ = remote.inbound.try_recv();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_dispatch, bench_notify);
criterion_main!(benches);
