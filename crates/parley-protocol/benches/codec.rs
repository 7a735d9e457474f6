//! Codec benchmarks for parley-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use parley_protocol::{codec, Kind, Packet, PacketType, Peer};

fn request_with_payload(len: usize) -> Packet {
    let ty = PacketType::new(Kind::Request, Peer::Client, Peer::Server);
    Packet::request(ty, 42, "play_card", "x".repeat(len))
}

fn bench_encode_small(c: &mut Criterion) {
    let packet = request_with_payload(64);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("small_64B", |b| b.iter(|| codec::encode(black_box(&packet))));
    group.finish();
}

fn bench_decode_small(c: &mut Criterion) {
    let packet = request_with_payload(64);
    let encoded = codec::encode(&packet).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("small_64B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_roundtrip(c: &mut Criterion) {
    let packet = request_with_payload(256);

    c.bench_function("roundtrip_256B", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&packet)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_small,
    bench_decode_small,
    bench_roundtrip
);
criterion_main!(benches);
