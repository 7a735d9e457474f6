//! End-to-end round-trip benchmark for Parley.
//!
//! Each client opens a WebSocket to a running server and issues `ping`
//! requests back to back, waiting for every `pong`.

use parley_core::{ReplyOutcome, Role, Router, RouterEvent};
use parley_protocol::{codec, Kind, PacketType};
use parley_transport::websocket;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: i64 = 5;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);

    println!("Parley end-to-end round-trip benchmark");
    println!("Make sure the server is running: cargo run --release --bin parley");
    println!();

    run_roundtrip_benchmark(num_clients).await;
}

async fn run_roundtrip_benchmark(num_clients: usize) {
    println!("{} clients, warmup {}s, measurement {}s", num_clients, WARMUP_SECS, BENCH_SECS);

    let completed = Arc::new(AtomicU64::new(0));
    let timed_out = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();
    for client_id in 0..num_clients {
        let completed = Arc::clone(&completed);
        let timed_out = Arc::clone(&timed_out);
        let barrier = Arc::clone(&barrier);

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(completed, timed_out, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        }));
    }

    barrier.wait().await;
    println!("All {} clients connected", num_clients);

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    completed.store(0, Ordering::SeqCst);
    timed_out.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total = completed.load(Ordering::SeqCst);
    let per_sec = total as f64 / elapsed.as_secs_f64();

    println!();
    println!("Duration:      {:>10.2}s", elapsed.as_secs_f64());
    println!("Round trips:   {:>10}", total);
    println!("Timed out:     {:>10}", timed_out.load(Ordering::SeqCst));
    println!("Throughput:    {:>10.0} req/s", per_sec);
    println!("Per client:    {:>10.0} req/s", per_sec / num_clients as f64);
    if total > 0 {
        let mean = elapsed.as_secs_f64() * num_clients as f64 / total as f64;
        println!("Mean latency:  {:>10.1}us", mean * 1_000_000.0);
    }

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    completed: Arc<AtomicU64>,
    timed_out: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let link = websocket::connect(SERVER_URL).await?;
    let (router, mut events) = Router::new(Role::Initiator, link.connection);
    let router = Arc::new(router);

    tokio::spawn({
        let router = router.clone();
        async move { router.run(link.inbound).await }
    });

    // Answer the server's greeting so it does not count as a timeout.
    tokio::spawn({
        let router = router.clone();
        async move {
            while let Some(event) = events.recv().await {
                let RouterEvent::MessageReady(raw) = event else {
                    continue;
                };
                let Ok(packet) = codec::decode(&raw) else {
                    continue;
                };
                if let (Some(Kind::Request), Some(id)) = (packet.kind(), packet.correlation_id) {
                    let _ = router.reply(PacketType::REPLY, &packet.command, "{}", id);
                }
            }
        }
    });

    barrier.wait().await;

    loop {
        router.request(PacketType::REQUEST, "ping", r#"{"bench":true}"#, REQUEST_TIMEOUT_SECS)?;
        match router.wait_for_reply().await {
            ReplyOutcome::Resolved(_) => {
                completed.fetch_add(1, Ordering::Relaxed);
            }
            ReplyOutcome::TimedOut => {
                timed_out.fetch_add(1, Ordering::Relaxed);
            }
            ReplyOutcome::Cancelled => break,
        }
    }

    Ok(())
}
