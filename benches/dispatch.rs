//! Dispatch benchmark suite.
//!
//! Measures the hot paths of a protocol connection:
//! - Registering and resolving pending calls
//! - Parsing incoming messages
//! - Full request/response round trips over the in-memory transport
//!
//! Run with: cargo bench --bench dispatch
//! Results saved to: target/criterion/

use std::hint::black_box;

use browser_wire::protocol::{BidiEvent, Incoming};
use browser_wire::transport::CallbackRegistry;
use browser_wire::{ChannelTransport, Connection, ConnectionOptions};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::json;
use tokio::runtime::Runtime;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const BATCH_SIZES: &[usize] = &[1, 16, 256];

// ============================================================================
// Benchmark: Callback Registry
// ============================================================================

fn bench_registry(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("registry");

    for &size in BATCH_SIZES {
        group.bench_with_input(BenchmarkId::new("create_resolve", size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let registry = CallbackRegistry::new();
                let calls: Vec<_> = (0..size)
                    .map(|_| registry.create("Bench.call", None, |_| Ok(())))
                    .collect();
                for call in &calls {
                    registry.resolve(call.id(), json!({}));
                }
                for call in calls {
                    black_box(call.await.unwrap());
                }
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Message Parsing
// ============================================================================

fn bench_parse(c: &mut Criterion) {
    let response = json!({"id": 42, "result": {"frameId": "F", "loaderId": "L"}}).to_string();
    let event = json!({
        "method": "Network.requestWillBeSent",
        "params": {"requestId": "R", "request": {"url": "https://a.test/"}},
        "sessionId": "S1"
    })
    .to_string();
    let bidi_params = json!({
        "context": "CTX",
        "navigation": "N1",
        "redirectCount": 0,
        "request": {"request": "R1", "url": "https://a.test/", "method": "GET"}
    });

    let mut group = c.benchmark_group("parse");
    group.bench_function("cdp_response", |b| {
        b.iter(|| {
            let incoming: Incoming = serde_json::from_str(black_box(&response)).unwrap();
            black_box(incoming.into_parts())
        });
    });
    group.bench_function("cdp_event", |b| {
        b.iter(|| {
            let incoming: Incoming = serde_json::from_str(black_box(&event)).unwrap();
            black_box(incoming.into_parts())
        });
    });
    group.bench_function("bidi_event", |b| {
        b.iter(|| {
            black_box(BidiEvent::parse(
                black_box("network.beforeRequestSent"),
                black_box(&bidi_params),
            ))
        });
    });
    group.finish();
}

// ============================================================================
// Benchmark: Round Trip
// ============================================================================

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("round_trip");
    group.sample_size(50);

    group.bench_function("channel", |b| {
        b.to_async(&rt).iter(|| async {
            let (link, mut remote) = ChannelTransport::pair();
            let connection = Connection::new("ws://bench", link, ConnectionOptions::default());

            let call = tokio::spawn({
                let connection = connection.clone();
                async move { connection.send("Bench.echo", json!({"n": 1})).await }
            });
            let request = remote.recv_json().await.unwrap();
            remote.deliver_json(&json!({"id": request["id"], "result": request["params"]}));

            black_box(call.await.unwrap().unwrap());
            connection.dispose();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_registry, bench_parse, bench_round_trip);
criterion_main!(benches);
