//! Sync server benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use offsync_bench::{generate_operations, BENCH_EPOCH};
use offsync_core::ManualClock;
use offsync_protocol::{HttpMethod, HttpRequest, OperationDraft};
use offsync_server::{ServerConfig, SyncServer};
use std::sync::Arc;

fn submit_request(draft: &OperationDraft) -> HttpRequest {
    HttpRequest::new(HttpMethod::Post, "/sync/operations")
        .with_json(draft)
        .unwrap()
}

/// Benchmark submissions against a store already holding `stored`
/// operations spread over 64 entities, so each submission runs conflict
/// detection against its entity's history.
fn bench_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit");

    for stored in [0, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(stored), stored, |b, &stored| {
            let clock = Arc::new(ManualClock::new(BENCH_EPOCH));
            let server = SyncServer::with_clock(ServerConfig::default().with_open_access(), clock);
            for op in generate_operations(stored, 64, 4) {
                server.handle(submit_request(&OperationDraft::from(&op)));
            }

            b.iter_batched(
                || submit_request(&OperationDraft::from(&generate_operations(1, 1, 4)[0])),
                |request| black_box(server.handle(request)),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark the rate-limited status endpoint.
fn bench_status(c: &mut Criterion) {
    let clock = Arc::new(ManualClock::new(BENCH_EPOCH));
    let server = SyncServer::with_clock(
        ServerConfig::default()
            .with_open_access()
            .with_status_rate(u32::MAX, u32::MAX),
        clock,
    );
    for op in generate_operations(1000, 64, 4) {
        server.handle(submit_request(&OperationDraft::from(&op)));
    }

    c.bench_function("status_1000", |b| {
        b.iter(|| {
            let response = server.handle(HttpRequest::new(HttpMethod::Get, "/sync/status"));
            black_box(response);
        });
    });
}

criterion_group!(benches, bench_submit, bench_status);

criterion_main!(benches);
