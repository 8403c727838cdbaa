//! Journal replay benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use offsync_bench::{generate_operations, write_queue_dir, BENCH_EPOCH};
use offsync_codec::FrameReader;
use offsync_core::{ManualClock, OperationQueue, QueueConfig};
use offsync_storage::{InMemoryBackend, StorageBackend};
use std::sync::Arc;
use tempfile::TempDir;

/// Journal bytes for `count` enqueued operations.
fn journal_image(count: usize) -> Vec<u8> {
    let journal = InMemoryBackend::new();
    let clock = Arc::new(ManualClock::new(BENCH_EPOCH));
    let queue = OperationQueue::with_backend(
        Box::new(journal.clone()),
        QueueConfig::default().with_sync_on_write(false),
        clock,
    )
    .unwrap();
    for op in generate_operations(count, count / 4 + 1, 8) {
        queue.enqueue(op).unwrap();
    }
    journal.data()
}

/// Benchmark opening a queue over an in-memory journal.
fn bench_replay_memory(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_memory");

    for count in [100, 1000, 10000].iter() {
        let image = journal_image(*count);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &image, |b, image| {
            b.iter(|| {
                let backend = InMemoryBackend::with_data(image.clone());
                let queue = OperationQueue::with_backend(
                    Box::new(backend),
                    QueueConfig::default(),
                    Arc::new(ManualClock::new(BENCH_EPOCH)),
                )
                .unwrap();
                black_box(queue.list_all().len());
            });
        });
    }

    group.finish();
}

/// Benchmark opening a queue directory from disk.
fn bench_replay_file(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_file");
    group.sample_size(20);

    for count in [1000, 10000].iter() {
        let temp_dir = TempDir::new().unwrap();
        write_queue_dir(
            temp_dir.path(),
            generate_operations(*count, 64, 8),
            QueueConfig::default().with_sync_on_write(false),
        );

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                let queue = OperationQueue::open(
                    temp_dir.path(),
                    QueueConfig::default(),
                    Arc::new(ManualClock::new(BENCH_EPOCH)),
                )
                .unwrap();
                black_box(queue.list_all().len());
            });
        });
    }

    group.finish();
}

/// Benchmark frame validation alone, without decoding payloads.
fn bench_frame_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_scan");

    for count in [1000, 10000].iter() {
        let image = journal_image(*count);
        group.throughput(Throughput::Bytes(image.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &image, |b, image| {
            b.iter(|| {
                let frames = FrameReader::new(black_box(image)).filter(Result::is_ok).count();
                black_box(frames);
            });
        });
    }

    group.finish();
}

/// Benchmark rewriting a journal of live records.
fn bench_compact(c: &mut Criterion) {
    let mut group = c.benchmark_group("compact");
    group.sample_size(20);

    group.bench_function("1000_live", |b| {
        let image = journal_image(1000);
        b.iter(|| {
            let backend = InMemoryBackend::with_data(image.clone());
            let queue = OperationQueue::with_backend(
                Box::new(backend.clone()),
                QueueConfig::default(),
                Arc::new(ManualClock::new(BENCH_EPOCH)),
            )
            .unwrap();
            let report = queue.compact().unwrap();
            black_box((report, backend.size().unwrap()));
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_replay_memory,
    bench_replay_file,
    bench_frame_scan,
    bench_compact,
);

criterion_main!(benches);
