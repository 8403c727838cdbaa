//! Benchmark utilities.

use offsync_core::{ManualClock, OperationQueue, QueueConfig};
use offsync_protocol::{ClientId, HttpMethod, Operation};
use rand::Rng;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

/// Start time of benchmark clocks, in Unix millis.
pub const BENCH_EPOCH: u64 = 1_700_000_000_000;

/// A JSON object with `fields` random integer fields.
pub fn random_body(fields: usize) -> Value {
    let mut rng = rand::thread_rng();
    let map: serde_json::Map<String, Value> = (0..fields)
        .map(|i| (format!("field_{i}"), json!(rng.gen::<i64>())))
        .collect();
    Value::Object(map)
}

/// `count` operations from one client over `entities` distinct entities.
pub fn generate_operations(count: usize, entities: usize, fields: usize) -> Vec<Operation> {
    let client = ClientId::new();
    (0..count)
        .map(|i| {
            Operation::new(
                client,
                HttpMethod::Patch,
                format!("/entities/{}", i % entities.max(1)),
                Some(random_body(fields)),
                BENCH_EPOCH + i as u64,
            )
        })
        .collect()
}

/// A queue directory holding `ops`, closed again.
pub fn write_queue_dir(dir: &Path, ops: Vec<Operation>, config: QueueConfig) {
    let clock = Arc::new(ManualClock::new(BENCH_EPOCH));
    let queue = OperationQueue::open(dir, config, clock).unwrap();
    for op in ops {
        queue.enqueue(op).unwrap();
    }
}
