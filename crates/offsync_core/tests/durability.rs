//! On-disk queue behavior across process restarts.

use offsync_core::{CoreError, ManualClock, OperationQueue, QueueConfig, JOURNAL_FILE};
use offsync_protocol::{ClientId, HttpMethod, Operation, OperationPatch, OperationStatus};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use tempfile::tempdir;

fn patch_op(entity: u32, created_at: u64) -> Operation {
    Operation::new(
        ClientId::new(),
        HttpMethod::Patch,
        format!("/entities/{entity}"),
        Some(json!({"name": format!("edit {created_at}")})),
        created_at,
    )
}

#[test]
fn queued_operations_survive_restart() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let ids: Vec<_> = {
        let queue = OperationQueue::open(dir.path(), QueueConfig::default(), clock.clone()).unwrap();
        (0..5)
            .map(|i| queue.enqueue(patch_op(i, u64::from(i))).unwrap())
            .collect()
    };

    let queue = OperationQueue::open(dir.path(), QueueConfig::default(), clock).unwrap();
    let pending: Vec<_> = queue.drainable().into_iter().map(|op| op.id).collect();
    assert_eq!(pending, ids);
}

#[test]
fn directory_is_exclusive() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let _first = OperationQueue::open(dir.path(), QueueConfig::default(), clock.clone()).unwrap();
    let second = OperationQueue::open(dir.path(), QueueConfig::default(), clock);
    assert!(matches!(second, Err(CoreError::Locked)));
}

#[test]
fn torn_tail_after_crash_keeps_earlier_records() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let kept = {
        let queue = OperationQueue::open(dir.path(), QueueConfig::default(), clock.clone()).unwrap();
        queue.enqueue(patch_op(1, 1)).unwrap()
    };

    // Simulate a crash halfway through the next append.
    let mut file = OpenOptions::new()
        .append(true)
        .open(dir.path().join(JOURNAL_FILE))
        .unwrap();
    file.write_all(b"OSYN\x01\x00\x01\xff").unwrap();
    drop(file);

    let queue = OperationQueue::open(dir.path(), QueueConfig::default(), clock).unwrap();
    assert_eq!(queue.list_all().len(), 1);
    assert!(queue.get(&kept).is_some());

    queue.enqueue(patch_op(2, 2)).unwrap();
    assert_eq!(queue.list_all().len(), 2);
}

#[test]
fn conflict_records_are_retained_until_purged() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let queue = OperationQueue::open(
        dir.path(),
        QueueConfig::default().with_retention(std::time::Duration::ZERO),
        clock,
    )
    .unwrap();

    let id = queue.enqueue(patch_op(42, 1)).unwrap();
    queue.claim(&id).unwrap();
    queue
        .update_status(
            &id,
            OperationStatus::Conflict,
            OperationPatch::new().response(409, Some(json!({"conflict": true}))),
        )
        .unwrap();

    assert_eq!(queue.purge_completed().unwrap(), 0);
    queue.purge(&id).unwrap();
    assert!(queue.get(&id).is_none());
}
