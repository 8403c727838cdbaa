//! Drain triggers raced from several threads.

use offsync_core::{ManualClock, OperationQueue, QueueConfig};
use offsync_engine::{
    DrainOutcome, NetworkConfig, SyncConfig, SyncEngine, SyncResult, SyncTransport,
    TriggerConfig, TriggerState, DEFAULT_SYNC_TAG,
};
use offsync_protocol::{
    ClientId, HttpMethod, HttpResponse, Operation, OperationId, OperationStatus, ResolveRequest,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

/// Counts submissions per operation and how many overlap. The first
/// submission can be held until the test releases it.
#[derive(Default)]
struct CountingTransport {
    counts: Mutex<HashMap<OperationId, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    entered: Mutex<Option<mpsc::Sender<()>>>,
    gate: Mutex<Option<mpsc::Receiver<()>>>,
    delay: Duration,
}

impl CountingTransport {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Holds the first submission; returns (entered, release).
    fn hold_first(&self) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.entered.lock() = Some(entered_tx);
        *self.gate.lock() = Some(release_rx);
        (entered_rx, release_tx)
    }

    fn counts(&self) -> HashMap<OperationId, usize> {
        self.counts.lock().clone()
    }
}

impl SyncTransport for CountingTransport {
    fn submit(&self, op: &Operation) -> SyncResult<HttpResponse> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        *self.counts.lock().entry(op.id).or_insert(0) += 1;

        if let Some(entered) = self.entered.lock().take() {
            let _ = entered.send(());
        }
        let gate = self.gate.lock().take();
        if let Some(release) = gate {
            let _ = release.recv();
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(HttpResponse::empty(201))
    }

    fn resolve(&self, _request: &ResolveRequest) -> SyncResult<HttpResponse> {
        Ok(HttpResponse::empty(404))
    }

    fn status(&self) -> SyncResult<HttpResponse> {
        Ok(HttpResponse::empty(200))
    }

    fn is_reachable(&self) -> bool {
        true
    }
}

fn engine(
    transport: &Arc<CountingTransport>,
    sync_on_enqueue: bool,
) -> Arc<SyncEngine<CountingTransport>> {
    let clock = Arc::new(ManualClock::new(10_000));
    let queue = Arc::new(OperationQueue::in_memory(QueueConfig::default(), clock).unwrap());
    let config = SyncConfig::new(ClientId::new(), "https://api.example.com")
        .with_network(NetworkConfig::default().with_assume_online(true))
        .with_trigger(TriggerConfig::default().with_sync_on_enqueue(sync_on_enqueue));
    Arc::new(SyncEngine::new(config, queue, Arc::clone(transport)).unwrap())
}

fn enqueue(engine: &SyncEngine<CountingTransport>, i: usize) -> OperationId {
    engine
        .enqueue(&format!("/items/{i}"), HttpMethod::Put, Some(json!({"i": i})), None)
        .unwrap()
        .id
}

#[test]
fn triggers_during_a_run_coalesce_into_one_rerun() {
    let transport = Arc::new(CountingTransport::default());
    let engine = engine(&transport, false);
    engine.register_background_sync(DEFAULT_SYNC_TAG);
    let first = enqueue(&engine, 0);

    let (entered, release) = transport.hold_first();
    let runner = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.sync_now())
    };
    entered.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(engine.trigger_state(), TriggerState::Running);

    // Work and triggers arriving while the first pass is blocked.
    let second = enqueue(&engine, 1);
    assert_eq!(engine.sync_now().unwrap(), DrainOutcome::Coalesced);
    assert_eq!(
        engine.handle_background_sync(DEFAULT_SYNC_TAG).unwrap(),
        DrainOutcome::Coalesced
    );
    assert_eq!(engine.tick().unwrap(), DrainOutcome::Skipped);

    release.send(()).unwrap();
    let DrainOutcome::Completed(summary) = runner.join().unwrap().unwrap() else {
        panic!("drain did not run");
    };

    // One rerun picked up the second operation; both were sent once.
    assert_eq!(summary.succeeded, 2);
    let counts = transport.counts();
    assert_eq!(counts.get(&first), Some(&1));
    assert_eq!(counts.get(&second), Some(&1));

    let stats = engine.stats();
    assert_eq!(stats.drains_completed, 1);
    assert_eq!(stats.reruns_coalesced, 2);
    assert_eq!(engine.trigger_state(), TriggerState::Idle);
    assert_eq!(engine.run_scheduled().unwrap(), DrainOutcome::Skipped);
}

#[test]
fn racing_triggers_never_submit_an_operation_twice() {
    let transport = Arc::new(CountingTransport::with_delay(Duration::from_millis(1)));
    let engine = engine(&transport, true);
    let mut expected: Vec<OperationId> = (0..20).map(|i| enqueue(&engine, i)).collect();

    let mut workers = Vec::new();
    for kind in 0..3 {
        let engine = Arc::clone(&engine);
        workers.push(thread::spawn(move || {
            for _ in 0..25 {
                let outcome = match kind {
                    0 => engine.sync_now(),
                    1 => engine.tick(),
                    _ => {
                        engine.register_background_sync(DEFAULT_SYNC_TAG);
                        engine.handle_background_sync(DEFAULT_SYNC_TAG)
                    }
                };
                outcome.unwrap();
            }
            Vec::new()
        }));
    }
    {
        let engine = Arc::clone(&engine);
        workers.push(thread::spawn(move || {
            (20..40)
                .map(|i| {
                    let id = enqueue(&engine, i);
                    thread::sleep(Duration::from_millis(1));
                    id
                })
                .collect::<Vec<_>>()
        }));
    }
    for worker in workers {
        expected.extend(worker.join().unwrap());
    }

    // Sweep up anything enqueued after the last racing drain.
    engine.sync_now().unwrap();

    let counts = transport.counts();
    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(counts.values().all(|n| *n == 1), "duplicate submission: {counts:?}");
    assert_eq!(counts.len(), expected.len());
    for id in &expected {
        assert_eq!(
            engine.get_operation(id).unwrap().status,
            OperationStatus::Completed
        );
    }
    assert_eq!(engine.trigger_state(), TriggerState::Idle);
}
