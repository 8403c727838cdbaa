//! Durability of the client queue across storage faults and crashes.

use offsync_core::{ManualClock, OperationQueue, QueueConfig};
use offsync_engine::{
    DrainOutcome, HttpTransport, LoopbackClient, LoopbackServer, NetworkConfig, SyncConfig,
    SyncEngine, SyncError, TriggerConfig,
};
use offsync_protocol::{ClientId, HttpMethod, HttpRequest, HttpResponse, OperationStatus};
use offsync_server::{ServerConfig, SyncServer};
use offsync_storage::InMemoryBackend;
use offsync_testkit::{CrashSwitch, CrashableBackend, FIXTURE_EPOCH};
use serde_json::json;
use std::sync::Arc;

/// Forwards to the server, then kills the client's storage before the
/// response can be recorded.
struct CrashAfterDelivery {
    server: Arc<SyncServer>,
    switch: Option<Arc<CrashSwitch>>,
}

impl LoopbackServer for CrashAfterDelivery {
    fn handle(&self, request: HttpRequest) -> HttpResponse {
        let response = self.server.handle(request);
        if let Some(switch) = &self.switch {
            switch.crash_after(0);
        }
        response
    }
}

type Link = HttpTransport<LoopbackClient<CrashAfterDelivery>>;

fn engine(
    queue: OperationQueue,
    server: &Arc<SyncServer>,
    switch: Option<Arc<CrashSwitch>>,
) -> SyncEngine<Link> {
    let link = CrashAfterDelivery {
        server: Arc::clone(server),
        switch,
    };
    let transport = Arc::new(HttpTransport::new(
        "http://localhost:8080",
        LoopbackClient::new(link),
    ));
    let config = SyncConfig::new(ClientId::new(), "http://localhost:8080")
        .with_network(NetworkConfig::default().with_assume_online(true))
        .with_trigger(TriggerConfig::default().with_sync_on_enqueue(false));
    SyncEngine::new(config, Arc::new(queue), transport).unwrap()
}

#[test]
fn failed_enqueue_is_reported_and_queues_nothing() {
    let clock = Arc::new(ManualClock::new(FIXTURE_EPOCH));
    let server = Arc::new(SyncServer::with_clock(ServerConfig::default().with_open_access(), clock.clone()));
    let journal = InMemoryBackend::new();
    let backend = CrashableBackend::new(Box::new(journal.clone()));
    let switch = backend.switch();
    let queue = OperationQueue::with_backend(Box::new(backend), QueueConfig::default(), clock.clone())
        .unwrap();
    let engine = engine(queue, &server, None);

    switch.crash_after(0);
    let err = engine
        .enqueue("/notes/1", HttpMethod::Put, Some(json!({"t": "lost"})), None)
        .unwrap_err();
    assert!(matches!(err, SyncError::StorageUnavailable(_)), "{err}");
    assert!(engine.get_all_operations().is_empty());
    drop(engine);

    let reopened = OperationQueue::with_backend(Box::new(journal), QueueConfig::default(), clock)
        .unwrap();
    assert!(reopened.list_all().is_empty());
}

#[test]
fn crash_after_delivery_replays_without_double_apply() {
    let clock = Arc::new(ManualClock::new(FIXTURE_EPOCH));
    let server = Arc::new(SyncServer::with_clock(ServerConfig::default().with_open_access(), clock.clone()));
    let journal = InMemoryBackend::new();
    let backend = CrashableBackend::new(Box::new(journal.clone()));
    let switch = backend.switch();
    let queue = OperationQueue::with_backend(Box::new(backend), QueueConfig::default(), clock.clone())
        .unwrap();

    let first = engine(queue, &server, Some(switch));
    let id = first
        .enqueue("/counters/1", HttpMethod::Patch, Some(json!({"n": 1})), None)
        .unwrap()
        .id;
    assert!(matches!(
        first.sync_now(),
        Err(SyncError::StorageUnavailable(_))
    ));
    assert_eq!(server.store().len(), 1);
    drop(first);

    // Restart: the interrupted record comes back as pending.
    let queue = OperationQueue::with_backend(Box::new(journal), QueueConfig::default(), clock)
        .unwrap();
    assert_eq!(queue.get(&id).unwrap().status, OperationStatus::Pending);

    let second = engine(queue, &server, None);
    let DrainOutcome::Completed(summary) = second.sync_now().unwrap() else {
        panic!("drain did not run");
    };
    assert_eq!(summary.succeeded, 1);

    let op = second.get_operation(&id).unwrap();
    assert_eq!(op.status, OperationStatus::Completed);
    assert_eq!(op.response_status, Some(200));
    assert_eq!(server.store().len(), 1);
}
