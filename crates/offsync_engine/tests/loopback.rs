//! Engine against a real `SyncServer` over the in-process loopback link.

use offsync_core::{ManualClock, OperationQueue, QueueConfig};
use offsync_engine::{
    DrainOutcome, HttpTransport, LoopbackClient, LoopbackServer, NetworkConfig, SyncConfig,
    SyncEngine, TriggerConfig,
};
use offsync_protocol::{
    ClientId, EntityKey, HttpMethod, HttpRequest, HttpResponse, OperationStatus,
    ResolutionStrategy, ResolveRequest, ResolvedOperation,
};
use offsync_server::{ServerConfig, SyncServer};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const BASE_URL: &str = "http://localhost:8080";

/// Plugs a shared `SyncServer` into the loopback client.
struct ServerLink(Arc<SyncServer>);

impl LoopbackServer for ServerLink {
    fn handle(&self, request: HttpRequest) -> HttpResponse {
        self.0.handle(request)
    }
}

type Link = HttpTransport<LoopbackClient<ServerLink>>;

struct Device {
    engine: SyncEngine<Link>,
    transport: Arc<Link>,
}

impl Device {
    fn new(server: &Arc<SyncServer>, clock: &Arc<ManualClock>, token: Option<String>) -> Self {
        let queue = Arc::new(
            OperationQueue::in_memory(QueueConfig::default(), clock.clone()).unwrap(),
        );
        let mut transport = HttpTransport::new(BASE_URL, LoopbackClient::new(ServerLink(Arc::clone(server))));
        if let Some(token) = token {
            transport = transport.with_token(token);
        }
        let transport = Arc::new(transport);
        let config = SyncConfig::new(ClientId::new(), BASE_URL)
            .with_network(NetworkConfig::default().with_assume_online(true))
            .with_trigger(TriggerConfig::default().with_sync_on_enqueue(false));
        let engine = SyncEngine::new(config, queue, Arc::clone(&transport)).unwrap();
        Self { engine, transport }
    }

    fn go_offline(&self) {
        self.transport.client().set_online(false);
    }

    fn go_online(&self) {
        self.transport.client().set_online(true);
    }

    fn rename(&self, name: &str) -> offsync_protocol::OperationId {
        self.engine
            .enqueue("/entities/42", HttpMethod::Patch, Some(json!({ "name": name })), None)
            .unwrap()
            .id
    }
}

fn setup() -> (Arc<SyncServer>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(10_000));
    let server = Arc::new(SyncServer::with_clock(
        ServerConfig::default().with_open_access(),
        clock.clone(),
    ));
    (server, clock)
}

fn succeeded(outcome: DrainOutcome) -> usize {
    match outcome {
        DrainOutcome::Completed(summary) => summary.succeeded,
        other => panic!("expected a completed drain, got {other:?}"),
    }
}

#[test]
fn offline_edits_wait_for_the_link() {
    let (server, _) = setup();
    let device = Device::new(&server, &Arc::new(ManualClock::new(10_000)), None);
    device.go_offline();

    let id = device.rename("offline");
    assert_eq!(device.engine.sync_now().unwrap(), DrainOutcome::Offline);
    assert_eq!(device.engine.get_operation(&id).unwrap().status, OperationStatus::Pending);
    assert!(server.store().is_empty());

    device.go_online();
    assert_eq!(succeeded(device.engine.sync_now().unwrap()), 1);
    assert_eq!(
        server.store().entity_state(&EntityKey::new("entities", "42")),
        Some(json!({"name": "offline"}))
    );
}

#[test]
fn concurrent_edits_resolve_to_the_later_write() {
    let (server, clock) = setup();
    let first = Device::new(&server, &clock, None);
    let second = Device::new(&server, &clock, None);
    first.go_offline();
    second.go_offline();

    let first_id = first.rename("Updated by client 1");
    clock.advance(Duration::from_secs(1));
    let second_id = second.rename("Updated by client 2");

    clock.advance(Duration::from_secs(1));
    first.go_online();
    assert_eq!(succeeded(first.engine.sync_now().unwrap()), 1);

    clock.advance(Duration::from_secs(1));
    second.go_online();
    let DrainOutcome::Completed(summary) = second.engine.sync_now().unwrap() else {
        panic!("drain did not run");
    };
    assert_eq!(summary.conflicted, 1);
    let local = second.engine.get_operation(&second_id).unwrap();
    assert_eq!(local.status, OperationStatus::Conflict);
    assert_eq!(local.conflicts_with, vec![first_id]);

    let resolved = second
        .engine
        .resolve_conflict(second_id, &ResolutionStrategy::LastWriteWins)
        .unwrap();
    assert_eq!(resolved.winner, second_id);
    assert_eq!(
        second.engine.get_operation(&second_id).unwrap().status,
        OperationStatus::Completed
    );

    let loser = server.store().get(&first_id).unwrap();
    assert_eq!(loser.status, OperationStatus::Superseded);
    assert_eq!(loser.superseded_by, Some(second_id));
    assert_eq!(
        server.store().entity_state(&EntityKey::new("entities", "42")),
        Some(json!({"name": "Updated by client 2"}))
    );
}

#[test]
fn retried_operation_settled_by_a_merge_becomes_superseded() {
    let (server, clock) = setup();
    let first = Device::new(&server, &clock, None);
    let second = Device::new(&server, &clock, None);
    first.go_offline();
    second.go_offline();

    first.rename("Updated by client 1");
    clock.advance(Duration::from_secs(1));
    let second_id = second.rename("Updated by client 2");

    first.go_online();
    assert_eq!(succeeded(first.engine.sync_now().unwrap()), 1);
    second.go_online();
    second.engine.sync_now().unwrap();
    assert_eq!(
        second.engine.get_operation(&second_id).unwrap().status,
        OperationStatus::Conflict
    );

    // Someone else merges by hand while the second device still holds the
    // conflict locally.
    let merged = json!({"name": "Merged"});
    let request = HttpRequest::new(HttpMethod::Post, "/sync/resolve")
        .with_json(&ResolveRequest::new(
            second_id,
            &ResolutionStrategy::Manual { merged_data: merged.clone() },
        ))
        .unwrap();
    let resolved: ResolvedOperation = server.handle(request).parse_json().unwrap();

    second.engine.retry_operation(&second_id).unwrap();
    let DrainOutcome::Completed(summary) = second.engine.sync_now().unwrap() else {
        panic!("drain did not run");
    };
    assert_eq!(summary.superseded, 1);
    assert_eq!(summary.succeeded, 0);

    let local = second.engine.get_operation(&second_id).unwrap();
    assert_eq!(local.status, OperationStatus::Superseded);
    assert_eq!(local.superseded_by, Some(resolved.winner));
    assert_eq!(
        server.store().entity_state(&EntityKey::new("entities", "42")),
        Some(merged)
    );
}

#[test]
fn malformed_operation_fails_without_retry() {
    let (server, clock) = setup();
    let device = Device::new(&server, &clock, None);

    let id = device
        .engine
        .enqueue("", HttpMethod::Post, Some(json!({"x": 1})), None)
        .unwrap()
        .id;
    let DrainOutcome::Completed(summary) = device.engine.sync_now().unwrap() else {
        panic!("drain did not run");
    };
    assert_eq!(summary.failed, 1);

    let op = device.engine.get_operation(&id).unwrap();
    assert_eq!(op.status, OperationStatus::Failed);
    assert_eq!(op.response_status, Some(400));
    assert_eq!(op.retries, 0);
    assert!(op.error_message.unwrap().contains("url"));
}

#[test]
fn replayed_submission_is_not_applied_twice() {
    let (server, clock) = setup();
    let device = Device::new(&server, &clock, None);
    let id = device.rename("once");
    assert_eq!(succeeded(device.engine.sync_now().unwrap()), 1);

    // A second device replays the same record, as after a lost response.
    let op = device.engine.get_operation(&id).unwrap();
    let replay = HttpRequest::new(HttpMethod::Post, "/sync/operations")
        .with_json(&offsync_protocol::OperationDraft::from(&op))
        .unwrap();
    let response = server.handle(replay);
    assert_eq!(response.status, 200);
    assert_eq!(server.store().len(), 1);
}

#[test]
fn rejected_token_keeps_operations_pending() {
    let clock = Arc::new(ManualClock::new(10_000));
    let server = Arc::new(SyncServer::with_clock(
        ServerConfig::default().with_auth(b"secret".to_vec()),
        clock.clone(),
    ));
    let device = Device::new(&server, &clock, Some("not-a-token".into()));
    let id = device.rename("x");

    assert!(device.engine.sync_now().is_err());
    let op = device.engine.get_operation(&id).unwrap();
    assert_eq!(op.status, OperationStatus::Pending);
    assert_eq!(op.retries, 0);

    let token = server.mint_token(device.engine.config().client_id).unwrap();
    device.transport.set_token(token);
    assert_eq!(succeeded(device.engine.sync_now().unwrap()), 1);
}
