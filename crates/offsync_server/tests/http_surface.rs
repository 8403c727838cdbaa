//! End-to-end tests of the `/sync/*` surface through `SyncServer::handle`.

use offsync_core::ManualClock;
use offsync_protocol::{
    BatchResponse, ClientId, ConflictPayload, EntityKey, HttpMethod, HttpRequest, HttpResponse,
    Operation, OperationId, OperationStatus, ResolvedOperation, StrategyName,
};
use offsync_server::{ServerConfig, SyncServer};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const SECRET: &[u8] = b"integration-secret";

struct Harness {
    server: SyncServer,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn open() -> Self {
        Self::with_config(ServerConfig::default().with_open_access())
    }

    fn with_config(config: ServerConfig) -> Self {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let server = SyncServer::with_clock(config, clock.clone());
        Self { server, clock }
    }

    fn send(&self, request: HttpRequest) -> HttpResponse {
        self.server.handle(request)
    }

    fn post(&self, path: &str, body: &Value) -> HttpResponse {
        self.send(HttpRequest::new(HttpMethod::Post, path).with_json(body).unwrap())
    }
}

fn operation(client: ClientId, url: &str, method: &str, body: Value, created_at: u64) -> Value {
    json!({
        "id": OperationId::new(),
        "url": url,
        "method": method,
        "body": body,
        "clientId": client,
        "createdAt": created_at,
    })
}

#[test]
fn missing_or_bad_tokens_are_rejected() {
    let h = Harness::with_config(ServerConfig::default().with_auth(SECRET.to_vec()));
    let body = operation(ClientId::new(), "/entities/1", "PUT", json!({}), 1);

    let request = HttpRequest::new(HttpMethod::Post, "/sync/operations")
        .with_json(&body)
        .unwrap();
    assert_eq!(h.send(request.clone()).status, 401);
    assert_eq!(h.send(request.clone().with_bearer("zz")).status, 401);
    assert_eq!(
        h.send(request.clone().with_header("Authorization", "Basic abc")).status,
        401
    );

    // Expired tokens fail too.
    let token = h.server.mint_token(ClientId::new()).unwrap();
    assert_eq!(h.send(request.clone().with_bearer(&token)).status, 201);
    h.clock.advance(Duration::from_secs(25 * 60 * 60));
    let expired = HttpRequest::new(HttpMethod::Get, "/sync/operations").with_bearer(&token);
    assert_eq!(h.send(expired).status, 401);
}

#[test]
fn missing_url_is_a_bad_request() {
    let h = Harness::open();
    let response = h.post(
        "/sync/operations",
        &json!({"id": OperationId::new(), "method": "POST", "body": {"x": 1}}),
    );
    assert_eq!(response.status, 400);
    assert!(response.json_value().unwrap()["message"]
        .as_str()
        .unwrap()
        .contains("url"));
}

#[test]
fn resubmitting_an_applied_operation_is_harmless() {
    let h = Harness::open();
    let body = operation(ClientId::new(), "/counters/1", "PATCH", json!({"n": 1}), 10);

    assert_eq!(h.post("/sync/operations", &body).status, 201);
    let replay = h.post("/sync/operations", &body);
    assert_eq!(replay.status, 200);
    assert_eq!(replay.parse_json::<Operation>().unwrap().status, OperationStatus::Completed);

    let all: Vec<Operation> = h
        .send(HttpRequest::new(HttpMethod::Get, "/sync/operations"))
        .parse_json()
        .unwrap();
    assert_eq!(all.len(), 1);
}

#[test]
fn replay_after_purge_is_not_applied_again() {
    let h = Harness::open();
    let stale = operation(ClientId::new(), "/entities/7", "PATCH", json!({"name": "A"}), 990_000);
    assert_eq!(h.post("/sync/operations", &stale).status, 201);

    h.clock.advance(Duration::from_secs(30));
    let newer = operation(ClientId::new(), "/entities/7", "PATCH", json!({"name": "B"}), 1_020_000);
    assert_eq!(h.post("/sync/operations", &newer).status, 201);

    let purged = h.send(HttpRequest::new(HttpMethod::Delete, "/sync/completed"));
    assert_eq!(purged.json_value(), Some(json!({"purged": 2})));

    // The first client never saw its 201 and sends the edit again.
    let replay = h.post("/sync/operations", &stale);
    assert_eq!(replay.status, 200);
    let record: Operation = replay.parse_json().unwrap();
    assert_eq!(record.status, OperationStatus::Completed);
    assert_eq!(record.response_status, Some(201));

    let entity = h.server.store().entity_state(&EntityKey::new("entities", "7"));
    assert_eq!(entity, Some(json!({"name": "B"})));
    assert!(h.server.store().is_empty());
}

#[test]
fn default_server_requires_tokens() {
    let h = Harness::with_config(ServerConfig::default());
    let body = operation(ClientId::new(), "/entities/1", "PUT", json!({}), 1);
    assert_eq!(h.post("/sync/operations", &body).status, 401);
    assert_eq!(h.send(HttpRequest::new(HttpMethod::Get, "/sync/operations")).status, 401);
    assert!(h.server.store().is_empty());
}

#[test]
fn invalid_batch_stores_nothing() {
    let h = Harness::open();
    let client = ClientId::new();
    let good = operation(client, "/notes/1", "PUT", json!({"t": "a"}), 1);
    let bad = json!({"id": OperationId::new(), "url": "/notes/2"});

    let rejected = h.post("/sync/batch", &json!({ "operations": [good, bad] }));
    assert_eq!(rejected.status, 400);
    let all: Vec<Operation> = h
        .send(HttpRequest::new(HttpMethod::Get, "/sync/operations"))
        .parse_json()
        .unwrap();
    assert!(all.is_empty());

    let accepted = h.post("/sync/batch", &json!({ "operations": [good] }));
    let batch: BatchResponse = accepted.parse_json().unwrap();
    assert_eq!(batch.results[0].http_status, 201);
}

#[test]
fn two_clients_resolve_by_last_write() {
    let h = Harness::open();
    let first = operation(
        ClientId::new(),
        "/entities/42",
        "PATCH",
        json!({"name": "Updated by client 1"}),
        900_000,
    );
    assert_eq!(h.post("/sync/operations", &first).status, 201);

    h.clock.advance(Duration::from_secs(30));
    let second = operation(
        ClientId::new(),
        "/entities/42",
        "PATCH",
        json!({"name": "Updated by client 2"}),
        950_000,
    );
    let conflict = h.post("/sync/operations", &second);
    assert_eq!(conflict.status, 409);
    let payload: ConflictPayload = conflict.parse_json().unwrap();
    assert_eq!(payload.operation_ids().len(), 2);

    let resolved = h.post(
        "/sync/resolve",
        &json!({"strategy": "last-write-wins", "operationId": first["id"]}),
    );
    assert_eq!(resolved.status, 200);
    let resolved: ResolvedOperation = resolved.parse_json().unwrap();
    assert_eq!(resolved.strategy, StrategyName::LastWriteWins);
    assert_eq!(resolved.state, Some(json!({"name": "Updated by client 2"})));

    let loser: Operation = h
        .send(HttpRequest::new(
            HttpMethod::Get,
            format!("/sync/operations/{}", first["id"].as_str().unwrap()),
        ))
        .parse_json()
        .unwrap();
    assert_eq!(loser.status, OperationStatus::Superseded);
    assert_eq!(loser.superseded_by, Some(resolved.winner));

    // A different strategy on the settled conflict is refused.
    let again = h.post(
        "/sync/resolve",
        &json!({"strategy": "manual", "operationId": first["id"], "mergedData": {}}),
    );
    assert_eq!(again.status, 409);
}

#[test]
fn resolve_errors() {
    let h = Harness::open();
    let unknown = h.post(
        "/sync/resolve",
        &json!({"strategy": "last-write-wins", "operationId": OperationId::new()}),
    );
    assert_eq!(unknown.status, 404);

    let manual_without_data = h.post(
        "/sync/resolve",
        &json!({"strategy": "manual", "operationId": OperationId::new()}),
    );
    assert_eq!(manual_without_data.status, 400);
}

#[test]
fn status_burst_never_errors_unexpectedly() {
    let h = Harness::open();
    let statuses: Vec<u16> = (0..20)
        .map(|_| h.send(HttpRequest::new(HttpMethod::Get, "/sync/status")).status)
        .collect();

    assert!(statuses.iter().all(|s| *s == 200 || *s == 429));
    assert!(statuses.contains(&429));
    assert_eq!(statuses.iter().filter(|s| **s == 200).count(), 10);
}

proptest! {
    #[test]
    fn arbitrary_bodies_never_cause_server_errors(body in proptest::collection::vec(any::<u8>(), 0..256)) {
        let h = Harness::open();
        for path in ["/sync/operations", "/sync/batch", "/sync/resolve"] {
            let mut request = HttpRequest::new(HttpMethod::Post, path);
            request.body = body.clone();
            let status = h.send(request).status;
            prop_assert!(status < 500, "{path} returned {status}");
        }
    }
}
