//! Property-based test generators using proptest.
//!
//! Provides strategies for generating operations, entity URLs and status
//! sequences that respect the queue's invariants.

use offsync_protocol::{ClientId, HttpMethod, Operation, OperationId, OperationStatus};
use proptest::prelude::*;
use serde_json::{json, Value};

use crate::fixtures::FIXTURE_EPOCH;

/// Strategy for generating client ids.
pub fn client_id_strategy() -> impl Strategy<Value = ClientId> {
    prop::array::uniform16(any::<u8>()).prop_map(ClientId::from_bytes)
}

/// Strategy for generating operation ids.
pub fn operation_id_strategy() -> impl Strategy<Value = OperationId> {
    any::<u128>().prop_map(|n| OperationId::from_uuid(uuid::Uuid::from_u128(n)))
}

/// Strategy for generating replayable HTTP methods.
pub fn method_strategy() -> impl Strategy<Value = HttpMethod> {
    prop_oneof![
        Just(HttpMethod::Post),
        Just(HttpMethod::Put),
        Just(HttpMethod::Patch),
        Just(HttpMethod::Delete),
    ]
}

/// Strategy for generating any operation status.
pub fn status_strategy() -> impl Strategy<Value = OperationStatus> {
    prop::sample::select(OperationStatus::ALL.to_vec())
}

/// Strategy for generating entity URLs over a small key space, so that
/// generated operations collide on entities often.
pub fn entity_url_strategy() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["entities", "notes", "items"]),
        0u32..8,
    )
        .prop_map(|(kind, id)| format!("/{kind}/{id}"))
}

/// Strategy for generating small flat JSON objects.
pub fn json_body_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..5).prop_map(|fields| {
        let map: serde_json::Map<String, Value> =
            fields.into_iter().map(|(k, v)| (k, json!(v))).collect();
        Value::Object(map)
    })
}

/// Strategy for generating pending operations.
pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    (
        client_id_strategy(),
        method_strategy(),
        entity_url_strategy(),
        prop::option::of(json_body_strategy()),
        0u64..86_400_000,
    )
        .prop_map(|(client, method, url, body, offset)| {
            Operation::new(client, method, url, body, FIXTURE_EPOCH + offset)
        })
}

/// Strategy for generating a batch of operations from one client, in
/// creation order.
pub fn client_history_strategy(max_len: usize) -> impl Strategy<Value = Vec<Operation>> {
    (
        client_id_strategy(),
        prop::collection::vec(
            (method_strategy(), entity_url_strategy(), prop::option::of(json_body_strategy())),
            0..max_len,
        ),
    )
        .prop_map(|(client, specs)| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (method, url, body))| {
                    Operation::new(client, method, url, body, FIXTURE_EPOCH + i as u64)
                })
                .collect()
        })
}

/// Strategy for generating status change requests, legal or not.
pub fn status_walk_strategy(max_len: usize) -> impl Strategy<Value = Vec<OperationStatus>> {
    prop::collection::vec(status_strategy(), 0..max_len)
}
