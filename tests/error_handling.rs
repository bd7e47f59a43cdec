//! Error handling and edge case tests.

use livesync::{
    CollectionQuery, Connection, Entity, EntityKey, EngineConfig, MemoryConnection, MemoryStore,
    Model, ModelOptions, RawChange, Scope, SubscriptionManager, SyncError,
};
use serde_json::{json, Value};
use std::sync::Arc;

struct Order;
struct Invoice;

impl Model for Order {
    const NAME: &'static str = "Order";
    const PRIMARY_KEY: &'static str = "id";
}

fn entity(value: Value) -> Entity {
    value.as_object().cloned().unwrap()
}

fn connect(id: u64) -> (Arc<MemoryConnection>, Arc<dyn Connection>) {
    let connection = Arc::new(MemoryConnection::new(id));
    let shared: Arc<dyn Connection> = connection.clone();
    (connection, shared)
}

fn manager_with(store: Arc<MemoryStore>) -> SubscriptionManager {
    let mut manager = SubscriptionManager::new(EngineConfig::default());
    manager.register_model::<Order>(store).unwrap();
    manager
}

// --- Registration Errors ---

#[test]
fn test_register_same_model_twice_is_noop() {
    let store = Arc::new(MemoryStore::new("id"));
    let mut manager = manager_with(store.clone());

    let added = manager.register_model::<Order>(store.clone()).unwrap();
    assert!(!added);
    assert_eq!(manager.stats().models, 1);
    assert_eq!(store.watcher_count(), 1);
}

#[test]
fn test_register_conflicting_type() {
    let store = Arc::new(MemoryStore::new("id"));
    let mut manager = manager_with(store.clone());

    let result = manager.register::<Invoice>("Order", "id", store, ModelOptions::default());
    match result {
        Err(SyncError::RegistrationConflict { model, .. }) => assert_eq!(model, "Order"),
        other => panic!("expected conflict, got {:?}", other),
    }
}

// --- Subscribe Errors ---

#[test]
fn test_unknown_model_reports_error() {
    let mut manager = manager_with(Arc::new(MemoryStore::new("id")));
    let (raw, conn) = connect(1);

    let descriptor = manager.handle_text(
        &conn,
        Scope::anonymous(),
        r#"{"type":"subscribe-entity","requestId":"r1","model":"Ghost","key":1}"#,
    );

    assert!(descriptor.is_none());
    assert_eq!(manager.subscription_count(), 0);
    let messages = raw.drain();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["type"], "subscription-error");
    assert_eq!(messages[0]["requestId"], "r1");
    assert_eq!(messages[0]["error"], "Unknown model: Ghost");
}

#[test]
fn test_unauthorized_fetch_creates_no_subscription() {
    let store = Arc::new(MemoryStore::new("id").with_authorizer(|scope| !scope.is_anonymous()));
    store.insert(entity(json!({"id": 1}))).unwrap();
    let mut manager = manager_with(store);
    let (raw, conn) = connect(1);

    let denied = manager.subscribe_entity(
        &conn,
        Scope::anonymous(),
        "r1",
        "Order",
        EntityKey::Int(1),
        None,
    );
    assert!(matches!(denied, Err(SyncError::Store(_))));
    assert_eq!(manager.subscription_count(), 0);
    assert!(raw.drain().is_empty());

    let allowed = manager
        .subscribe_entity(
            &conn,
            Scope::new("admin".to_string()),
            "r2",
            "Order",
            EntityKey::Int(1),
            None,
        )
        .unwrap();
    assert_eq!(manager.subscription_count(), 1);
    assert_eq!(allowed.model, "Order");
}

#[test]
fn test_query_failure_on_collection_subscribe() {
    let store = Arc::new(MemoryStore::new("id"));
    let mut manager = manager_with(store);
    let (raw, conn) = connect(1);

    manager.handle_text(
        &conn,
        Scope::anonymous(),
        r#"{"type":"subscribe-collection","requestId":"c1","model":"Order","filter":"total gt 5"}"#,
    );

    let messages = raw.drain();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["type"], "subscription-error");
    assert_eq!(messages[0]["requestId"], "c1");
    assert_eq!(manager.subscription_count(), 0);
}

#[test]
fn test_malformed_request_salvages_request_id() {
    let mut manager = manager_with(Arc::new(MemoryStore::new("id")));
    let (raw, conn) = connect(1);

    manager.handle_text(
        &conn,
        Scope::anonymous(),
        r#"{"type":"subscribe-entity","requestId":"r7","model":"Order"}"#,
    );
    manager.handle_text(&conn, Scope::anonymous(), "{not json");

    let messages = raw.drain();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["requestId"], "r7");
    assert_eq!(messages[1]["requestId"], "");
    assert!(messages[1]["error"]
        .as_str()
        .unwrap()
        .starts_with("Invalid request"));
}

#[test]
fn test_missing_entity_snapshot_is_null() {
    let mut manager = manager_with(Arc::new(MemoryStore::new("id")));
    let (raw, conn) = connect(1);

    manager
        .subscribe_entity(&conn, Scope::anonymous(), "r1", "Order", EntityKey::from("nope"), None)
        .unwrap();

    let messages = raw.drain();
    assert_eq!(messages[0]["mode"], "snapshot");
    assert_eq!(messages[0]["data"], Value::Null);
}

#[test]
fn test_last_seq_beyond_log_falls_back_to_snapshot() {
    let store = Arc::new(MemoryStore::new("id"));
    let mut manager = manager_with(store.clone());
    store.insert(entity(json!({"id": 1, "total": 10}))).unwrap();
    manager.pump();
    let (raw, conn) = connect(1);

    let descriptor = manager.handle_text(
        &conn,
        Scope::anonymous(),
        r#"{"type":"subscribe-entity","requestId":"r1","model":"Order","key":1,"lastSeq":18446744073709551615}"#,
    );
    assert!(descriptor.is_some());

    manager
        .subscribe_entity(&conn, Scope::anonymous(), "r2", "Order", EntityKey::Int(1), Some(livesync::Sequence(2)))
        .unwrap();

    let messages = raw.drain();
    assert_eq!(messages.len(), 2);
    for message in &messages {
        assert_eq!(message["type"], "subscribed");
        assert_eq!(message["mode"], "snapshot");
        assert_eq!(message["data"], json!({"id": 1, "total": 10}));
    }
}

// --- Unsubscribe Edge Cases ---

#[test]
fn test_cannot_unsubscribe_foreign_subscription() {
    let mut manager = manager_with(Arc::new(MemoryStore::new("id")));
    let (_raw_a, conn_a) = connect(1);
    let (_raw_b, conn_b) = connect(2);

    let descriptor = manager
        .subscribe_collection(&conn_a, Scope::anonymous(), "c1", "Order", CollectionQuery::default())
        .unwrap();

    manager.handle_text(
        &conn_b,
        Scope::anonymous(),
        &format!(r#"{{"type":"unsubscribe","subscriptionId":{}}}"#, descriptor.id.0),
    );
    assert!(manager.subscription(descriptor.id).is_some());
}

#[test]
fn test_close_unknown_connection() {
    let mut manager = manager_with(Arc::new(MemoryStore::new("id")));
    assert_eq!(manager.close_connection(livesync::ConnectionId(99)), 0);
}

// --- Dispatch Edge Cases ---

#[test]
fn test_added_entity_without_key_still_versions() {
    let store = Arc::new(MemoryStore::new("id"));
    let mut manager = manager_with(store);
    let (raw, conn) = connect(1);
    manager
        .subscribe_entity(&conn, Scope::anonymous(), "r1", "Order", EntityKey::Int(1), None)
        .unwrap();
    raw.drain();

    manager.dispatch("Order", RawChange::Added(entity(json!({"name": "keyless"}))));

    assert_eq!(manager.current_seq("Order"), Some(livesync::Sequence(1)));
    assert!(raw.drain().is_empty());
}
