//! Tests for the threaded dispatcher host.

use livesync::{
    Connection, EngineConfig, Entity, MemoryConnection, MemoryStore, ModelOptions, Scope,
    SubscriptionManager, SyncError, SyncService,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

struct Order;

fn entity(value: Value) -> Entity {
    value.as_object().cloned().unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn spawn(options: ModelOptions) -> (SyncService, Arc<MemoryStore>) {
    init_tracing();
    let store = Arc::new(MemoryStore::new("id"));
    let mut manager = SubscriptionManager::new(EngineConfig::default());
    manager
        .register::<Order>("Order", "id", store.clone(), options)
        .unwrap();
    (SyncService::spawn(manager).unwrap(), store)
}

fn connect(id: u64) -> (Arc<MemoryConnection>, Arc<dyn Connection>) {
    let connection = Arc::new(MemoryConnection::new(id));
    let shared: Arc<dyn Connection> = connection.clone();
    (connection, shared)
}

#[test]
fn test_service_delivers_store_changes() {
    let (service, store) = spawn(ModelOptions::default());
    let handle = service.handle();
    let (raw, conn) = connect(1);

    handle
        .request(
            conn,
            Scope::anonymous(),
            r#"{"type":"subscribe-entity","requestId":"r1","model":"Order","key":1}"#,
        )
        .unwrap();
    let subscribed = raw.recv_timeout(WAIT).expect("subscribed");
    assert_eq!(subscribed["type"], "subscribed");
    assert_eq!(subscribed["mode"], "snapshot");

    store.insert(entity(json!({"id": 1, "total": 10}))).unwrap();
    let added = raw.recv_timeout(WAIT).expect("entity-added");
    assert_eq!(added["type"], "entity-added");
    assert_eq!(added["entity"]["total"], 10);
    assert_eq!(added["version"]["seq"], 1);

    service.shutdown();
}

#[test]
fn test_service_fires_debounced_evaluation() {
    let (service, store) =
        spawn(ModelOptions::default().with_debounce(Duration::from_millis(20)));
    let handle = service.handle();
    let (raw, conn) = connect(1);

    handle
        .request(
            conn,
            Scope::anonymous(),
            r#"{"type":"subscribe-collection","requestId":"c1","model":"Order"}"#,
        )
        .unwrap();
    raw.recv_timeout(WAIT).expect("subscribed");

    store.insert(entity(json!({"id": 1}))).unwrap();
    store.insert(entity(json!({"id": 2}))).unwrap();

    let first = raw.recv_timeout(WAIT).expect("first added");
    let second = raw.recv_timeout(WAIT).expect("second added");
    assert_eq!(first["entity"]["id"], 1);
    assert_eq!(second["entity"]["id"], 2);

    service.shutdown();
}

#[test]
fn test_connection_closed_tears_down() {
    let (service, _store) = spawn(ModelOptions::default());
    let handle = service.handle();
    let (raw, conn) = connect(7);

    for request_id in ["a", "b"] {
        let text = format!(
            r#"{{"type":"subscribe-collection","requestId":"{}","model":"Order"}}"#,
            request_id
        );
        handle.request(conn.clone(), Scope::anonymous(), text).unwrap();
        raw.recv_timeout(WAIT).expect("subscribed");
    }
    assert_eq!(handle.stats().unwrap().subscriptions, 2);
    assert_eq!(handle.stats().unwrap().connections, 1);

    handle.connection_closed(conn.id()).unwrap();
    let stats = handle.stats().unwrap();
    assert_eq!(stats.subscriptions, 0);
    assert_eq!(stats.connections, 0);

    service.shutdown();
}

#[test]
fn test_shutdown_releases_feeds() {
    let (service, store) = spawn(ModelOptions::default());
    let handle = service.handle();
    assert_eq!(store.watcher_count(), 1);

    service.shutdown();
    assert_eq!(store.watcher_count(), 0);
    assert!(matches!(handle.stats(), Err(SyncError::ServiceStopped)));
}

#[test]
fn test_dispatcher_survives_out_of_range_last_seq() {
    let (service, store) = spawn(ModelOptions::default());
    let handle = service.handle();
    let (raw, conn) = connect(1);

    store.insert(entity(json!({"id": 1, "total": 10}))).unwrap();
    handle
        .request(
            conn,
            Scope::anonymous(),
            r#"{"type":"subscribe-entity","requestId":"r1","model":"Order","key":1,"lastSeq":18446744073709551615}"#,
        )
        .unwrap();

    let subscribed = raw.recv_timeout(WAIT).expect("subscribed");
    assert_eq!(subscribed["type"], "subscribed");
    assert_eq!(handle.stats().unwrap().subscriptions, 1);

    service.shutdown();
}
