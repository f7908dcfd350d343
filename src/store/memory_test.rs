use std::time::Duration;

use tokio::time::timeout;

use super::*;

async fn store_with_server() -> MemoryStore {
    let store = MemoryStore::new();
    store.create_server("server1", "North Ridge").await.unwrap();
    store
}

async fn next<T: Clone>(sub: &mut Subscription<T>) -> Option<T> {
    timeout(Duration::from_millis(200), sub.changed()).await.expect("subscription should change")
}

async fn assert_quiet<T: Clone + std::fmt::Debug>(sub: &mut Subscription<T>) {
    let result = timeout(Duration::from_millis(50), sub.changed()).await;
    assert!(result.is_err(), "expected no change, got {result:?}");
}

// =============================================================================
// registry
// =============================================================================

#[tokio::test]
async fn create_server_seeds_default_shape() {
    let store = store_with_server().await;
    let record = store.snapshot("server1").await.unwrap();

    assert_eq!(record.mode, Mode::Idle);
    assert!(record.active_client.is_empty());
    assert_eq!(record.location, "North Ridge");
    assert_eq!(record.data, DataSession::zeroed());
    assert_eq!(record.record.get(DEFAULT_CLIENT), Some(&RecordSession::idle()));
}

#[tokio::test]
async fn create_server_twice_fails() {
    let store = store_with_server().await;
    let err = store.create_server("server1", "Elsewhere").await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(_)));
}

#[tokio::test]
async fn registry_subscription_sees_new_clients() {
    let store = store_with_server().await;
    let mut sub = store.subscribe_registry().await;
    assert_eq!(sub.current().client_count(), 1);

    store.create_client("server1", "client2", "").await.unwrap();
    let registry = next(&mut sub).await.unwrap();
    let clients = &registry.servers["server1"].clients;
    assert!(clients.contains_key("client1"));
    assert!(clients.contains_key("client2"));
}

#[tokio::test]
async fn locations_are_set_per_server_and_client() {
    let store = store_with_server().await;
    store.create_client("server1", "client2", "Barn Loft").await.unwrap();
    let mut sub = store.subscribe_registry().await;
    sub.current();

    store.set_server_location("server1", "South Ridge").await.unwrap();
    let registry = next(&mut sub).await.unwrap();
    assert_eq!(registry.servers["server1"].location, "South Ridge");
    assert_eq!(registry.servers["server1"].clients["client2"], "Barn Loft");

    store.set_client_location("server1", "client1", "Cave Mouth").await.unwrap();
    let record = store.snapshot("server1").await.unwrap();
    assert_eq!(record.location_of("client1"), "Cave Mouth");
    assert_eq!(record.location_of("client2"), "Barn Loft");

    store.set_client_location("server1", "client2", "").await.unwrap();
    let record = store.snapshot("server1").await.unwrap();
    assert_eq!(record.location_of("client2"), "South Ridge");

    assert!(matches!(
        store.set_client_location("server1", "client9", "x").await,
        Err(StoreError::UnknownClient(_))
    ));
    assert!(matches!(store.set_server_location("server9", "x").await, Err(StoreError::UnknownServer(_))));
}

#[tokio::test]
async fn delete_client_clears_active_holder() {
    let store = store_with_server().await;
    store.create_client("server1", "client2", "").await.unwrap();
    store.write_mode("server1", Mode::Data).await.unwrap();
    store.write_active_client("server1", "client2").await.unwrap();
    store.write_data_session("server1", &DataSession { connected: true, ..DataSession::fresh("FLD_1") }).await.unwrap();

    store.delete_client("server1", "client2").await.unwrap();

    let record = store.snapshot("server1").await.unwrap();
    assert_eq!(record.mode, Mode::Idle);
    assert!(record.active_client.is_empty());
    assert_eq!(record.data, DataSession::zeroed());
    assert!(!record.record.contains_key("client2"));
}

#[tokio::test]
async fn delete_inactive_client_leaves_holder_alone() {
    let store = store_with_server().await;
    store.create_client("server1", "client2", "").await.unwrap();
    store.write_mode("server1", Mode::Record).await.unwrap();
    store.write_active_client("server1", "client1").await.unwrap();

    store.delete_client("server1", "client2").await.unwrap();

    let record = store.snapshot("server1").await.unwrap();
    assert_eq!(record.mode, Mode::Record);
    assert_eq!(record.active_client, "client1");
}

#[tokio::test]
async fn deleted_client_subscription_sees_removal() {
    let store = store_with_server().await;
    let mut sub = store.subscribe_record_session("server1", "client1").await.unwrap();

    store.delete_client("server1", "client1").await.unwrap();

    assert_eq!(next(&mut sub).await, Some(None));
    assert_eq!(next(&mut sub).await, None);
}

#[tokio::test]
async fn deleted_server_closes_subscriptions() {
    let store = store_with_server().await;
    let mut sub = store.subscribe_mode("server1").await.unwrap();

    store.delete_server("server1").await.unwrap();

    assert_eq!(next(&mut sub).await, None);
    assert!(matches!(store.snapshot("server1").await, Err(StoreError::UnknownServer(_))));
}

// =============================================================================
// writes and subscriptions
// =============================================================================

#[tokio::test]
async fn unknown_targets_are_rejected() {
    let store = store_with_server().await;
    assert!(matches!(store.write_mode("server9", Mode::Data).await, Err(StoreError::UnknownServer(_))));
    assert!(matches!(
        store.write_record_session("server1", "client9", &RecordSession::idle()).await,
        Err(StoreError::UnknownClient(_))
    ));
    assert!(matches!(store.subscribe_record_session("server1", "client9").await, Err(StoreError::UnknownClient(_))));
}

#[tokio::test]
async fn subscribers_see_changes_only() {
    let store = store_with_server().await;
    let mut sub = store.subscribe_mode("server1").await.unwrap();
    assert_eq!(sub.current(), Mode::Idle);

    store.write_mode("server1", Mode::Idle).await.unwrap();
    assert_quiet(&mut sub).await;

    store.write_mode("server1", Mode::Data).await.unwrap();
    assert_eq!(next(&mut sub).await, Some(Mode::Data));
}

#[tokio::test]
async fn subscribers_observe_latest_value() {
    let store = store_with_server().await;
    let mut sub = store.subscribe_data_session("server1").await.unwrap();
    let mut session = DataSession::fresh("FLD_000001");

    store.write_data_session("server1", &session).await.unwrap();
    session.connected = true;
    store.write_data_session("server1", &session).await.unwrap();
    session.sensor_file_ready = true;
    store.write_data_session("server1", &session).await.unwrap();

    // Intermediate values may coalesce; the last one always arrives.
    let seen = next(&mut sub).await.unwrap();
    assert_eq!(seen, session);
}

#[tokio::test]
async fn record_writes_are_per_client() {
    let store = store_with_server().await;
    store.create_client("server1", "client2", "").await.unwrap();
    let mut first = store.subscribe_record_session("server1", "client1").await.unwrap();
    let mut second = store.subscribe_record_session("server1", "client2").await.unwrap();

    let requested = RecordSession::requested("9:00 AM - 5:00 PM", "2024-08-15");
    store.write_record_session("server1", "client2", &requested).await.unwrap();

    assert_eq!(next(&mut second).await, Some(Some(requested)));
    assert_quiet(&mut first).await;
}
