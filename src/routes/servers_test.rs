use super::*;
use crate::state::test_helpers;

#[test]
fn store_errors_map_to_status() {
    assert_eq!(store_error_to_status(StoreError::UnknownServer("x".into())), StatusCode::NOT_FOUND);
    assert_eq!(store_error_to_status(StoreError::UnknownClient("x".into())), StatusCode::NOT_FOUND);
    assert_eq!(store_error_to_status(StoreError::AlreadyExists("x".into())), StatusCode::CONFLICT);
    assert_eq!(store_error_to_status(StoreError::Unavailable("x".into())), StatusCode::SERVICE_UNAVAILABLE);
}

#[test]
fn data_patch_merges_over_current() {
    let current = DataSession { connected: true, ..DataSession::fresh("FLD_000123") };
    let patch: DataPatch = serde_json::from_str(r#"{"sensor_file": true}"#).unwrap();
    let merged = patch.apply(current);

    assert_eq!(merged.folder_id, "FLD_000123");
    assert!(merged.connected);
    assert!(merged.sensor_file_ready);
    assert!(!merged.image_file_ready);
}

#[test]
fn record_patch_merges_over_current() {
    let current = RecordSession::requested("9:00 AM - 5:00 PM", "2024-08-15");
    let patch: RecordPatch = serde_json::from_str(r#"{"status": "done"}"#).unwrap();
    let merged = patch.apply(current);

    assert_eq!(merged.status, RecordStatus::Done);
    assert!(merged.requested);
    assert_eq!(merged.time_range, "9:00 AM - 5:00 PM");
}

#[tokio::test]
async fn unnamed_servers_and_clients_take_next_number() {
    let state = test_helpers::test_app_state().await;

    let (status, Json(server)) = create_server(State(state.clone()), Json(CreateServerBody::default())).await.unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(server.key, "server2");
    assert_eq!(server.name, "Server 2");
    assert_eq!(server.clients.len(), 1);

    let (_, Json(client)) =
        create_client(State(state.clone()), Path("Server 2".into()), Json(CreateClientBody::default())).await.unwrap();
    assert_eq!(client.key, "client2");
    assert_eq!(client.name, "Client 2");
}

#[tokio::test]
async fn client_location_is_stored_on_create() {
    let state = test_helpers::test_app_state().await;
    let body: CreateClientBody = serde_json::from_str(r#"{"location": "Field Station A"}"#).unwrap();

    let (_, Json(client)) = create_client(State(state.clone()), Path("server1".into()), Json(body)).await.unwrap();
    assert_eq!(client.key, "client2");
    assert_eq!(client.location, "Field Station A");

    let Json(servers) = list_servers(State(state)).await.unwrap();
    let listed: Vec<(&str, &str)> =
        servers[0].clients.iter().map(|c| (c.key.as_str(), c.location.as_str())).collect();
    assert_eq!(listed, vec![("client1", ""), ("client2", "Field Station A")]);
}

#[tokio::test]
async fn locations_can_be_edited() {
    let state = test_helpers::test_app_state().await;

    let body = LocationBody { location: "South Ridge".into() };
    let Json(server) = patch_server_location(State(state.clone()), Path("Server 1".into()), Json(body)).await.unwrap();
    assert_eq!(server.location, "South Ridge");

    let body = LocationBody { location: "Cave Mouth".into() };
    let Json(client) =
        patch_client_location(State(state.clone()), Path(("server1".into(), "client1".into())), Json(body))
            .await
            .unwrap();
    assert_eq!(client.location, "Cave Mouth");
    let record = state.store.snapshot("server1").await.unwrap();
    assert_eq!(record.location, "South Ridge");
    assert_eq!(record.location_of("client1"), "Cave Mouth");

    let body = LocationBody { location: "x".into() };
    let status = patch_client_location(State(state.clone()), Path(("server1".into(), "client9".into())), Json(body))
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::NOT_FOUND);

    let body = LocationBody { location: "x".into() };
    let status = patch_server_location(State(state), Path("server7".into()), Json(body)).await.unwrap_err();
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_server_conflicts() {
    let state = test_helpers::test_app_state().await;
    let body = CreateServerBody { name: Some("Server 1".into()), location: String::new() };

    let status = create_server(State(state), Json(body)).await.unwrap_err();
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn busy_server_cannot_be_deleted() {
    let state = test_helpers::test_app_state().await;
    state.store.write_mode("server1", Mode::Record).await.unwrap();

    let status = delete_server(State(state.clone()), Path("server1".into())).await.unwrap_err();
    assert_eq!(status, StatusCode::CONFLICT);

    state.store.write_mode("server1", Mode::Idle).await.unwrap();
    let status = delete_server(State(state.clone()), Path("server1".into())).await.unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(state.store.registry().await.servers.is_empty());
}

#[tokio::test]
async fn agent_patches_reach_the_store() {
    let state = test_helpers::test_app_state().await;

    let patch = DataPatch { connected: Some(true), ..DataPatch::default() };
    let Json(session) = patch_data(State(state.clone()), Path("server1".into()), Json(patch)).await.unwrap();
    assert!(session.connected);
    assert!(state.store.snapshot("server1").await.unwrap().data.connected);

    let patch = RecordPatch { status: Some(RecordStatus::Done), ..RecordPatch::default() };
    let status = patch_record(State(state.clone()), Path(("server1".into(), "client9".into())), Json(patch))
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_reports_live_mode() {
    let state = test_helpers::test_app_state().await;
    state.store.write_mode("server1", Mode::Data).await.unwrap();
    state.store.write_active_client("server1", "client1").await.unwrap();

    let Json(servers) = list_servers(State(state)).await.unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].mode, Mode::Data);
    assert_eq!(servers[0].active_client, "client1");
    assert_eq!(servers[0].location, "North Ridge");
}
