use super::*;

// =============================================================================
// wire format
// =============================================================================

#[test]
fn data_session_uses_store_field_names() {
    let session = DataSession { connected: true, image_file_ready: true, ..DataSession::fresh("FLD_000042") };
    let value = serde_json::to_value(&session).unwrap();

    assert_eq!(value["folder_no"], "FLD_000042");
    assert_eq!(value["connected"], true);
    assert_eq!(value["sensor_file"], false);
    assert_eq!(value["image_file"], true);
    assert_eq!(value["audio_file"], false);
    assert_eq!(value["transmission_completed"], false);
}

#[test]
fn partial_data_session_decodes_as_absent_flags() {
    let session: DataSession = serde_json::from_str(r#"{"sensor_file":true}"#).unwrap();
    assert!(session.folder_id.is_empty());
    assert!(session.sensor_file_ready);
    assert_eq!(session.completed_stages(), 1);

    let empty: DataSession = serde_json::from_str("{}").unwrap();
    assert_eq!(empty, DataSession::zeroed());
}

#[test]
fn record_session_uses_request_field() {
    let session = RecordSession::requested("9:00 AM - 5:00 PM", "2024-08-15");
    let value = serde_json::to_value(&session).unwrap();
    assert_eq!(value["status"], "idle");
    assert_eq!(value["request"], true);
    assert_eq!(value["time_range"], "9:00 AM - 5:00 PM");

    let done: RecordSession = serde_json::from_str(r#"{"status":"done"}"#).unwrap();
    assert_eq!(done.status, RecordStatus::Done);
    assert!(!done.requested);
}

#[test]
fn server_record_decodes_client_id() {
    let raw = r#"{"mode":"data","client_id":"client2","data":{"folder_no":"FLD_1"}}"#;
    let record: ServerRecord = serde_json::from_str(raw).unwrap();
    assert_eq!(record.mode, Mode::Data);
    assert_eq!(record.active_client, "client2");
    assert_eq!(record.data.folder_id, "FLD_1");
    assert!(record.record.is_empty());
}

// =============================================================================
// stages
// =============================================================================

#[test]
fn stages_are_counted_independently_of_order() {
    let session = DataSession { audio_file_ready: true, transmission_completed: true, ..DataSession::zeroed() };
    assert_eq!(session.flags(), [false, false, false, true, true]);
    assert_eq!(session.completed_stages(), 2);
}

#[test]
fn registry_counts_clients_across_servers() {
    let mut registry = Registry::default();
    registry.servers.insert(
        "server1".into(),
        RegistryEntry {
            location: "Ridge".into(),
            clients: [("client1".to_string(), String::new()), ("client2".to_string(), "Loft".to_string())].into(),
        },
    );
    registry.servers.insert(
        "server2".into(),
        RegistryEntry { location: "Cave".into(), clients: [("client1".to_string(), String::new())].into() },
    );
    assert_eq!(registry.client_count(), 3);
}

#[test]
fn client_location_falls_back_to_server() {
    let record = ServerRecord {
        location: "North Ridge".into(),
        client_locations: [("client1".to_string(), String::new()), ("client2".to_string(), "Loft".to_string())].into(),
        ..ServerRecord::default()
    };
    assert_eq!(record.location_of("client1"), "North Ridge");
    assert_eq!(record.location_of("client2"), "Loft");
    assert_eq!(record.location_of("client9"), "North Ridge");
}

#[test]
fn only_unavailable_is_retryable() {
    use crate::frame::ErrorCode;

    assert!(StoreError::Unavailable("timeout".into()).retryable());
    assert!(!StoreError::UnknownServer("servers/x".into()).retryable());
    assert_eq!(StoreError::UnknownClient("servers/x/record/y".into()).error_code(), "E_UNKNOWN_CLIENT");
}
