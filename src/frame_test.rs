use super::*;

#[test]
fn request_sets_fields() {
    let frame = Frame::request("data:start", Data::new());
    assert_eq!(frame.syscall, "data:start");
    assert_eq!(frame.status, Status::Request);
    assert!(frame.parent_id.is_none());
    assert!(frame.ts > 0);
}

#[test]
fn reply_inherits_context() {
    let req = Frame::request("record:start", Data::new());
    let done = req.done_with(Data::new());

    assert_eq!(done.parent_id, Some(req.id));
    assert_eq!(done.syscall, "record:start");
    assert_eq!(done.status, Status::Done);
}

#[test]
fn prefix_and_op_extraction() {
    let frame = Frame::request("data:stop", Data::new());
    assert_eq!(frame.prefix(), "data");
    assert_eq!(frame.op(), "stop");

    let frame = Frame::request("noseparator", Data::new());
    assert_eq!(frame.prefix(), "noseparator");
    assert_eq!(frame.op(), "");
}

#[test]
fn inbound_frame_without_data_decodes() {
    let raw = format!(
        r#"{{"id":"{}","parent_id":null,"ts":1,"from":null,"syscall":"dashboard:overview","status":"request"}}"#,
        Uuid::new_v4()
    );
    let frame: Frame = serde_json::from_str(&raw).expect("frame should decode");
    assert!(frame.data.is_empty());
    assert_eq!(frame.prefix(), "dashboard");
}

#[test]
fn status_is_request_done_or_error() {
    for (raw, status) in [("\"request\"", Status::Request), ("\"done\"", Status::Done), ("\"error\"", Status::Error)] {
        assert_eq!(serde_json::from_str::<Status>(raw).unwrap(), status);
    }
    assert!(serde_json::from_str::<Status>("\"item\"").is_err());
    assert!(serde_json::from_str::<Status>("\"cancel\"").is_err());
}

#[test]
fn str_field_reads_strings_only() {
    let frame = Frame::request("data:start", Data::new())
        .with_data("server", "server1")
        .with_data("count", 3);
    assert_eq!(frame.str_field("server"), Some("server1"));
    assert_eq!(frame.str_field("count"), None);
    assert_eq!(frame.str_field("missing"), None);
}

#[test]
fn error_from_typed() {
    #[derive(Debug, thiserror::Error)]
    #[error("server busy")]
    struct Busy;

    impl ErrorCode for Busy {
        fn error_code(&self) -> &'static str {
            "E_SERVER_BUSY"
        }

        fn retryable(&self) -> bool {
            true
        }
    }

    let req = Frame::request("data:start", Data::new());
    let err = req.error_from(&Busy);

    assert_eq!(err.status, Status::Error);
    assert_eq!(err.data.get("code").and_then(|v| v.as_str()), Some("E_SERVER_BUSY"));
    assert_eq!(err.data.get("message").and_then(|v| v.as_str()), Some("server busy"));
    assert_eq!(err.data.get("retryable").and_then(serde_json::Value::as_bool), Some(true));
}
