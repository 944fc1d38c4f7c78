use chrono::{TimeZone, Utc};
use serde_json::json;

use super::*;

// ==================== CollectionDelta Tests ====================

#[test]
fn test_collection_delta_kinds_in_slot_order() {
    let delta = CollectionDelta {
        added: Some(json!({"id": "a"})),
        changed: None,
        removed: Some(json!({"id": "b"})),
    };

    assert_eq!(delta.kinds(), vec![DeltaKind::Added, DeltaKind::Removed]);
    assert!(!delta.is_empty());
    assert!(CollectionDelta::default().is_empty());
}

#[test]
fn test_collection_delta_serializes_only_present_slots() {
    let delta = CollectionDelta::changed(json!({"id": "a", "v": 1}), json!({"id": "a", "v": 2}));
    let value = serde_json::to_value(&delta).unwrap();

    assert_eq!(
        value,
        json!({"changed": {"prev": {"id": "a", "v": 1}, "next": {"id": "a", "v": 2}}})
    );
}

#[test]
fn test_delta_kind_display() {
    assert_eq!(DeltaKind::Added.to_string(), "added");
    assert_eq!(DeltaKind::Changed.to_string(), "changed");
    assert_eq!(DeltaKind::Removed.to_string(), "removed");
}

// ==================== ActionRecord Tests ====================

#[test]
fn test_action_record_keeps_extra_fields() {
    let doc = json!({"id": "x", "state": "added", "action": "reboot", "params": {"delay": 3}});
    let action = ActionRecord::from_document(&doc).expect("valid action");

    assert_eq!(action.id, "x");
    assert!(action.is_pending());
    assert_eq!(action.fields.get("action"), Some(&json!("reboot")));
    assert_eq!(action.fields.get("params"), Some(&json!({"delay": 3})));
}

#[test]
fn test_action_record_requires_string_id() {
    assert!(ActionRecord::from_document(&json!({"state": "added"})).is_none());
    assert!(ActionRecord::from_document(&json!({"id": 7, "state": "added"})).is_none());
    assert!(ActionRecord::from_document(&json!("not an object")).is_none());
}

#[test]
fn test_action_record_other_states_are_not_pending() {
    let done = ActionRecord::from_document(&json!({"id": "x", "state": "done"})).unwrap();
    assert!(!done.is_pending());

    let stateless = ActionRecord::from_document(&json!({"id": "x"})).unwrap();
    assert!(!stateless.is_pending());
}

// ==================== Remote response Tests ====================

#[test]
fn test_service_registration_camel_case() {
    let reg: ServiceRegistration =
        serde_json::from_value(json!({"serviceFound": true, "serviceId": "svc-1"})).unwrap();

    assert!(reg.service_found);
    assert_eq!(reg.info.get("serviceId"), Some(&json!("svc-1")));
}

#[test]
fn test_service_registration_missing_flag_is_false() {
    let reg: ServiceRegistration = serde_json::from_value(json!({})).unwrap();
    assert!(!reg.service_found);
}

#[test]
fn test_server_readiness_parse() {
    let ready: ServerReadiness = serde_json::from_value(json!({"isServerReady": true})).unwrap();
    assert!(ready.is_server_ready);

    let not_ready: ServerReadiness = serde_json::from_value(json!({})).unwrap();
    assert!(!not_ready.is_server_ready);
}

#[test]
fn test_ping_response_parse() {
    let ping: PingResponse =
        serde_json::from_value(json!({"connectionEstablished": true})).unwrap();
    assert!(ping.connection_established);
}

#[test]
fn test_token_digest_wire_shape() {
    let digest = TokenDigest {
        digest: "abc=".to_string(),
        algorithm: "sha-256".to_string(),
    };
    assert_eq!(
        serde_json::to_value(&digest).unwrap(),
        json!({"digest": "abc=", "algorithm": "sha-256"})
    );
}

// ==================== StatusResponse Tests ====================

#[test]
fn test_status_response_up_with_rfc3339_epoch() {
    let status: StatusResponse = serde_json::from_value(
        json!({"value": "up", "upSince": "2024-05-01T10:00:00.000Z"}),
    )
    .unwrap();

    assert!(status.is_up());
    assert_eq!(
        status.up_since(),
        Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
    );
}

#[test]
fn test_status_response_epoch_millis() {
    let status: StatusResponse =
        serde_json::from_value(json!({"value": "up", "upSince": 1_714_557_600_000_i64})).unwrap();

    assert_eq!(
        status.up_since(),
        Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
    );
}

#[test]
fn test_status_response_not_up() {
    let status: StatusResponse = serde_json::from_value(json!({"value": "down"})).unwrap();
    assert!(!status.is_up());
    assert!(status.up_since().is_none());

    let empty: StatusResponse = serde_json::from_value(json!({})).unwrap();
    assert!(!empty.is_up());
}

#[test]
fn test_status_response_garbage_epoch_is_none() {
    let status: StatusResponse =
        serde_json::from_value(json!({"value": "up", "upSince": "yesterday"})).unwrap();
    assert!(status.is_up());
    assert!(status.up_since().is_none());
}

// ==================== SessionPhase Tests ====================

#[test]
fn test_session_phase_default_is_idle() {
    assert_eq!(SessionPhase::default(), SessionPhase::Idle);
}

#[test]
fn test_session_phase_accepts_connect_only_when_down() {
    assert!(SessionPhase::Idle.accepts_connect());
    assert!(SessionPhase::Disconnected.accepts_connect());
    assert!(!SessionPhase::Connecting.accepts_connect());
    assert!(!SessionPhase::Online.accepts_connect());
}

#[test]
fn test_session_phase_display() {
    assert_eq!(SessionPhase::Online.to_string(), "online");
    assert_eq!(SessionPhase::Orchestrating.to_string(), "orchestrating");
}
