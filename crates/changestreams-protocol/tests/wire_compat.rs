// Verify the wire format hub and client exchange.
// These tests ensure protocol compatibility is never broken.

use changestreams_core::{ChangeEvent, EntityName, Operation};
use changestreams_protocol::frames::{EventFrame, InboundFrame, ReqFrame, ResFrame};
use changestreams_protocol::handshake::{AuthPayload, ConnectParams, HelloOk};
use changestreams_protocol::methods::{SubscriptionAck, SubscriptionParams, EVENT_CHANGE, SUBSCRIBE};

#[test]
fn subscribe_req_round_trip() {
    let req = ReqFrame::new(
        "sub-1",
        SUBSCRIBE,
        Some(serde_json::to_value(SubscriptionParams::new(EntityName::Projects)).unwrap()),
    );
    let json = serde_json::to_string(&req).unwrap();
    assert!(json.contains(r#""entityName":"Projects""#));

    let frame: InboundFrame = serde_json::from_str(&json).unwrap();
    let parsed = frame.as_req().unwrap();
    assert_eq!(parsed.method, "subscribe");
    assert_eq!(parsed.id, "sub-1");
}

#[test]
fn res_ok_serialization() {
    let ack = SubscriptionAck {
        entity_name: EntityName::Notes,
        subscribed: true,
        changed: true,
    };
    let res = ResFrame::ok("req-1", ack);
    let json = serde_json::to_string(&res).unwrap();

    assert!(json.contains(r#""type":"res""#));
    assert!(json.contains(r#""ok":true"#));
    assert!(json.contains(r#""entityName":"Notes""#));
    // error field must be absent on success
    assert!(!json.contains(r#""error""#));
}

#[test]
fn res_err_serialization() {
    let res = ResFrame::err("req-2", "UNKNOWN_ENTITY", "unknown entity: Invoices");
    let json = serde_json::to_string(&res).unwrap();

    assert!(json.contains(r#""ok":false"#));
    assert!(json.contains(r#""UNKNOWN_ENTITY""#));
    // payload must be absent on error
    assert!(!json.contains(r#""payload""#));
}

#[test]
fn change_event_frame_carries_trigger_payload() {
    let event = ChangeEvent {
        entity_name: EntityName::Screens,
        operation: Operation::Update,
        entity_id: "7".to_string(),
        changed_at: "2025-05-13T10:15:30Z".parse::<chrono::DateTime<chrono::Utc>>().unwrap(),
    };
    let ev = EventFrame::new(EVENT_CHANGE, &event).with_seq(42);
    let json = serde_json::to_string(&ev).unwrap();

    assert!(json.contains(r#""type":"event""#));
    assert!(json.contains(r#""event":"change""#));
    assert!(json.contains(r#""seq":42"#));
    assert!(json.contains(r#""operation":"UPDATE""#));
    assert!(json.contains(r#""entityId":"7""#));

    let frame: InboundFrame = serde_json::from_str(&json).unwrap();
    let parsed = frame.as_event().unwrap();
    let back: ChangeEvent = serde_json::from_value(parsed.payload.unwrap()).unwrap();
    assert_eq!(back, event);
}

#[test]
fn connect_params_token_auth() {
    let json = r#"{"auth":{"mode":"token","token":"secret-123"}}"#;
    let params: ConnectParams = serde_json::from_str(json).unwrap();

    match params.auth {
        AuthPayload::Token { ref token } => assert_eq!(token, "secret-123"),
        _ => panic!("expected token auth"),
    }
}

#[test]
fn connect_params_none_auth() {
    let json = r#"{"auth":{"mode":"none"}}"#;
    let params: ConnectParams = serde_json::from_str(json).unwrap();

    assert!(matches!(params.auth, AuthPayload::None));
}

#[test]
fn hello_ok_lists_entities() {
    let hello = HelloOk {
        protocol: 1,
        server: changestreams_protocol::handshake::ServerInfo {
            name: "changestreams-hub".into(),
            version: "0.1.0".into(),
            node_id: "test".into(),
        },
        entities: EntityName::ALL.to_vec(),
        policy: Default::default(),
    };
    let json = serde_json::to_string(&hello).unwrap();
    assert!(json.contains(r#""protocol":1"#));
    assert!(json.contains(r#""ScreenActions""#));
}

#[test]
fn inbound_frame_discriminates_types() {
    let json = r#"{"type":"event","event":"tick","payload":{}}"#;
    let frame: InboundFrame = serde_json::from_str(json).unwrap();
    assert!(frame.as_req().is_none(), "event frame must not parse as req");
    assert!(frame.as_res().is_none(), "event frame must not parse as res");
    assert_eq!(frame.as_event().unwrap().event, "tick");
}
