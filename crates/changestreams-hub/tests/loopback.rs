// Drive the real hub router over a loopback socket with a tungstenite client.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use changestreams_core::config::{AuthConfig, AuthMode, ChangeStreamsConfig};
use changestreams_core::{ChangeEvent, EntityName, Operation};
use changestreams_hub::{app, hub::SubscriptionHub};
use changestreams_listener::{ChangeSink, ListenerStatus};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestHub {
    url: String,
    hub: Arc<SubscriptionHub>,
    _status: watch::Sender<ListenerStatus>,
}

fn config(mode: AuthMode, token: Option<&str>) -> ChangeStreamsConfig {
    let mut config = ChangeStreamsConfig::default();
    config.hub.auth = AuthConfig {
        mode,
        token: token.map(String::from),
    };
    config
}

fn state(config: ChangeStreamsConfig) -> (Arc<app::AppState>, watch::Sender<ListenerStatus>) {
    let (status_tx, status_rx) = watch::channel(ListenerStatus::Listening);
    let hub = Arc::new(SubscriptionHub::new());
    (Arc::new(app::AppState::new(config, hub, status_rx)), status_tx)
}

async fn start(config: ChangeStreamsConfig) -> TestHub {
    let (state, status) = state(config);
    let hub = state.hub.clone();
    let router = app::build_router(state);
    let tcp = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(tcp, router).await.unwrap();
    });
    TestHub {
        url: format!("ws://{}/ws", addr),
        hub,
        _status: status,
    }
}

/// Next JSON frame, skipping heartbeat ticks.
async fn next_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("no ws error");
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(&text).unwrap();
            if value["event"] == "tick" {
                continue;
            }
            return value;
        }
    }
}

async fn send(ws: &mut Client, id: &str, method: &str, params: Value) {
    let frame = json!({ "type": "req", "id": id, "method": method, "params": params });
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn connect_authenticated(url: &str) -> Client {
    let (mut ws, _) = connect_async(url).await.unwrap();
    let challenge = next_json(&mut ws).await;
    assert_eq!(challenge["event"], "connect.challenge");

    send(&mut ws, "c1", "connect", json!({ "auth": { "mode": "none" } })).await;
    let hello = next_json(&mut ws).await;
    assert_eq!(hello["id"], "c1");
    assert_eq!(hello["ok"], true);
    ws
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn hello_lists_every_entity() {
    let hub = start(config(AuthMode::None, None)).await;
    let (mut ws, _) = connect_async(&hub.url).await.unwrap();
    next_json(&mut ws).await;

    send(&mut ws, "c1", "connect", json!({ "auth": { "mode": "none" } })).await;
    let hello = next_json(&mut ws).await;
    let payload = &hello["payload"];
    assert_eq!(payload["protocol"], 1);
    assert_eq!(payload["entities"].as_array().unwrap().len(), EntityName::ALL.len());
}

#[tokio::test]
async fn subscribed_client_receives_change_event() {
    let hub = start(config(AuthMode::None, None)).await;
    let mut ws = connect_authenticated(&hub.url).await;

    send(&mut ws, "s1", "subscribe", json!({ "entityName": "Screens" })).await;
    let ack = next_json(&mut ws).await;
    assert_eq!(ack["ok"], true);
    assert_eq!(ack["payload"]["subscribed"], true);
    assert_eq!(ack["payload"]["changed"], true);

    // an event for another entity must not arrive
    assert_eq!(hub.hub.publish(ChangeEvent::new(EntityName::Notes, Operation::Insert, "1")), 0);
    let delivered = hub
        .hub
        .publish(ChangeEvent::new(EntityName::Screens, Operation::Update, "7"));
    assert_eq!(delivered, 1);

    let event = next_json(&mut ws).await;
    assert_eq!(event["type"], "event");
    assert_eq!(event["event"], "change");
    assert_eq!(event["payload"]["entityName"], "Screens");
    assert_eq!(event["payload"]["operation"], "UPDATE");
    assert_eq!(event["payload"]["entityId"], "7");
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let hub = start(config(AuthMode::None, None)).await;
    let mut ws = connect_authenticated(&hub.url).await;

    send(&mut ws, "s1", "subscribe", json!({ "entityName": "Projects" })).await;
    next_json(&mut ws).await;
    send(&mut ws, "u1", "unsubscribe", json!({ "entityName": "Projects" })).await;
    let ack = next_json(&mut ws).await;
    assert_eq!(ack["payload"]["subscribed"], false);
    assert_eq!(ack["payload"]["changed"], true);

    let delivered = hub
        .hub
        .publish(ChangeEvent::new(EntityName::Projects, Operation::Delete, "3"));
    assert_eq!(delivered, 0);
}

#[tokio::test]
async fn requests_before_connect_are_rejected() {
    let hub = start(config(AuthMode::None, None)).await;
    let (mut ws, _) = connect_async(&hub.url).await.unwrap();
    next_json(&mut ws).await;

    send(&mut ws, "s1", "subscribe", json!({ "entityName": "Screens" })).await;
    let res = next_json(&mut ws).await;
    assert_eq!(res["ok"], false);
    assert_eq!(res["error"]["code"], "PROTOCOL_ERROR");
    assert_eq!(res["error"]["message"], "must authenticate first");
    assert_eq!(hub.hub.connection_count(), 0);
}

#[tokio::test]
async fn wrong_token_fails_auth() {
    let hub = start(config(AuthMode::Token, Some("s3cret"))).await;
    let (mut ws, _) = connect_async(&hub.url).await.unwrap();
    next_json(&mut ws).await;

    send(
        &mut ws,
        "c1",
        "connect",
        json!({ "auth": { "mode": "token", "token": "wrong" } }),
    )
    .await;
    let res = next_json(&mut ws).await;
    assert_eq!(res["ok"], false);
    assert_eq!(res["error"]["code"], "AUTH_FAILED");
    assert_eq!(res["error"]["message"], "invalid token");
}

#[tokio::test]
async fn unknown_entity_is_reported() {
    let hub = start(config(AuthMode::None, None)).await;
    let mut ws = connect_authenticated(&hub.url).await;

    send(&mut ws, "s1", "subscribe", json!({ "entityName": "Invoices" })).await;
    let res = next_json(&mut ws).await;
    assert_eq!(res["ok"], false);
    assert_eq!(res["error"]["code"], "UNKNOWN_ENTITY");
}

#[tokio::test]
async fn closing_the_socket_drops_memberships() {
    let hub = start(config(AuthMode::None, None)).await;
    let mut ws = connect_authenticated(&hub.url).await;
    send(&mut ws, "s1", "subscribe", json!({ "entityName": "Employees" })).await;
    next_json(&mut ws).await;
    assert_eq!(hub.hub.subscriber_count(EntityName::Employees), 1);

    ws.close(None).await.unwrap();
    drop(ws);

    let registry = hub.hub.clone();
    wait_for(|| registry.connection_count() == 0).await;
    assert_eq!(hub.hub.subscriber_count(EntityName::Employees), 0);
}

#[tokio::test]
async fn health_reports_listener_and_groups() {
    let (state, _status) = state(config(AuthMode::None, None));
    let (tx, _rx) = tokio::sync::mpsc::channel(4);
    let conn = changestreams_core::ConnId::new();
    state.hub.register(conn.clone(), tx);
    state.hub.subscribe(&conn, EntityName::Companies).unwrap();

    let response = app::build_router(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 1);
    assert_eq!(health["subscriptions"]["Companies"], 1);
    assert_eq!(health["listener"]["state"], "listening");
}
