use axum::{extract::State, Json};
use changestreams_core::EntityName;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe, returns hub and listener state.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let subscriptions: Map<String, Value> = EntityName::ALL
        .into_iter()
        .map(|entity| {
            (
                entity.as_str().to_string(),
                json!(state.hub.subscriber_count(entity)),
            )
        })
        .collect();
    let listener = state.listener_status.borrow().clone();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "git_sha": env!("CHANGESTREAMS_GIT_SHA"),
        "protocol": changestreams_core::config::PROTOCOL_VERSION,
        "connections": state.hub.connection_count(),
        "subscriptions": subscriptions,
        "listener": listener,
    }))
}
