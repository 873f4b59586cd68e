use axum::{routing::get, Router};
use changestreams_core::config::ChangeStreamsConfig;
use changestreams_listener::ListenerStatus;
use std::sync::Arc;
use tokio::sync::watch;

use crate::hub::SubscriptionHub;

/// Central shared state: passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ChangeStreamsConfig,
    pub hub: Arc<SubscriptionHub>,
    /// Latest state of the database listener task.
    pub listener_status: watch::Receiver<ListenerStatus>,
}

impl AppState {
    pub fn new(
        config: ChangeStreamsConfig,
        hub: Arc<SubscriptionHub>,
        listener_status: watch::Receiver<ListenerStatus>,
    ) -> Self {
        Self {
            config,
            hub,
            listener_status,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
