use axum::{
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
};
use changestreams_core::{
    config::{HEARTBEAT_INTERVAL_SECS, MAX_PAYLOAD_BYTES, OUTBOUND_QUEUE_CAPACITY},
    ConnId,
};
use changestreams_protocol::{frames::EventFrame, methods::EVENT_TICK};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::ws::{handshake, message, send};

/// WS connection states. Transitions only move forward.
pub enum ConnState {
    AwaitingConnect { _nonce: String },
    Authenticated,
    Closing,
}

/// Upgrades HTTP to WebSocket at GET /ws.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_PAYLOAD_BYTES)
        .on_upgrade(|socket| run_connection(socket, state))
}

/// Per-connection event loop, lives for the entire WS session.
async fn run_connection(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = ConnId::new();
    info!(%conn_id, "new WS connection");

    let (mut tx, mut rx) = socket.split();

    // Handed to the hub on auth; the hub then owns the only sender, so
    // `out_rx` yields `None` once the hub evicts this connection.
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE_CAPACITY);
    let mut pending_sender = Some(out_tx);

    // send challenge and enter AwaitingConnect state
    let nonce = handshake::make_nonce();
    let challenge = match handshake::challenge_event(&nonce) {
        Ok(challenge) => challenge,
        Err(e) => {
            warn!(%conn_id, error = %e, "could not encode challenge");
            let _ = tx.close().await;
            return;
        }
    };
    if send::text(&mut tx, challenge).await.is_err() {
        return;
    }
    let mut conn_state = ConnState::AwaitingConnect { _nonce: nonce };

    let deadline = tokio::time::Instant::now()
        + std::time::Duration::from_millis(state.config.hub.handshake_timeout_ms);
    let mut handshake_timer = Box::pin(tokio::time::sleep_until(deadline));

    // heartbeat tick after auth
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > MAX_PAYLOAD_BYTES {
                            warn!(%conn_id, size = text.len(), "payload too large");
                            break;
                        }
                        conn_state = message::handle(
                            &conn_id, text.as_str(), conn_state, &mut tx, &state,
                        ).await;
                        match conn_state {
                            ConnState::Closing => break,
                            ConnState::Authenticated => {
                                if let Some(sender) = pending_sender.take() {
                                    state.hub.register(conn_id.clone(), sender);
                                }
                            }
                            ConnState::AwaitingConnect { .. } => {}
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(%conn_id, error = %e, "WS read error");
                        break;
                    }
                    _ => {}
                }
            }

            outbound = out_rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if send::text(&mut tx, frame).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        warn!(%conn_id, "evicted by hub, closing");
                        break;
                    }
                }
            }

            _ = tick.tick() => {
                if matches!(conn_state, ConnState::Authenticated) {
                    let ev = EventFrame::new(
                        EVENT_TICK,
                        serde_json::json!({ "ts": chrono::Utc::now().timestamp_millis() }),
                    ).with_seq(state.hub.next_seq());
                    if send::json(&mut tx, &ev).await.is_err() {
                        break;
                    }
                }
            }

            // an elapsed Sleep stays ready, so only poll it before auth
            _ = &mut handshake_timer, if matches!(conn_state, ConnState::AwaitingConnect { .. }) => {
                warn!(%conn_id, "handshake timeout");
                break;
            }
        }
    }

    let _ = tx.close().await;
    let memberships = state.hub.disconnect(&conn_id);
    info!(%conn_id, memberships, "WS connection closed");
}
