use changestreams_core::{ChangeStreamsError, ConnId};
use changestreams_protocol::{
    frames::{InboundFrame, ResFrame},
    handshake::ConnectParams,
    methods::CONNECT,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::ws::connection::ConnState;
use crate::ws::send::{self, WsSink};
use crate::ws::{dispatch, handshake};

/// Process one inbound WS text frame. Returns the new connection state.
pub async fn handle(
    conn_id: &ConnId,
    text: &str,
    state: ConnState,
    tx: &mut WsSink,
    app: &Arc<AppState>,
) -> ConnState {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(%conn_id, error = %e, "malformed frame");
            return state;
        }
    };

    match state {
        ConnState::AwaitingConnect { .. } => handle_auth(conn_id, frame, state, tx, app).await,
        ConnState::Authenticated => handle_method(conn_id, frame, tx, app).await,
        ConnState::Closing => ConnState::Closing,
    }
}

/// Pre-auth: only `connect` method is accepted.
async fn handle_auth(
    conn_id: &ConnId,
    frame: InboundFrame,
    state: ConnState,
    tx: &mut WsSink,
    app: &Arc<AppState>,
) -> ConnState {
    let Some(req) = frame.as_req() else {
        return state;
    };

    if req.method != CONNECT {
        let e = ChangeStreamsError::Protocol("must authenticate first".to_string());
        let _ = send::json(tx, &reject(&req.id, &e)).await;
        return state;
    }

    let params: ConnectParams = match req.params.and_then(|p| serde_json::from_value(p).ok()) {
        Some(p) => p,
        None => {
            let e = ChangeStreamsError::Protocol("invalid connect params".to_string());
            let _ = send::json(tx, &reject(&req.id, &e)).await;
            return ConnState::Closing;
        }
    };

    match handshake::verify_auth(&params, &app.config.hub) {
        Ok(()) => {
            let res = ResFrame::ok(&req.id, handshake::hello_ok_payload());
            if send::json(tx, &res).await.is_err() {
                return ConnState::Closing;
            }
            let client = params
                .client_info
                .and_then(|c| c.name)
                .unwrap_or_else(|| "unknown".to_string());
            info!(%conn_id, %client, "client authenticated");
            ConnState::Authenticated
        }
        Err(e) => {
            warn!(%conn_id, error = %e, "auth failed");
            let _ = send::json(tx, &reject(&req.id, &e)).await;
            ConnState::Closing
        }
    }
}

fn reject(req_id: &str, e: &ChangeStreamsError) -> ResFrame {
    ResFrame::err(req_id, e.code(), &e.detail())
}

/// Post-auth: dispatch method calls to handlers.
async fn handle_method(
    conn_id: &ConnId,
    frame: InboundFrame,
    tx: &mut WsSink,
    app: &Arc<AppState>,
) -> ConnState {
    if let Some(req) = frame.as_req() {
        let res = dispatch::route(conn_id, &req.method, req.params.as_ref(), &req.id, &app.hub);
        if send::json(tx, &res).await.is_err() {
            return ConnState::Closing;
        }
    }
    ConnState::Authenticated
}
