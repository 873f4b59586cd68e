use changestreams_core::{
    config::{AuthMode, HubConfig, HEARTBEAT_INTERVAL_SECS, MAX_PAYLOAD_BYTES, PROTOCOL_VERSION},
    ChangeStreamsError, EntityName,
};
use changestreams_protocol::{
    frames::EventFrame,
    handshake::{AuthPayload, ClientPolicy, ConnectChallenge, ConnectParams, HelloOk, ServerInfo},
    methods::EVENT_CONNECT_CHALLENGE,
};
use uuid::Uuid;

/// Random nonce for the connect challenge.
pub fn make_nonce() -> String {
    Uuid::new_v4().to_string().replace('-', "")
}

/// Serialize the `connect.challenge` event that opens every WS session.
pub fn challenge_event(nonce: &str) -> Result<String, ChangeStreamsError> {
    let frame = EventFrame::new(
        EVENT_CONNECT_CHALLENGE,
        ConnectChallenge {
            nonce: nonce.to_string(),
        },
    );
    Ok(serde_json::to_string(&frame)?)
}

/// Verify client auth against hub config.
pub fn verify_auth(params: &ConnectParams, config: &HubConfig) -> Result<(), ChangeStreamsError> {
    match &config.auth.mode {
        AuthMode::None => Ok(()),

        AuthMode::Token => match &params.auth {
            AuthPayload::Token { token } => {
                if Some(token) == config.auth.token.as_ref() {
                    Ok(())
                } else {
                    Err(ChangeStreamsError::AuthFailed("invalid token".to_string()))
                }
            }
            AuthPayload::None => Err(ChangeStreamsError::AuthFailed(
                "expected token auth mode".to_string(),
            )),
        },
    }
}

/// Build the `hello-ok` response payload after successful authentication.
pub fn hello_ok_payload() -> HelloOk {
    HelloOk {
        protocol: PROTOCOL_VERSION,
        server: ServerInfo {
            name: "changestreams-hub".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            node_id: "primary".to_string(),
        },
        entities: EntityName::ALL.to_vec(),
        policy: ClientPolicy {
            max_message_size: MAX_PAYLOAD_BYTES,
            heartbeat_interval_secs: HEARTBEAT_INTERVAL_SECS,
        },
    }
}
