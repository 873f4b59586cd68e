use changestreams_core::{ChangeStreamsError, ConnId, EntityName};
use changestreams_protocol::{
    frames::ResFrame,
    methods::{SubscriptionAck, SubscriptionParams, PING, SUBSCRIBE, UNSUBSCRIBE},
};
use tracing::warn;

use crate::hub::SubscriptionHub;

/// Route an authenticated WS method call to its handler.
pub fn route(
    conn_id: &ConnId,
    method: &str,
    params: Option<&serde_json::Value>,
    req_id: &str,
    hub: &SubscriptionHub,
) -> ResFrame {
    let result = match method {
        PING => return ResFrame::ok(req_id, serde_json::json!({ "pong": true })),
        SUBSCRIBE => handle_subscribe(conn_id, params, hub),
        UNSUBSCRIBE => handle_unsubscribe(conn_id, params, hub),
        _ => Err(ChangeStreamsError::MethodNotFound {
            method: method.to_string(),
        }),
    };

    match result {
        Ok(ack) => ResFrame::ok(req_id, ack),
        Err(e) => {
            warn!(%conn_id, method, error = %e, "request rejected");
            ResFrame::err(req_id, e.code(), &e.to_string())
        }
    }
}

/// Handler for `subscribe`.
///
/// Params: `{ "entityName": string }`. Subscribing twice is not an error;
/// the ack reports `changed: false`.
fn handle_subscribe(
    conn_id: &ConnId,
    params: Option<&serde_json::Value>,
    hub: &SubscriptionHub,
) -> Result<SubscriptionAck, ChangeStreamsError> {
    let entity = parse_entity(params)?;
    let changed = hub.subscribe(conn_id, entity)?;
    Ok(SubscriptionAck {
        entity_name: entity,
        subscribed: true,
        changed,
    })
}

/// Handler for `unsubscribe`. A no-op when not subscribed.
fn handle_unsubscribe(
    conn_id: &ConnId,
    params: Option<&serde_json::Value>,
    hub: &SubscriptionHub,
) -> Result<SubscriptionAck, ChangeStreamsError> {
    let entity = parse_entity(params)?;
    let changed = hub.unsubscribe(conn_id, entity);
    Ok(SubscriptionAck {
        entity_name: entity,
        subscribed: false,
        changed,
    })
}

fn parse_entity(params: Option<&serde_json::Value>) -> Result<EntityName, ChangeStreamsError> {
    let params: SubscriptionParams = params
        .cloned()
        .ok_or_else(|| ChangeStreamsError::InvalidParams("missing 'entityName' field".to_string()))
        .and_then(|p| {
            serde_json::from_value(p)
                .map_err(|e| ChangeStreamsError::InvalidParams(e.to_string()))
        })?;

    params
        .entity_name
        .parse()
        .map_err(|_| ChangeStreamsError::UnknownEntity {
            name: params.entity_name.clone(),
        })
}
