// Well-known WS method and event names: hub and client must agree on these.

use changestreams_core::EntityName;
use serde::{Deserialize, Serialize};

// handshake
pub const CONNECT: &str = "connect";

// subscriptions
pub const SUBSCRIBE: &str = "subscribe";
pub const UNSUBSCRIBE: &str = "unsubscribe";

// utility
pub const PING: &str = "ping";

// hub → client events
pub const EVENT_CONNECT_CHALLENGE: &str = "connect.challenge";
pub const EVENT_CHANGE: &str = "change";
pub const EVENT_TICK: &str = "tick";

/// Params for `subscribe` / `unsubscribe`.
///
/// `entity_name` stays a plain string here so the hub can answer an unknown
/// name with `UNKNOWN_ENTITY` instead of a generic params error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionParams {
    pub entity_name: String,
}

impl SubscriptionParams {
    pub fn new(entity: EntityName) -> Self {
        Self {
            entity_name: entity.as_str().to_string(),
        }
    }
}

/// `res` payload for `subscribe` / `unsubscribe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionAck {
    pub entity_name: EntityName,
    /// Membership after the call.
    pub subscribed: bool,
    /// False when the call was a no-op (already in / already out).
    pub changed: bool,
}
