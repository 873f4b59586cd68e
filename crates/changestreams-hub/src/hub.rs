//! Per-entity subscription registry and fan-out.
//!
//! Every authenticated WebSocket connection registers one bounded outbound
//! queue. Groups map an entity to the set of connections subscribed to it.
//! The hub keeps no history: an event for an empty group is dropped.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use changestreams_core::{ChangeEvent, ChangeStreamsError, ConnId, EntityName};
use changestreams_listener::ChangeSink;
use changestreams_protocol::{frames::EventFrame, methods::EVENT_CHANGE};
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

pub struct SubscriptionHub {
    /// Live connections: conn_id -> outbound frame queue.
    clients: DashMap<ConnId, mpsc::Sender<String>>,
    groups: DashMap<EntityName, HashSet<ConnId>>,
    event_seq: AtomicU64,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            groups: DashMap::new(),
            event_seq: AtomicU64::new(0),
        }
    }

    /// Register a connection's outbound queue.
    ///
    /// The hub must hold the only sender: dropping it on eviction is what
    /// tells the connection task to close the socket.
    pub fn register(&self, conn_id: ConnId, tx: mpsc::Sender<String>) {
        debug!(%conn_id, "connection registered");
        self.clients.insert(conn_id, tx);
    }

    /// Join `entity`'s group. Returns `false` if already a member.
    pub fn subscribe(&self, conn_id: &ConnId, entity: EntityName) -> Result<bool, ChangeStreamsError> {
        if !self.clients.contains_key(conn_id) {
            return Err(ChangeStreamsError::UnknownConnection {
                conn_id: conn_id.to_string(),
            });
        }
        let added = self.groups.entry(entity).or_default().insert(conn_id.clone());
        if added {
            info!(%conn_id, %entity, "subscribed");
        }
        Ok(added)
    }

    /// Leave `entity`'s group. Returns `false` if not a member.
    pub fn unsubscribe(&self, conn_id: &ConnId, entity: EntityName) -> bool {
        let removed = self
            .groups
            .get_mut(&entity)
            .map(|mut members| members.remove(conn_id))
            .unwrap_or(false);
        if removed {
            info!(%conn_id, %entity, "unsubscribed");
        }
        removed
    }

    /// Drop a connection and every membership it holds.
    ///
    /// Returns the number of groups it was removed from.
    pub fn disconnect(&self, conn_id: &ConnId) -> usize {
        self.clients.remove(conn_id);
        let mut removed = 0;
        for mut members in self.groups.iter_mut() {
            if members.value_mut().remove(conn_id) {
                removed += 1;
            }
        }
        removed
    }

    /// Push `event` to every connection currently subscribed to `entity`.
    ///
    /// Never blocks. A connection whose queue is closed or full is treated as
    /// disconnected and cleaned up; the remaining members still receive the
    /// event. Returns the number of connections it was queued for.
    pub fn broadcast(&self, entity: EntityName, event: &ChangeEvent) -> usize {
        // Snapshot so no shard lock is held while sending or disconnecting.
        let members: Vec<ConnId> = match self.groups.get(&entity) {
            Some(group) if !group.is_empty() => group.iter().cloned().collect(),
            _ => {
                debug!(%entity, "no subscribers, event dropped");
                return 0;
            }
        };

        let frame = EventFrame::new(EVENT_CHANGE, event).with_seq(self.next_seq());
        let payload = match serde_json::to_string(&frame) {
            Ok(p) => p,
            Err(e) => {
                warn!(%entity, error = %e, "change frame serialization failed");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut dead: Vec<(ConnId, &'static str)> = Vec::new();
        for conn_id in members {
            let sent = match self.clients.get(&conn_id) {
                Some(tx) => tx.try_send(payload.clone()),
                // Subscribed concurrently with its own disconnect.
                None => {
                    dead.push((conn_id, "unregistered"));
                    continue;
                }
            };
            match sent {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => dead.push((conn_id, "slow consumer")),
                Err(TrySendError::Closed(_)) => dead.push((conn_id, "connection closed")),
            }
        }

        for (conn_id, reason) in dead {
            warn!(%conn_id, %entity, reason, "dropping connection during broadcast");
            self.disconnect(&conn_id);
        }

        debug!(%entity, operation = %event.operation, entity_id = %event.entity_id, delivered, "change broadcast");
        delivered
    }

    /// Entities a connection is subscribed to, sorted.
    pub fn subscriptions_of(&self, conn_id: &ConnId) -> Vec<EntityName> {
        let mut entities: Vec<EntityName> = self
            .groups
            .iter()
            .filter(|group| group.value().contains(conn_id))
            .map(|group| *group.key())
            .collect();
        entities.sort();
        entities
    }

    pub fn subscriber_count(&self, entity: EntityName) -> usize {
        self.groups.get(&entity).map(|g| g.len()).unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    /// Monotonically increasing sequence for pushed events.
    pub fn next_seq(&self) -> u64 {
        self.event_seq.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeSink for SubscriptionHub {
    fn publish(&self, event: ChangeEvent) -> usize {
        self.broadcast(event.entity_name, &event)
    }
}
