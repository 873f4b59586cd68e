//! Client side of the hub connection.
//!
//! One actor task owns the transport and the set of entities the application
//! currently wants. Views join and leave entity groups through a cloneable
//! [`RouterHandle`]; every reconnect replays the handshake and the full
//! subscription set, since the hub forgets a connection as soon as it drops.

use std::collections::BTreeMap;
use std::time::Duration;

use changestreams_core::{
    config::{ClientConfig, HANDSHAKE_TIMEOUT_MS},
    Backoff, ChangeEvent, EntityName,
};
use changestreams_protocol::{
    frames::{InboundFrame, ReqFrame, ResFrame},
    handshake::{AuthPayload, ClientInfo, ConnectParams},
    methods::{
        SubscriptionParams, CONNECT, EVENT_CHANGE, EVENT_CONNECT_CHALLENGE, EVENT_TICK, SUBSCRIBE,
        UNSUBSCRIBE,
    },
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{ClientError, Result};
use crate::transport::{Connector, Transport};

/// Change events buffered per receiver before a slow consumer starts lagging.
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Disconnected,
    Connecting,
    /// Handshake done and every wanted entity resubscribed.
    Connected,
    Reconnecting { attempt: u32 },
}

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub auth: AuthPayload,
    pub client_name: String,
    pub backoff: Backoff,
    /// Consecutive failed attempts tolerated before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Silence after which a connected session counts as lost. The hub ticks
    /// well inside this, so only a dead link stays quiet this long.
    pub liveness_timeout: Duration,
}

impl RouterSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        let auth = match &config.token {
            Some(token) => AuthPayload::Token {
                token: token.clone(),
            },
            None => AuthPayload::None,
        };
        Self {
            auth,
            client_name: "changestreams-client".to_string(),
            backoff: config.backoff.to_backoff(),
            max_attempts: config.max_attempts,
            liveness_timeout: Duration::from_secs(config.liveness_timeout_secs),
        }
    }
}

enum Command {
    Acquire(EntityName),
    Release(EntityName),
    Snapshot(oneshot::Sender<Vec<EntityName>>),
}

/// Cheap, cloneable front of the router actor.
#[derive(Clone)]
pub struct RouterHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ChangeEvent>,
    state: watch::Receiver<RouterState>,
    cancel: CancellationToken,
}

impl RouterHandle {
    /// Add one reference to `entity`. The wire `subscribe` goes out on the first.
    pub fn subscribe(&self, entity: EntityName) {
        let _ = self.commands.send(Command::Acquire(entity));
    }

    /// Drop one reference to `entity`. The wire `unsubscribe` goes out on the last.
    pub fn unsubscribe(&self, entity: EntityName) {
        let _ = self.commands.send(Command::Release(entity));
    }

    /// Subscribe for as long as the returned guard lives.
    pub fn view_appeared(&self, entity: EntityName) -> ViewGuard {
        self.subscribe(entity);
        ViewGuard {
            entity,
            commands: self.commands.clone(),
        }
    }

    /// Every change event received on the connection, for all subscribed entities.
    /// Consumers filter by `entity_name`.
    pub fn events(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<RouterState> {
        self.state.clone()
    }

    /// Entities currently wanted, whether or not the connection is up.
    pub async fn subscriptions(&self) -> Vec<EntityName> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Snapshot(reply)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Held by a visible view. Dropping it is the view disappearing.
pub struct ViewGuard {
    entity: EntityName,
    commands: mpsc::UnboundedSender<Command>,
}

impl ViewGuard {
    pub fn entity(&self) -> EntityName {
        self.entity
    }
}

impl Drop for ViewGuard {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Release(self.entity));
    }
}

enum SessionExit {
    Shutdown,
    Lost(String),
}

pub struct SubscriptionRouter<C> {
    connector: C,
    auth: AuthPayload,
    client_name: String,
    backoff: Backoff,
    max_attempts: Option<u32>,
    liveness_timeout: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<ChangeEvent>,
    state: watch::Sender<RouterState>,
    cancel: CancellationToken,
    /// Reference count per wanted entity. Entries never sit at zero.
    desired: BTreeMap<EntityName, usize>,
    next_request: u64,
}

impl<C: Connector> SubscriptionRouter<C> {
    /// Start the actor on the current runtime and return its handle.
    pub fn spawn(connector: C, settings: RouterSettings) -> RouterHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (state_tx, state_rx) = watch::channel(RouterState::Disconnected);
        let cancel = CancellationToken::new();

        let router = Self {
            connector,
            auth: settings.auth,
            client_name: settings.client_name,
            backoff: settings.backoff,
            max_attempts: settings.max_attempts,
            liveness_timeout: settings.liveness_timeout,
            commands: cmd_rx,
            events: events.clone(),
            state: state_tx,
            cancel: cancel.clone(),
            desired: BTreeMap::new(),
            next_request: 0,
        };
        tokio::spawn(router.run());

        RouterHandle {
            commands: cmd_tx,
            events,
            state: state_rx,
            cancel,
        }
    }

    async fn run(mut self) {
        let cancel = self.cancel.clone();
        let mut attempt: u32 = 0;

        loop {
            self.state.send_replace(if attempt == 0 {
                RouterState::Connecting
            } else {
                RouterState::Reconnecting { attempt }
            });

            let established = tokio::select! {
                _ = cancel.cancelled() => break,
                established = self.establish() => established,
            };

            match established {
                Ok(mut transport) => {
                    self.backoff.reset();
                    attempt = 0;
                    self.state.send_replace(RouterState::Connected);
                    info!(subscriptions = ?self.active(), "connected to hub");

                    match self.session(&mut transport, &cancel).await {
                        SessionExit::Shutdown => break,
                        SessionExit::Lost(reason) => warn!(%reason, "hub connection lost"),
                    }
                }
                Err(e) => warn!(error = %e, attempt, "hub connect failed"),
            }

            attempt = attempt.saturating_add(1);
            if let Some(max) = self.max_attempts {
                if attempt > max {
                    warn!(attempts = max, "giving up on hub connection");
                    break;
                }
            }
            self.state.send_replace(RouterState::Reconnecting { attempt });

            let delay = self.backoff.next_delay();
            warn!(
                attempt,
                retry_after_ms = delay.as_millis() as u64,
                "router reconnecting with backoff"
            );
            if !self.wait_offline(delay, &cancel).await {
                break;
            }
        }

        self.state.send_replace(RouterState::Disconnected);
        info!("subscription router stopped");
    }

    /// Connect, authenticate, then resubscribe everything wanted.
    async fn establish(&mut self) -> Result<Transport> {
        let mut transport = self.connector.connect().await?;

        let first = Self::recv_frame(&mut transport).await?;
        match first.as_event() {
            Some(ev) if ev.event == EVENT_CONNECT_CHALLENGE => {}
            _ => {
                return Err(ClientError::Protocol(
                    "expected connect.challenge".to_string(),
                ))
            }
        }

        let params = ConnectParams {
            auth: self.auth.clone(),
            client_info: Some(ClientInfo {
                name: Some(self.client_name.clone()),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
                platform: Some(std::env::consts::OS.to_string()),
            }),
        };
        let res = self
            .request(&mut transport, CONNECT, serde_json::to_value(params)?)
            .await?;
        if !res.ok {
            let (code, message) = res
                .error
                .map(|e| (e.code, e.message))
                .unwrap_or_else(|| ("UNKNOWN".to_string(), String::new()));
            return Err(ClientError::Handshake { code, message });
        }

        for entity in self.active() {
            let params = serde_json::to_value(SubscriptionParams::new(entity))?;
            let res = self.request(&mut transport, SUBSCRIBE, params).await?;
            if res.ok {
                debug!(%entity, "resubscribed");
            } else {
                warn!(%entity, error = ?res.error, "resubscribe rejected");
            }
        }

        Ok(transport)
    }

    /// Steady state: forward events, turn view commands into wire requests.
    async fn session(&mut self, transport: &mut Transport, cancel: &CancellationToken) -> SessionExit {
        let silence = tokio::time::sleep(self.liveness_timeout);
        tokio::pin!(silence);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return SessionExit::Shutdown,

                _ = &mut silence => {
                    return SessionExit::Lost(format!(
                        "no frame from hub in {}s",
                        self.liveness_timeout.as_secs()
                    ));
                }

                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else {
                        return SessionExit::Shutdown;
                    };
                    let Some((method, entity)) = self.apply(cmd) else {
                        continue;
                    };
                    let frame = match self.subscription_frame(method, entity) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "failed to encode request");
                            continue;
                        }
                    };
                    if transport.outbound.send(frame).await.is_err() {
                        return SessionExit::Lost("send failed".to_string());
                    }
                    debug!(%entity, method, "subscription request sent");
                }

                text = transport.inbound.recv() => {
                    let Some(text) = text else {
                        return SessionExit::Lost("hub closed the connection".to_string());
                    };
                    silence.as_mut().reset(tokio::time::Instant::now() + self.liveness_timeout);
                    match serde_json::from_str::<InboundFrame>(&text) {
                        Ok(frame) => match frame.as_res() {
                            Some(res) if !res.ok => {
                                warn!(id = %res.id, error = ?res.error, "hub rejected request");
                            }
                            Some(_) => {}
                            None => self.deliver(&frame),
                        },
                        Err(e) => warn!(error = %e, "malformed frame from hub"),
                    }
                }
            }
        }
    }

    /// Keep counting references while disconnected. Returns false on shutdown.
    async fn wait_offline(&mut self, delay: Duration, cancel: &CancellationToken) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                _ = cancel.cancelled() => return false,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => {
                        // the next handshake resubscribes from `desired`
                        self.apply(cmd);
                    }
                    None => return false,
                },
            }
        }
    }

    /// Update reference counts. Returns the wire request a 0↔1 transition needs.
    fn apply(&mut self, cmd: Command) -> Option<(&'static str, EntityName)> {
        match cmd {
            Command::Acquire(entity) => {
                let count = self.desired.entry(entity).or_insert(0);
                *count += 1;
                (*count == 1).then_some((SUBSCRIBE, entity))
            }
            Command::Release(entity) => {
                let count = self.desired.get_mut(&entity)?;
                *count -= 1;
                if *count > 0 {
                    return None;
                }
                self.desired.remove(&entity);
                Some((UNSUBSCRIBE, entity))
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.active());
                None
            }
        }
    }

    fn active(&self) -> Vec<EntityName> {
        self.desired.keys().copied().collect()
    }

    fn subscription_frame(&mut self, method: &str, entity: EntityName) -> Result<String> {
        let id = self.next_request_id();
        let params = serde_json::to_value(SubscriptionParams::new(entity))?;
        Ok(serde_json::to_string(&ReqFrame::new(id, method, Some(params)))?)
    }

    fn next_request_id(&mut self) -> String {
        self.next_request += 1;
        format!("r{}", self.next_request)
    }

    /// Send a request and wait for its response, delivering any events in between.
    async fn request(
        &mut self,
        transport: &mut Transport,
        method: &str,
        params: serde_json::Value,
    ) -> Result<ResFrame> {
        let id = self.next_request_id();
        let frame = serde_json::to_string(&ReqFrame::new(id.clone(), method, Some(params)))?;
        transport
            .outbound
            .send(frame)
            .await
            .map_err(|_| ClientError::Closed)?;

        loop {
            let frame = Self::recv_frame(transport).await?;
            match frame.as_res() {
                Some(res) if res.id == id => return Ok(res),
                Some(_) => {}
                None => self.deliver(&frame),
            }
        }
    }

    async fn recv_frame(transport: &mut Transport) -> Result<InboundFrame> {
        let wait = Duration::from_millis(HANDSHAKE_TIMEOUT_MS);
        let text = tokio::time::timeout(wait, transport.inbound.recv())
            .await
            .map_err(|_| ClientError::Protocol("timed out waiting for hub".to_string()))?
            .ok_or(ClientError::Closed)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn deliver(&self, frame: &InboundFrame) {
        let Some(ev) = frame.as_event() else {
            return;
        };
        match ev.event.as_str() {
            EVENT_CHANGE => {
                let payload = ev.payload.unwrap_or(serde_json::Value::Null);
                match serde_json::from_value::<ChangeEvent>(payload) {
                    Ok(event) => {
                        debug!(
                            entity = %event.entity_name,
                            operation = %event.operation,
                            entity_id = %event.entity_id,
                            seq = ?ev.seq,
                            "change event"
                        );
                        // no receivers just means no view is listening right now
                        let _ = self.events.send(event);
                    }
                    Err(e) => warn!(error = %e, "malformed change event dropped"),
                }
            }
            EVENT_TICK => trace!(seq = ?ev.seq, "hub tick"),
            other => debug!(event = other, "ignoring hub event"),
        }
    }
}
