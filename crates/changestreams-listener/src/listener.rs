use std::sync::Arc;

use changestreams_core::{config::ListenerConfig, Backoff, ChangeEvent};
use serde::Serialize;
use sqlx::postgres::PgListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::emitter::validate_identifier;
use crate::error::{ListenerError, Result};

/// Destination for decoded change events (the broadcast hub).
///
/// `publish` is called from the single listener task, one event at a time,
/// so events for an entity reach the sink in notification order.
pub trait ChangeSink: Send + Sync {
    /// Deliver one event; returns the number of recipients it reached.
    fn publish(&self, event: ChangeEvent) -> usize;
}

/// Observable listener state, surfaced by the hub's health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ListenerStatus {
    Starting,
    Listening,
    Reconnecting { attempt: u32 },
    Stopped,
}

/// Decode one NOTIFY payload.
pub fn decode_payload(payload: &str) -> Result<ChangeEvent> {
    serde_json::from_str(payload).map_err(|e| ListenerError::MalformedPayload(e.to_string()))
}

/// Decode and forward one payload. Malformed payloads are logged and dropped.
///
/// Returns the recipient count, or `None` when the payload was dropped.
pub fn forward(sink: &dyn ChangeSink, payload: &str) -> Option<usize> {
    match decode_payload(payload) {
        Ok(event) => {
            let entity = event.entity_name;
            let operation = event.operation;
            let entity_id = event.entity_id.clone();
            let delivered = sink.publish(event);
            debug!(%entity, %operation, %entity_id, delivered, "change forwarded");
            Some(delivered)
        }
        Err(e) => {
            warn!(error = %e, payload_len = payload.len(), "dropping malformed change payload");
            None
        }
    }
}

enum PumpExit {
    Shutdown,
    Failed(ListenerError),
}

/// Holds the one LISTEN subscription for the process.
///
/// Runs until shutdown; every connection failure is retried with backoff,
/// without limit. Nothing here can fail the caller: errors are logged and
/// reflected in [`ListenerStatus`].
pub struct ChangeListener {
    database_url: String,
    channel: String,
    backoff: Backoff,
    status_tx: watch::Sender<ListenerStatus>,
}

impl ChangeListener {
    pub fn new(database_url: impl Into<String>, config: &ListenerConfig) -> Result<Self> {
        validate_identifier(&config.channel)?;
        let (status_tx, _) = watch::channel(ListenerStatus::Starting);
        Ok(Self {
            database_url: database_url.into(),
            channel: config.channel.clone(),
            backoff: config.backoff.to_backoff(),
            status_tx,
        })
    }

    /// Subscribe to status transitions.
    pub fn status(&self) -> watch::Receiver<ListenerStatus> {
        self.status_tx.subscribe()
    }

    /// Main loop. Connects, LISTENs, forwards, and reconnects until `shutdown` broadcasts `true`.
    pub async fn run(mut self, sink: Arc<dyn ChangeSink>, mut shutdown: watch::Receiver<bool>) {
        info!(channel = %self.channel, "change listener started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.connect().await {
                Ok(mut listener) => {
                    self.backoff.reset();
                    self.status_tx.send_replace(ListenerStatus::Listening);
                    info!(channel = %self.channel, "listening for change notifications");

                    match self.pump(&mut listener, sink.as_ref(), &mut shutdown).await {
                        PumpExit::Shutdown => break,
                        PumpExit::Failed(e) => {
                            error!(error = %e, "change listener connection failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "change listener connect failed");
                }
            }

            let delay = self.backoff.next_delay();
            let attempt = self.backoff.attempt();
            self.status_tx
                .send_replace(ListenerStatus::Reconnecting { attempt });
            warn!(
                attempt,
                retry_after_ms = delay.as_millis() as u64,
                "change listener reconnecting with backoff"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.status_tx.send_replace(ListenerStatus::Stopped);
        info!("change listener stopped");
    }

    async fn connect(&self) -> Result<PgListener> {
        let mut listener = PgListener::connect(&self.database_url).await?;
        listener.listen(&self.channel).await?;
        Ok(listener)
    }

    /// Forward notifications until the connection fails or shutdown is signalled.
    async fn pump(
        &self,
        listener: &mut PgListener,
        sink: &dyn ChangeSink,
        shutdown: &mut watch::Receiver<bool>,
    ) -> PumpExit {
        loop {
            tokio::select! {
                received = listener.try_recv() => match received {
                    Ok(Some(notification)) => self.on_notification(sink, notification.payload()),
                    // Reconnect through connect() so the status only returns to
                    // Listening once LISTEN is re-issued. Anything published in
                    // between is gone.
                    Ok(None) => return PumpExit::Failed(ListenerError::ConnectionLost),
                    Err(e) => return PumpExit::Failed(e.into()),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return PumpExit::Shutdown;
                    }
                }
            }
        }
    }

    fn on_notification(&self, sink: &dyn ChangeSink, payload: &str) {
        self.status_tx.send_if_modified(|status| {
            if *status == ListenerStatus::Listening {
                return false;
            }
            *status = ListenerStatus::Listening;
            true
        });
        forward(sink, payload);
    }
}
