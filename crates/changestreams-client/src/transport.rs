//! Text-frame transport between the router and the hub.
//!
//! The router never touches a socket directly. A [`Connector`] hands it a
//! [`Transport`]: one queue of frames to send, one of frames received. The
//! inbound queue ending means the connection is gone.

use async_trait::async_trait;
use changestreams_core::config::OUTBOUND_QUEUE_CAPACITY;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

pub struct Transport {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

impl Transport {
    /// Two transports wired back to back: what one sends, the other receives.
    pub fn pair(capacity: usize) -> (Transport, Transport) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        (
            Transport {
                outbound: a_tx,
                inbound: b_rx,
            },
            Transport {
                outbound: b_tx,
                inbound: a_rx,
            },
        )
    }
}

/// Opens a fresh transport. Called once per (re)connect attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Transport>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Transport> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        debug!(url = %self.url, "websocket connected");

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE_CAPACITY);

        // writer: ends when the router drops its sender
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    warn!(error = %e, "websocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // reader: dropping in_tx tells the router the connection is gone
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "websocket read failed");
                        break;
                    }
                }
            }
        });

        Ok(Transport {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
