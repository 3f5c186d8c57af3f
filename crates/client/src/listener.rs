//! WebSocket push listener.
//!
//! [`PushListener`] connects to the producer's push endpoint, parses
//! `job_update` frames via [`parse_message`] and forwards the facts into
//! the reconciliation inbox. A dropped connection is retried with
//! exponential backoff until the subscription is cancelled.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use reelforge_pipeline::{FactSink, PushSource};

use crate::messages::{parse_message, PushMessage};
use crate::reconnect::{Backoff, ReconnectConfig};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Why a single WebSocket session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// The connection dropped; reconnect.
    Dropped,
    Cancelled,
    /// The reconciler is gone; nothing left to deliver to.
    InboxClosed,
}

pub struct PushListener {
    url: String,
    reconnect: ReconnectConfig,
}

impl PushListener {
    /// * `url` - WebSocket URL, e.g. `wss://engines.internal/push`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PushSource for PushListener {
    async fn run(&self, sink: FactSink, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.reconnect.clone());

        loop {
            tracing::info!(url = %self.url, failures = backoff.failures(), "Connecting to push endpoint");

            let connected = tokio::select! {
                _ = cancel.cancelled() => return,
                result = connect_async(self.url.as_str()) => result,
            };

            match connected {
                Ok((ws_stream, _response)) => {
                    tracing::info!(url = %self.url, "Push WebSocket connected");
                    backoff.reset();
                    match run_session(ws_stream, &sink, &cancel).await {
                        SessionEnd::Cancelled | SessionEnd::InboxClosed => return,
                        SessionEnd::Dropped => {
                            tracing::warn!(url = %self.url, "Push session ended, reconnecting");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %self.url, error = %e, "Push connection failed");
                }
            }

            let wait = backoff.fail();
            tracing::debug!(delay_ms = wait.as_millis() as u64, "Waiting before reconnect");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

/// Forward facts from one connection until it drops or is cancelled.
async fn run_session(ws_stream: WsStream, sink: &FactSink, cancel: &CancellationToken) -> SessionEnd {
    let (mut write, mut read) = ws_stream.split();

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Cancelled;
            }
            frame = read.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                if !forward(&text, sink).await {
                    return SessionEnd::InboxClosed;
                }
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // Handled automatically by tungstenite.
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(?frame, "Push endpoint closed WebSocket");
                return SessionEnd::Dropped;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::error!(error = %e, "Push WebSocket receive error");
                return SessionEnd::Dropped;
            }
            None => {
                tracing::info!("Push WebSocket stream exhausted");
                return SessionEnd::Dropped;
            }
        }
    }
}

/// Parse one text frame and post any fact. Returns `false` once the
/// inbox is closed.
async fn forward(text: &str, sink: &FactSink) -> bool {
    match parse_message(text) {
        Ok(PushMessage::JobUpdate(fact)) => {
            tracing::debug!(job_id = %fact.id, raw_status = ?fact.raw_status, "Push update received");
            sink.send(fact).await
        }
        Ok(PushMessage::Heartbeat) => {
            tracing::trace!("Push heartbeat");
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, raw_message = %text, "Failed to parse push message");
            true
        }
    }
}
