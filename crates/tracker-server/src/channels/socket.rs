//! Outbound queue and inbound reader for one channel connection.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use tracker_core::ids::ConnectionId;

use crate::metrics::{CHANNEL_DROPS_TOTAL, CHANNEL_REJECTS_TOTAL};

/// Interval between server-initiated Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long a closing connection may take to flush its queue.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// A channel connection: the socket's read half plus a queue drained into
/// the write half by a forwarder task.
pub struct ChannelSocket {
    id: ConnectionId,
    channel: &'static str,
    tx: mpsc::Sender<Message>,
    rx: SplitStream<WebSocket>,
    writer: JoinHandle<()>,
    dropped: u64,
}

impl ChannelSocket {
    /// Split `ws` and start its forwarder.
    pub fn new(ws: WebSocket, id: ConnectionId, channel: &'static str, queue: usize) -> Self {
        let (mut ws_tx, rx) = ws.split();
        let (tx, mut out) = mpsc::channel::<Message>(queue.max(1));

        let writer = tokio::spawn(async move {
            let mut ping_interval = tokio::time::interval(PING_INTERVAL);
            // Skip the immediate first tick
            let _ = ping_interval.tick().await;

            loop {
                tokio::select! {
                    msg = out.recv() => {
                        let Some(msg) = msg else { break };
                        let closing = matches!(msg, Message::Close(_));
                        if ws_tx.send(msg).await.is_err() || closing {
                            break;
                        }
                    }
                    _ = ping_interval.tick() => {
                        if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = ws_tx.close().await;
        });

        Self {
            id,
            channel,
            tx,
            rx,
            writer,
            dropped: 0,
        }
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue `text`, waiting for room. Returns `false` once the client is gone.
    pub async fn send_text(&self, text: String) -> bool {
        self.tx.send(Message::Text(text.into())).await.is_ok()
    }

    /// Serialize and queue `value`, waiting for room.
    pub async fn send_json<T: Serialize>(&self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.send_text(json).await,
            Err(e) => {
                warn!(conn_id = %self.id, error = %e, "failed to serialize outbound message");
                true
            }
        }
    }

    /// Queue `value` without waiting; a full queue drops it. Returns `false`
    /// once the client is gone.
    pub fn offer_json<T: Serialize>(&mut self, value: &T) -> bool {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(conn_id = %self.id, error = %e, "failed to serialize outbound message");
                return true;
            }
        };
        match self.tx.try_send(Message::Text(json.into())) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                counter!(CHANNEL_DROPS_TOTAL, "channel" => self.channel).increment(1);
                debug!(conn_id = %self.id, dropped = self.dropped, "client queue full, update dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Updates discarded because the client's queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Next text message from the client; `None` once it disconnects.
    /// Binary frames holding UTF-8 are treated as text.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.rx.next().await? {
                Ok(Message::Text(text)) => return Some(text.to_string()),
                Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                    Ok(text) => return Some(text.to_owned()),
                    Err(_) => debug!(conn_id = %self.id, len = data.len(), "ignoring non-UTF8 binary frame"),
                },
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Ok(Message::Close(_)) | Err(_) => return None,
            }
        }
    }

    /// Close with an application `code` and `reason`, then wait for the
    /// queue to flush.
    pub async fn close(self, code: u16, reason: &str) {
        counter!(CHANNEL_REJECTS_TOTAL, "code" => code.to_string()).increment(1);
        debug!(conn_id = %self.id, code, reason, "closing channel");
        let frame = CloseFrame {
            code,
            reason: reason.to_owned().into(),
        };
        let _ = self.tx.send(Message::Close(Some(frame))).await;
        self.finish().await;
    }

    /// Stop queueing and wait for the forwarder to flush and close.
    pub async fn finish(self) {
        let Self { tx, writer, .. } = self;
        drop(tx);
        let mut writer = writer;
        if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
            writer.abort();
        }
    }
}
