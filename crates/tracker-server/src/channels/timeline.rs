//! Timeline channel: replay the log, then stream every new record.
//!
//! The change watch is installed before the catch-up read starts. The
//! cursor's byte offset then covers the handover: a record appended while
//! catch-up is running is either read by catch-up or picked up by the next
//! change notification, never both and never neither.

use tracing::{debug, warn};
use tracker_core::constants::CLOSE_WATCH_FAILED;
use tracker_log::{Subscription, TailCursor, WatchSignal};

use super::{ChannelSocket, resolve_or_close};
use crate::server::AppState;

/// Run a timeline connection until the client leaves or the server stops.
pub async fn run(socket: ChannelSocket, state: AppState, since: Option<i64>) {
    let Some((mut socket, dir)) = resolve_or_close(socket, &state).await else {
        return;
    };

    let mut sub = match Subscription::open(&dir.events, &state.watches) {
        Ok(sub) => sub,
        Err(e) => {
            warn!(session = %dir.id, error = %e, "timeline watch failed");
            socket.close(CLOSE_WATCH_FAILED, "log watch failed").await;
            return;
        }
    };

    let mut cursor = TailCursor::new(&dir.events).with_since(since);
    let shutdown = state.shutdown.token();

    if pump(&mut cursor, &socket).await {
        debug!(session = %dir.id, offset = cursor.offset(), "timeline caught up");
        loop {
            tokio::select! {
                signal = sub.changed() => match signal {
                    Some(WatchSignal::Changed) => {
                        let _ = sub.drain_pending();
                        if !pump(&mut cursor, &socket).await {
                            break;
                        }
                    }
                    Some(WatchSignal::Error(e)) => {
                        warn!(session = %dir.id, error = %e, "timeline watch error");
                    }
                    None => break,
                },
                inbound = socket.recv() => {
                    if inbound.is_none() {
                        break;
                    }
                }
                () = shutdown.cancelled() => break,
            }
        }
    }

    sub.close();
    socket.finish().await;
}

/// Send every complete record past the cursor. Returns `false` once the
/// client is gone; read errors are logged and retried on the next change.
async fn pump(cursor: &mut TailCursor, socket: &ChannelSocket) -> bool {
    loop {
        let batch = match cursor.next_chunk().await {
            Ok(Some(batch)) => batch,
            Ok(None) => return true,
            Err(e) => {
                warn!(path = %cursor.path().display(), error = %e, "timeline read failed");
                return true;
            }
        };
        for event in batch {
            let line = match event.to_line() {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "failed to serialize record");
                    continue;
                }
            };
            if !socket.send_text(line).await {
                return false;
            }
        }
    }
}
