//! Terminal channel: JSON control frames in, shell output frames out.
//!
//! Every shell started on a connection is owned by it. When the connection
//! ends, for any reason, [`OwnedTerminals`] kills and forgets those shells.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use tracker_core::constants::{CLOSE_BAD_FRAME, CLOSE_TOKEN_IN_USE};
use tracker_core::ids::ConnectionId;
use tracker_terminal::{ClientFrame, InitOutcome, ServerFrame, TerminalError, TerminalManager};

use super::ChannelSocket;
use crate::server::AppState;

/// Kills the connection's shells on drop.
struct OwnedTerminals {
    manager: Arc<TerminalManager>,
    owner: ConnectionId,
}

impl Drop for OwnedTerminals {
    fn drop(&mut self) {
        let closed = self.manager.close_owner(&self.owner);
        if closed > 0 {
            debug!(conn_id = %self.owner, closed, "terminal sessions released");
        }
    }
}

/// How the connection loop ended.
enum Ending {
    /// Client left or server is stopping.
    Done,
    /// Close with an application code.
    Close(u16, &'static str),
}

/// Run a terminal connection.
pub async fn run(mut socket: ChannelSocket, state: AppState) {
    let owned = OwnedTerminals {
        manager: Arc::clone(&state.terminals),
        owner: socket.id().clone(),
    };
    let (sink, mut frames) = mpsc::channel::<ServerFrame>(state.send_queue.max(1));
    let shutdown = state.shutdown.token();

    let ending = loop {
        tokio::select! {
            inbound = socket.recv() => {
                let Some(text) = inbound else { break Ending::Done };
                let frame = match ClientFrame::parse(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "malformed terminal frame");
                        break Ending::Close(CLOSE_BAD_FRAME, "malformed control frame");
                    }
                };
                if let Some(ending) = handle(frame, &socket, &owned, &sink).await {
                    break ending;
                }
            }
            frame = frames.recv() => {
                let Some(frame) = frame else { break Ending::Done };
                if !socket.send_json(&frame).await {
                    break Ending::Done;
                }
            }
            () = shutdown.cancelled() => break Ending::Done,
        }
    };

    drop(owned);
    match ending {
        Ending::Done => socket.finish().await,
        Ending::Close(code, reason) => socket.close(code, reason).await,
    }
}

async fn handle(
    frame: ClientFrame,
    socket: &ChannelSocket,
    owned: &OwnedTerminals,
    sink: &mpsc::Sender<ServerFrame>,
) -> Option<Ending> {
    match frame {
        ClientFrame::Init {
            session,
            cols,
            rows,
        } => {
            let size = cols.zip(rows);
            match owned.manager.init(&session, &owned.owner, size, sink.clone()) {
                Ok(InitOutcome::Created) => {
                    if !socket.send_json(&ServerFrame::SessionCreated { session }).await {
                        return Some(Ending::Done);
                    }
                }
                Ok(InitOutcome::Existing) => {
                    debug!(session = %session, "init for a session this connection already owns");
                }
                Err(e @ TerminalError::TokenInUse(_)) => {
                    let _ = socket
                        .send_json(&ServerFrame::Error {
                            session: Some(session),
                            message: e.to_string(),
                        })
                        .await;
                    return Some(Ending::Close(CLOSE_TOKEN_IN_USE, "terminal session in use"));
                }
                Err(e) => {
                    warn!(session = %session, error = %e, "terminal init failed");
                    let frame = ServerFrame::Error {
                        session: Some(session),
                        message: e.to_string(),
                    };
                    if !socket.send_json(&frame).await {
                        return Some(Ending::Done);
                    }
                }
            }
        }
        ClientFrame::Input { session, data } => {
            owned.manager.input(&session, &owned.owner, data.as_bytes());
        }
        ClientFrame::Resize {
            session,
            cols,
            rows,
        } => owned.manager.resize(&session, &owned.owner, cols, rows),
    }
    None
}
