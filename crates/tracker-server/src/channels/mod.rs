//! Channel multiplexer.
//!
//! Every `WebSocket` upgrade that no HTTP route claims lands in
//! [`dispatch`], which maps the request path to a [`Channel`] and runs its
//! handler. Unrecognized paths are upgraded and immediately closed with
//! `4404`, so the client learns why instead of seeing a failed handshake.

pub mod live;
pub mod socket;
pub mod terminal;
pub mod timeline;

use axum::extract::rejection::QueryRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{Instrument, debug, info, info_span};
use tracker_core::constants::{CLOSE_NO_SESSION, CLOSE_UNKNOWN_CHANNEL};
use tracker_core::ids::ConnectionId;
use tracker_log::{LogError, SessionDir};

use crate::server::AppState;

pub use socket::ChannelSocket;

/// Standard close code for an unexpected server condition.
pub const CLOSE_INTERNAL: u16 = 1011;

/// A routable channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    /// Replay-then-live log stream, optionally from `since` (ms epoch).
    Timeline {
        /// Lower bound on record `t`; `None` streams everything.
        since: Option<i64>,
    },
    /// Latest frame, throttled.
    LiveVision,
    /// Recent and new `speech.final` records.
    LiveAudio,
    /// Periodic frame + speech snapshot.
    LiveCombined,
    /// Interactive pseudo-terminal sessions.
    Terminal,
}

impl Channel {
    /// Map a request path to a channel.
    pub fn from_path(path: &str, since: Option<i64>) -> Option<Self> {
        let path = match path.strip_suffix('/') {
            Some(trimmed) if !trimmed.is_empty() => trimmed,
            _ => path,
        };
        match path {
            "/timeline" => Some(Self::Timeline { since }),
            "/live/vision" => Some(Self::LiveVision),
            "/live/audio" => Some(Self::LiveAudio),
            "/live/combined" => Some(Self::LiveCombined),
            "/terminal" => Some(Self::Terminal),
            _ => None,
        }
    }

    /// Label used in logs and metrics.
    pub fn name(self) -> &'static str {
        match self {
            Self::Timeline { .. } => "timeline",
            Self::LiveVision => "live_vision",
            Self::LiveAudio => "live_audio",
            Self::LiveCombined => "live_combined",
            Self::Terminal => "terminal",
        }
    }
}

/// Query parameters accepted on channel paths.
#[derive(Debug, Default, Deserialize)]
pub struct ChannelQuery {
    /// Timeline lower bound, ms epoch.
    pub since: Option<String>,
}

/// Parse `since`: absent, unparseable, or non-positive means "everything".
pub fn parse_since(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|since| *since > 0)
}

/// Fallback handler: upgrade and route by path.
pub async fn dispatch(
    State(state): State<AppState>,
    uri: Uri,
    query: Result<Query<ChannelQuery>, QueryRejection>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(upgrade) = upgrade else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let since = query
        .ok()
        .and_then(|Query(q)| parse_since(q.since.as_deref()));
    let channel = Channel::from_path(uri.path(), since);
    let path = uri.path().to_owned();

    upgrade.on_upgrade(move |ws| {
        let id = ConnectionId::new();
        let span = info_span!(
            "channel",
            conn_id = %id,
            channel = channel.map_or("unknown", Channel::name)
        );
        async move {
            let socket = ChannelSocket::new(
                ws,
                id,
                channel.map_or("unknown", Channel::name),
                state.send_queue,
            );
            let Some(channel) = channel else {
                info!(path = %path, "unknown channel path");
                socket
                    .close(CLOSE_UNKNOWN_CHANNEL, &format!("unknown channel: {path}"))
                    .await;
                return;
            };

            let _guard = state.connections.register(channel.name());
            info!("channel connected");
            match channel {
                Channel::Timeline { since } => timeline::run(socket, state, since).await,
                Channel::LiveVision => live::run_vision(socket, state).await,
                Channel::LiveAudio => live::run_audio(socket, state).await,
                Channel::LiveCombined => live::run_combined(socket, state).await,
                Channel::Terminal => terminal::run(socket, state).await,
            }
            info!("channel disconnected");
        }
        .instrument(span)
    })
}

/// Resolve the current session for a log-backed channel, closing the
/// socket when there is none.
pub(crate) async fn resolve_or_close(
    socket: ChannelSocket,
    state: &AppState,
) -> Option<(ChannelSocket, SessionDir)> {
    match state.sessions.current().await {
        Ok(dir) => {
            debug!(session = %dir.id, "session resolved");
            Some((socket, dir))
        }
        Err(LogError::NoSession) => {
            socket.close(CLOSE_NO_SESSION, "no active session").await;
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "session resolution failed");
            socket.close(CLOSE_INTERNAL, "session lookup failed").await;
            None
        }
    }
}
