//! Latest-value channels: vision, audio and the combined snapshot.
//!
//! Vision and combined coalesce change notifications: each push re-reads the
//! newest state, and notifications arriving inside the throttle window are
//! discarded. Audio keeps a byte cursor so every new `speech.final` record is
//! pushed once. Per-update read errors are logged and skipped.

use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};
use tracker_core::constants::CLOSE_WATCH_FAILED;
use tracker_core::events::Event;
use tracker_core::now_ms;
use tracker_log::backward::{read_last_lines, recent_matching};
use tracker_log::frames::{encode_frame, latest_frame};
use tracker_log::tail::parse_line;
use tracker_log::{SessionDir, Subscription, TailCursor, WatchSignal};

use super::{ChannelSocket, resolve_or_close};
use crate::server::AppState;

/// Minimum spacing between pushes.
///
/// Records the last push and refuses anything inside the window; refused
/// updates are dropped, not deferred.
#[derive(Clone, Debug)]
pub struct Throttle {
    window: Duration,
    last: Option<Instant>,
}

impl Throttle {
    /// A throttle allowing one push per `window`.
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Whether a push at `now` is allowed.
    pub fn ready(&self, now: Instant) -> bool {
        self.last
            .is_none_or(|last| now.saturating_duration_since(last) >= self.window)
    }

    /// Record a push at `now`.
    pub fn record(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

/// A frame as pushed to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FramePayload {
    /// File stem of the frame.
    pub frame_id: String,
    /// Capture time, ms epoch.
    pub timestamp: i64,
    /// Base64 image bytes.
    pub data: String,
    /// Always `"jpeg"`.
    pub format: &'static str,
}

#[derive(Serialize)]
struct VisionPush {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    frame: FramePayload,
}

#[derive(Serialize)]
struct CombinedPush {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: i64,
    frame: Option<FramePayload>,
    speech: Vec<Event>,
}

/// Load and encode the newest frame in `frames_dir`.
pub async fn load_latest_frame(frames_dir: &Path) -> tracker_log::Result<Option<FramePayload>> {
    let Some(frame) = latest_frame(frames_dir).await? else {
        return Ok(None);
    };
    let bytes = tokio::fs::read(&frame.path).await?;
    Ok(Some(FramePayload {
        timestamp: frame.id.parse().unwrap_or_else(|_| now_ms()),
        frame_id: frame.id,
        data: encode_frame(&bytes),
        format: "jpeg",
    }))
}

async fn open_watch(
    socket: ChannelSocket,
    state: &AppState,
) -> Option<(ChannelSocket, SessionDir, Subscription)> {
    let (socket, dir) = resolve_or_close(socket, state).await?;
    match Subscription::open(&dir.events, &state.watches) {
        Ok(sub) => Some((socket, dir, sub)),
        Err(e) => {
            warn!(session = %dir.id, error = %e, "live watch failed");
            socket.close(CLOSE_WATCH_FAILED, "log watch failed").await;
            None
        }
    }
}

/// What a throttled channel pushes on each allowed update.
enum Snapshot {
    Vision,
    Combined { speech_limit: usize },
}

impl Snapshot {
    /// Build and queue one update. `Some(false)` means the client is gone,
    /// `None` means there was nothing to send.
    async fn push(&self, socket: &mut ChannelSocket, dir: &SessionDir) -> Option<bool> {
        let frame = match load_latest_frame(&dir.frames).await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(session = %dir.id, error = %e, "frame read failed, skipping update");
                return None;
            }
        };
        match *self {
            Self::Vision => {
                let frame = frame?;
                debug!(frame_id = %frame.frame_id, "pushing frame");
                Some(socket.offer_json(&VisionPush {
                    kind: "frame",
                    frame,
                }))
            }
            Self::Combined { speech_limit } => {
                let speech =
                    match recent_matching(&dir.events, speech_limit, Event::is_speech).await {
                        Ok(speech) => speech,
                        Err(e) => {
                            warn!(session = %dir.id, error = %e, "speech read failed, skipping update");
                            return None;
                        }
                    };
                Some(socket.offer_json(&CombinedPush {
                    kind: "combined",
                    timestamp: now_ms(),
                    frame,
                    speech,
                }))
            }
        }
    }
}

async fn run_throttled(
    socket: ChannelSocket,
    state: AppState,
    window: Duration,
    snapshot: Snapshot,
) {
    let Some((mut socket, dir, mut sub)) = open_watch(socket, &state).await else {
        return;
    };
    let shutdown = state.shutdown.token();
    let mut throttle = Throttle::new(window);

    let mut open = true;
    if let Some(sent) = snapshot.push(&mut socket, &dir).await {
        throttle.record(Instant::now());
        open = sent;
    }

    while open {
        tokio::select! {
            signal = sub.changed() => match signal {
                Some(WatchSignal::Changed) => {
                    let _ = sub.drain_pending();
                    let now = Instant::now();
                    if !throttle.ready(now) {
                        continue;
                    }
                    if let Some(sent) = snapshot.push(&mut socket, &dir).await {
                        throttle.record(now);
                        open = sent;
                    }
                }
                Some(WatchSignal::Error(e)) => warn!(session = %dir.id, error = %e, "live watch error"),
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

    debug!(dropped = socket.dropped(), "live channel closing");
    sub.close();
    socket.finish().await;
}

/// Live-vision: the newest frame on connect and on every change, at most
/// once per vision window.
pub async fn run_vision(socket: ChannelSocket, state: AppState) {
    let window = state.live.vision_window();
    run_throttled(socket, state, window, Snapshot::Vision).await;
}

/// Live-combined: frame plus recent speech on connect and on every change,
/// at most once per combined window.
pub async fn run_combined(socket: ChannelSocket, state: AppState) {
    let window = state.live.combined_window();
    let snapshot = Snapshot::Combined {
        speech_limit: state.live.combined_speech_limit,
    };
    run_throttled(socket, state, window, snapshot).await;
}

/// Live-audio: replay speech from the last few lines, then every new
/// `speech.final` record, unthrottled.
pub async fn run_audio(socket: ChannelSocket, state: AppState) {
    let Some((mut socket, dir, mut sub)) = open_watch(socket, &state).await else {
        return;
    };
    let shutdown = state.shutdown.token();

    let mut cursor = match read_last_lines(&dir.events, state.live.audio_replay_lines).await {
        Ok((lines, end)) => {
            let replay: Vec<Event> = lines
                .iter()
                .filter_map(|line| parse_line(line))
                .filter(Event::is_speech)
                .collect();
            for event in &replay {
                if !socket.send_json(event).await {
                    sub.close();
                    socket.finish().await;
                    return;
                }
            }
            debug!(replayed = replay.len(), offset = end, "audio replay sent");
            TailCursor::at_offset(&dir.events, end)
        }
        Err(e) => {
            warn!(session = %dir.id, error = %e, "audio replay failed, streaming from end");
            let end = tokio::fs::metadata(&dir.events).await.map_or(0, |m| m.len());
            TailCursor::at_offset(&dir.events, end)
        }
    };

    loop {
        tokio::select! {
            signal = sub.changed() => match signal {
                Some(WatchSignal::Changed) => {
                    let _ = sub.drain_pending();
                    match cursor.drain().await {
                        Ok(events) => {
                            let mut open = true;
                            for event in events.iter().filter(|e| e.is_speech()) {
                                if !socket.send_json(event).await {
                                    open = false;
                                    break;
                                }
                            }
                            if !open {
                                break;
                            }
                        }
                        Err(e) => warn!(session = %dir.id, error = %e, "audio read failed, skipping update"),
                    }
                }
                Some(WatchSignal::Error(e)) => warn!(session = %dir.id, error = %e, "live watch error"),
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

    sub.close();
    socket.finish().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn throttle_first_push_is_free() {
        let t = Throttle::new(Duration::from_millis(1000));
        assert!(t.ready(Instant::now()));
    }

    #[test]
    fn throttle_blocks_inside_window() {
        let start = Instant::now();
        let mut t = Throttle::new(Duration::from_millis(1000));
        t.record(start);
        assert!(!t.ready(start + Duration::from_millis(999)));
        assert!(t.ready(start + Duration::from_millis(1000)));
    }

    proptest! {
        #[test]
        fn throttled_pushes_are_spaced(offsets in proptest::collection::vec(0u64..5_000, 1..200)) {
            let start = Instant::now();
            let mut offsets = offsets;
            offsets.sort_unstable();
            let mut t = Throttle::new(Duration::from_millis(1000));
            let mut pushed: Vec<u64> = Vec::new();
            for ms in offsets {
                let now = start + Duration::from_millis(ms);
                if t.ready(now) {
                    t.record(now);
                    pushed.push(ms);
                }
            }
            for pair in pushed.windows(2) {
                prop_assert!(pair[1] - pair[0] >= 1000);
            }
        }
    }

    #[tokio::test]
    async fn latest_frame_payload() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("100.jpg"), b"old").unwrap();
        std::fs::write(dir.path().join("200.jpg"), b"new").unwrap();
        let frame = load_latest_frame(dir.path()).await.unwrap().unwrap();
        assert_eq!(frame.frame_id, "200");
        assert_eq!(frame.timestamp, 200);
        assert_eq!(frame.data, encode_frame(b"new"));
        assert_eq!(frame.format, "jpeg");
    }

    #[tokio::test]
    async fn no_frames_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_latest_frame(dir.path()).await.unwrap().is_none());
    }

    #[test]
    fn vision_push_shape() {
        let push = VisionPush {
            kind: "frame",
            frame: FramePayload {
                frame_id: "200".into(),
                timestamp: 200,
                data: "AA==".into(),
                format: "jpeg",
            },
        };
        let v = serde_json::to_value(&push).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "type": "frame",
                "frame_id": "200",
                "timestamp": 200,
                "data": "AA==",
                "format": "jpeg"
            })
        );
    }

    #[test]
    fn combined_push_with_no_frame_is_null() {
        let push = CombinedPush {
            kind: "combined",
            timestamp: 1,
            frame: None,
            speech: vec![],
        };
        let v = serde_json::to_value(&push).unwrap();
        assert!(v["frame"].is_null());
        assert_eq!(v["type"], "combined");
        assert_eq!(v["speech"], serde_json::json!([]));
    }
}
