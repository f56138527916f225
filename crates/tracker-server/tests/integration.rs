//! End-to-end tests against a real listener, driven with a WebSocket client
//! and an HTTP client.

use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use tracker_server::GatewayServer;
use tracker_settings::{GatewaySettings, ServiceCommand};

const TIMEOUT: Duration = Duration::from_secs(5);
const SESSION: &str = "2025-01-01T00-00-00-000Z";

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct Harness {
    server: Arc<GatewayServer>,
    addr: SocketAddr,
    root: tempfile::TempDir,
}

impl Harness {
    fn url(&self, path: &str) -> String {
        format!("ws://{}{path}", self.addr)
    }

    fn http(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Create the session directory by hand, the way the capture agent does.
    fn session(&self) -> PathBuf {
        let dir = self.root.path().join(SESSION);
        std::fs::create_dir_all(dir.join("frames")).unwrap();
        dir
    }

    fn events(&self) -> PathBuf {
        self.root.path().join(SESSION).join("events.ndjson")
    }
}

fn sleeper() -> ServiceCommand {
    ServiceCommand {
        program: "/bin/sh".into(),
        args: vec!["-c".into(), "sleep 30 & wait".into()],
        cwd: None,
    }
}

/// Boot a test server on an ephemeral port over a fresh session root.
async fn boot_server(configure: impl FnOnce(&mut GatewaySettings)) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let mut settings = GatewaySettings::default();
    settings.server.port = 0;
    settings.sessions.root = root.path().to_path_buf();
    settings.terminal.shell = Some("/bin/sh".into());
    settings.services.audio = sleeper();
    settings.services.vision = sleeper();
    settings.services.stop_grace_ms = 200;
    settings.services.stop_when_idle = false;
    configure(&mut settings);

    let server = Arc::new(GatewayServer::new(settings));
    let (addr, _handle) = server.listen().await.unwrap();
    Harness { server, addr, root }
}

fn append(path: &Path, text: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

fn record(t: i64, etype: &str, extra: &Value) -> String {
    let mut v = json!({"t": t, "etype": etype});
    if let (Some(obj), Some(extra)) = (v.as_object_mut(), extra.as_object()) {
        obj.extend(extra.clone());
    }
    format!("{v}\n")
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

/// Read the next text message as JSON.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Read a text message if one arrives within `dur`.
async fn try_read_json(ws: &mut WsStream, dur: Duration) -> Option<Value> {
    timeout(dur, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str::<Value>(&text).ok(),
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Read until the server closes; returns the close code, if any.
async fn read_close_code(ws: &mut WsStream) -> Option<u16> {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for close");
        match msg {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
            Some(Ok(_)) => {}
            Some(Err(_)) | None => return None,
        }
    }
}

async fn read_until_type(ws: &mut WsStream, kind: &str) -> Value {
    loop {
        let msg = read_json(ws).await;
        if msg["type"] == kind {
            return msg;
        }
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < TIMEOUT {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

fn pid_alive(pid: u32) -> bool {
    let pid = nix::unistd::Pid::from_raw(i32::try_from(pid).unwrap());
    nix::sys::signal::kill(pid, None).is_ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Timeline
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn timeline_since_filters_catch_up() {
    let h = boot_server(|_| {}).await;
    let _ = h.session();
    append(&h.events(), &record(1000, "ui.frame", &json!({"frame_id": "1000"})));
    append(&h.events(), &record(2000, "marker.bookmark", &json!({"label": "x"})));

    let mut ws = connect(&h.url("/timeline?since=1500")).await;
    let msg = read_json(&mut ws).await;
    assert_eq!(msg, json!({"t": 2000, "etype": "marker.bookmark", "label": "x"}));
    assert!(try_read_json(&mut ws, Duration::from_millis(300)).await.is_none());

    append(&h.events(), &record(1200, "marker.bookmark", &json!({"label": "late"})));
    append(&h.events(), &record(3000, "marker.bookmark", &json!({"label": "y"})));
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["label"], "y");

    h.server.shutdown().shutdown();
}

#[tokio::test]
async fn timeline_replays_then_streams_every_record_once() {
    let h = boot_server(|_| {}).await;
    let _ = h.session();
    append(&h.events(), &record(1, "session.created", &json!({"session": SESSION})));
    append(&h.events(), "this is not json\n");
    append(&h.events(), &record(2, "marker.bookmark", &json!({"label": "a"})));

    let mut ws = connect(&h.url("/timeline")).await;
    assert_eq!(read_json(&mut ws).await["t"], 1);
    assert_eq!(read_json(&mut ws).await["t"], 2);

    // Mixed batching: single lines, a multi-line write, and a split line.
    for t in 10..15 {
        append(&h.events(), &record(t, "marker.bookmark", &json!({"label": t})));
    }
    let batch: String = (15..25)
        .map(|t| record(t, "speech.final", &json!({"text": format!("s{t}")})))
        .collect();
    append(&h.events(), &batch);
    let split = record(25, "marker.bookmark", &json!({"label": "split"}));
    let (head, tail) = split.split_at(split.len() / 2);
    append(&h.events(), head);
    tokio::time::sleep(Duration::from_millis(100)).await;
    append(&h.events(), tail);

    let mut seen = Vec::new();
    for _ in 10..26 {
        seen.push(read_json(&mut ws).await["t"].as_i64().unwrap());
    }
    assert_eq!(seen, (10..26).collect::<Vec<i64>>());
    assert!(try_read_json(&mut ws, Duration::from_millis(300)).await.is_none());

    h.server.shutdown().shutdown();
}

#[tokio::test]
async fn timeline_releases_watch_on_close() {
    let h = boot_server(|_| {}).await;
    let _ = h.session();
    append(&h.events(), &record(1, "marker.bookmark", &json!({"label": "a"})));

    let mut ws = connect(&h.url("/timeline")).await;
    let _ = read_json(&mut ws).await;
    assert_eq!(h.server.state().watches.active(), 1);

    ws.close(None).await.unwrap();
    let watches = h.server.state().watches.clone();
    assert!(wait_until(|| watches.active() == 0).await);

    h.server.shutdown().shutdown();
}

#[tokio::test]
async fn log_channels_without_session_close_4004() {
    let h = boot_server(|_| {}).await;
    for path in ["/timeline", "/live/vision", "/live/audio", "/live/combined"] {
        let mut ws = connect(&h.url(path)).await;
        assert_eq!(read_close_code(&mut ws).await, Some(4004), "{path}");
    }
    h.server.shutdown().shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Multiplexer
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_path_closes_4404_without_affecting_timeline() {
    let h = boot_server(|_| {}).await;
    let _ = h.session();
    append(&h.events(), &record(1, "marker.bookmark", &json!({"label": "a"})));

    let mut timeline = connect(&h.url("/timeline")).await;
    assert_eq!(read_json(&mut timeline).await["t"], 1);

    let mut bogus = connect(&h.url("/bogus")).await;
    assert_eq!(read_close_code(&mut bogus).await, Some(4404));

    append(&h.events(), &record(2, "marker.bookmark", &json!({"label": "b"})));
    assert_eq!(read_json(&mut timeline).await["t"], 2);

    h.server.shutdown().shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Live channels
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn live_vision_pushes_latest_frame_on_connect() {
    let h = boot_server(|_| {}).await;
    let dir = h.session();
    std::fs::write(dir.join("frames/100.jpg"), b"first").unwrap();
    std::fs::write(dir.join("frames/200.jpg"), b"second").unwrap();

    let mut ws = connect(&h.url("/live/vision")).await;
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "frame");
    assert_eq!(msg["frame_id"], "200");
    assert_eq!(msg["timestamp"], 200);
    assert_eq!(msg["format"], "jpeg");
    assert_eq!(msg["data"], "c2Vjb25k");

    h.server.shutdown().shutdown();
}

#[tokio::test]
async fn live_vision_throttles_bursts() {
    let h = boot_server(|_| {}).await;
    let dir = h.session();
    std::fs::write(dir.join("frames/1000.jpg"), b"f").unwrap();

    let mut ws = connect(&h.url("/live/vision")).await;
    let _ = read_json(&mut ws).await;
    let start = Instant::now();

    let writer = {
        let events = h.events();
        let frames = dir.join("frames");
        tokio::spawn(async move {
            for i in 0..15_i64 {
                let t = 2000 + i;
                std::fs::write(frames.join(format!("{t}.jpg")), b"f").unwrap();
                append(&events, &record(t, "ui.frame", &json!({"frame_id": t.to_string()})));
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
    };

    let mut pushes = 0;
    while start.elapsed() < Duration::from_millis(2400) {
        if try_read_json(&mut ws, Duration::from_millis(200)).await.is_some() {
            pushes += 1;
        }
    }
    writer.await.unwrap();

    // 15 notifications over ~1.5 s admit at most two pushes after the first.
    assert!(pushes >= 1, "expected at least one throttled push");
    assert!(pushes <= 2, "throttle let through {pushes} pushes");

    h.server.shutdown().shutdown();
}

#[tokio::test]
async fn live_audio_replays_recent_speech_then_streams() {
    let h = boot_server(|_| {}).await;
    let _ = h.session();
    append(&h.events(), &record(1, "speech.final", &json!({"text": "too old"})));
    for t in 2..8 {
        append(&h.events(), &record(t, "ui.frame", &json!({"frame_id": t.to_string()})));
    }
    append(&h.events(), &record(8, "speech.final", &json!({"text": "hello"})));
    for t in 9..12 {
        append(&h.events(), &record(t, "ui.frame", &json!({"frame_id": t.to_string()})));
    }
    append(&h.events(), &record(12, "speech.final", &json!({"text": "world"})));

    let mut ws = connect(&h.url("/live/audio")).await;
    assert_eq!(read_json(&mut ws).await["text"], "hello");
    assert_eq!(read_json(&mut ws).await["text"], "world");
    assert!(try_read_json(&mut ws, Duration::from_millis(300)).await.is_none());

    append(&h.events(), &record(13, "ui.frame", &json!({"frame_id": "13"})));
    append(
        &h.events(),
        &format!(
            "{}{}",
            record(14, "speech.final", &json!({"text": "one"})),
            record(15, "speech.final", &json!({"text": "two"}))
        ),
    );
    let first = read_json(&mut ws).await;
    assert_eq!(first["etype"], "speech.final");
    assert_eq!(first["text"], "one");
    assert_eq!(read_json(&mut ws).await["text"], "two");

    h.server.shutdown().shutdown();
}

#[tokio::test]
async fn live_combined_bundles_frame_and_speech() {
    let h = boot_server(|_| {}).await;
    let _ = h.session();
    for t in 1..=7 {
        append(&h.events(), &record(t, "speech.final", &json!({"text": format!("s{t}")})));
    }

    let mut ws = connect(&h.url("/live/combined")).await;
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "combined");
    assert!(msg["frame"].is_null());
    let texts: Vec<&str> = msg["speech"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, ["s3", "s4", "s5", "s6", "s7"]);
    assert!(msg["timestamp"].is_i64());

    h.server.shutdown().shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// Terminal
// ─────────────────────────────────────────────────────────────────────────────

async fn send_json(ws: &mut WsStream, value: &Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminal_round_trip_and_cleanup_on_close() {
    let h = boot_server(|_| {}).await;
    let mut ws = connect(&h.url("/terminal")).await;

    send_json(&mut ws, &json!({"type": "init", "session": "t1"})).await;
    let ack = read_until_type(&mut ws, "session_created").await;
    assert_eq!(ack["session"], "t1");

    send_json(&mut ws, &json!({"type": "input", "session": "t1", "data": "echo term-$((40+2))\n"})).await;
    let mut output = String::new();
    while !output.contains("term-42") {
        let msg = read_until_type(&mut ws, "output").await;
        output.push_str(msg["data"].as_str().unwrap());
    }

    send_json(&mut ws, &json!({"type": "resize", "session": "t1", "cols": 120, "rows": 40})).await;
    send_json(&mut ws, &json!({"type": "input", "session": "unknown", "data": "x"})).await;

    let terminals = Arc::clone(&h.server.state().terminals);
    let pid = terminals.pid("t1").unwrap();
    assert!(pid_alive(pid));

    ws.close(None).await.unwrap();
    drop(ws);
    assert!(wait_until(|| !terminals.contains("t1")).await);
    assert!(wait_until(|| !pid_alive(pid)).await, "shell survived socket close");

    h.server.shutdown().shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminal_exit_is_reported() {
    let h = boot_server(|_| {}).await;
    let mut ws = connect(&h.url("/terminal")).await;

    send_json(&mut ws, &json!({"type": "init", "session": "t2"})).await;
    let _ = read_until_type(&mut ws, "session_created").await;
    send_json(&mut ws, &json!({"type": "input", "session": "t2", "data": "exit 3\n"})).await;

    let exit = read_until_type(&mut ws, "exit").await;
    assert_eq!(exit, json!({"type": "exit", "session": "t2", "exitCode": 3}));
    assert!(!h.server.state().terminals.contains("t2"));

    h.server.shutdown().shutdown();
}

#[tokio::test]
async fn terminal_malformed_frame_closes_4400() {
    let h = boot_server(|_| {}).await;
    let mut ws = connect(&h.url("/terminal")).await;
    ws.send(Message::text("{not json")).await.unwrap();
    assert_eq!(read_close_code(&mut ws).await, Some(4400));
    h.server.shutdown().shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminal_token_owned_elsewhere_closes_4409() {
    let h = boot_server(|_| {}).await;
    let mut owner = connect(&h.url("/terminal")).await;
    send_json(&mut owner, &json!({"type": "init", "session": "shared"})).await;
    let _ = read_until_type(&mut owner, "session_created").await;

    let mut intruder = connect(&h.url("/terminal")).await;
    send_json(&mut intruder, &json!({"type": "init", "session": "shared"})).await;
    let err = read_until_type(&mut intruder, "error").await;
    assert_eq!(err["session"], "shared");
    assert_eq!(read_close_code(&mut intruder).await, Some(4409));

    // The owner's shell is untouched.
    assert!(h.server.state().terminals.contains("shared"));

    h.server.shutdown().shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminal_input_only_reaches_the_owners_shell() {
    let h = boot_server(|_| {}).await;
    let mut owner = connect(&h.url("/terminal")).await;
    send_json(&mut owner, &json!({"type": "init", "session": "mine"})).await;
    let _ = read_until_type(&mut owner, "session_created").await;

    let mut other = connect(&h.url("/terminal")).await;
    send_json(&mut other, &json!({"type": "input", "session": "mine", "data": "echo foreign-$((6*7))\n"})).await;
    send_json(&mut other, &json!({"type": "resize", "session": "mine", "cols": 10, "rows": 5})).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    send_json(&mut owner, &json!({"type": "input", "session": "mine", "data": "echo own-$((5*5))\n"})).await;
    let mut output = String::new();
    while !output.contains("own-25") {
        let msg = read_until_type(&mut owner, "output").await;
        output.push_str(msg["data"].as_str().unwrap());
    }
    assert!(!output.contains("foreign"), "{output:?}");

    // The other connection is still open and was not handed anything.
    assert!(try_read_json(&mut other, Duration::from_millis(200)).await.is_none());

    h.server.shutdown().shutdown();
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP control
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn session_create_then_frame_fetch() {
    let h = boot_server(|_| {}).await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(h.http("/control/session/create"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created["success"], true);
    let path = PathBuf::from(created["path"].as_str().unwrap());
    let log = std::fs::read_to_string(path.join("events.ndjson")).unwrap();
    assert!(log.contains("session.created"));

    std::fs::write(path.join("frames/1000.jpg"), b"jpeg-bytes").unwrap();
    let resp = client.get(h.http("/frame/1000")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"jpeg-bytes");

    let resp = client.get(h.http("/frame/999")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    h.server.shutdown().shutdown();
}

#[tokio::test]
async fn service_start_is_idempotent_and_stop_completes_session() {
    let h = boot_server(|_| {}).await;
    let client = reqwest::Client::new();
    let _: Value = client
        .post(h.http("/control/session/create"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let first: Value = client
        .post(h.http("/control/audio/start"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["success"], true);
    let pgid = h
        .server
        .state()
        .supervisor
        .pgid(tracker_supervisor::ServiceName::Audio)
        .unwrap();

    let second: Value = client
        .post(h.http("/control/audio/start"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["success"], false);

    let status: Value = client.get(h.http("/status")).send().await.unwrap().json().await.unwrap();
    assert_eq!(status["audio"], true);
    assert_eq!(status["vision"], false);
    assert_eq!(status["backend"], true);

    let meta: Value = client.get(h.http("/session")).send().await.unwrap().json().await.unwrap();
    assert_eq!(meta["status"], "recording");

    let stopped: Value = client
        .post(h.http("/control/audio/stop"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stopped["success"], true);
    assert!(h.server.state().supervisor.running().is_empty());
    assert!(wait_until(|| !pid_alive(u32::try_from(pgid).unwrap())).await);

    let again: Value = client
        .post(h.http("/control/audio/stop"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["success"], true);

    let meta: Value = client.get(h.http("/session")).send().await.unwrap().json().await.unwrap();
    assert_eq!(meta["status"], "completed");
    assert!(meta["endedAt"].is_string());

    h.server.shutdown().shutdown();
}

#[tokio::test]
async fn last_client_leaving_stops_services() {
    let h = boot_server(|s| s.services.stop_when_idle = true).await;
    let _ = h.session();
    append(&h.events(), &record(1, "marker.bookmark", &json!({"label": "a"})));
    let client = reqwest::Client::new();

    let mut ws = connect(&h.url("/timeline")).await;
    let _ = read_json(&mut ws).await;

    let started: Value = client
        .post(h.http("/control/vision/start"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(started["success"], true);

    ws.close(None).await.unwrap();
    drop(ws);

    let supervisor = Arc::clone(&h.server.state().supervisor);
    assert!(wait_until(|| supervisor.running().is_empty()).await);
    let status = Arc::clone(&h.server.state().status);
    assert!(wait_until(|| !status.snapshot().vision).await);

    h.server.shutdown().shutdown();
}

#[tokio::test]
async fn bookmark_reaches_timeline_subscribers() {
    let h = boot_server(|_| {}).await;
    let _ = h.session();
    append(&h.events(), &record(1, "session.created", &json!({"session": SESSION})));

    let mut ws = connect(&h.url("/timeline")).await;
    let _ = read_json(&mut ws).await;

    let resp: Value = reqwest::Client::new()
        .post(h.http("/control/bookmark"))
        .json(&json!({"label": "checkpoint"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp["success"], true);

    let msg = read_json(&mut ws).await;
    assert_eq!(msg["etype"], "marker.bookmark");
    assert_eq!(msg["label"], "checkpoint");
    assert_eq!(msg, resp["event"]);

    h.server.shutdown().shutdown();
}

#[tokio::test]
async fn close_kills_terminals_and_services() {
    let h = boot_server(|_| {}).await;
    let client = reqwest::Client::new();
    let started: Value = client
        .post(h.http("/control/vision/start"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(started["success"], true);
    let pgid = h
        .server
        .state()
        .supervisor
        .pgid(tracker_supervisor::ServiceName::Vision)
        .unwrap();

    h.server.close().await;
    assert!(h.server.state().supervisor.running().is_empty());
    assert!(!h.server.state().status.snapshot().vision);
    assert!(wait_until(|| !pid_alive(u32::try_from(pgid).unwrap())).await);
}
