//! Forward reading of a growing log and change notification.
//!
//! [`TailCursor`] reads complete lines from a tracked byte offset, so a
//! reader that drains it after every change notification sees each appended
//! record exactly once. A trailing line without its newline is left unread
//! until the writer finishes it.
//!
//! [`Subscription`] wraps a filesystem watch on the log's parent directory
//! (the log may not exist yet) filtered to the log's file name. Installing
//! the subscription before draining the cursor closes the gap between
//! catch-up and live delivery: anything appended after the drain started is
//! either read by the drain or signalled by the watch.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use tracker_core::events::Event;

use crate::errors::Result;

/// Bytes read per step when scanning forward.
const READ_CHUNK: usize = 64 * 1024;

/// Queued change notifications per subscription; extras are coalesced.
const WATCH_QUEUE: usize = 64;

/// Parse one log line, skipping blanks and malformed records.
pub fn parse_line(line: &str) -> Option<Event> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match Event::from_line(line) {
        Ok(event) => Some(event),
        Err(e) => {
            trace!(error = %e, "skipping malformed log line");
            None
        }
    }
}

fn parse_bytes(bytes: &[u8]) -> Option<Event> {
    match std::str::from_utf8(bytes) {
        Ok(line) => parse_line(line),
        Err(e) => {
            trace!(error = %e, "skipping non-UTF-8 log line");
            None
        }
    }
}

/// Reads records appended to a log after a byte offset.
#[derive(Clone, Debug)]
pub struct TailCursor {
    path: PathBuf,
    offset: u64,
    since: Option<i64>,
}

impl TailCursor {
    /// A cursor at the start of `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::at_offset(path, 0)
    }

    /// A cursor positioned at `offset`, which must be a line boundary.
    pub fn at_offset(path: impl Into<PathBuf>, offset: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            since: None,
        }
    }

    /// Only yield records with `t >= since`.
    #[must_use]
    pub fn with_since(mut self, since: Option<i64>) -> Self {
        self.since = since;
        self
    }

    /// Byte offset just past the last consumed line.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The log being read.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn admits(&self, event: &Event) -> bool {
        self.since.is_none_or(|since| event.t >= since)
    }

    /// Read the next run of complete lines.
    ///
    /// Returns `None` once no complete line remains past the offset. A
    /// `Some` batch may be empty when every line in it was filtered out or
    /// malformed; callers keep reading until `None`.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<Event>>> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata().await?.len();
        if len < self.offset {
            warn!(path = %self.path.display(), offset = self.offset, len, "log shrank, rereading from start");
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(None);
        }
        let _ = file.seek(SeekFrom::Start(self.offset)).await?;

        let mut buf = Vec::with_capacity(READ_CHUNK.min((len - self.offset) as usize));
        let mut scanned = 0;
        let end = loop {
            let read = (&mut file)
                .take(READ_CHUNK as u64)
                .read_to_end(&mut buf)
                .await?;
            if let Some(pos) = buf[scanned..].iter().rposition(|&b| b == b'\n') {
                break Some(scanned + pos);
            }
            scanned = buf.len();
            if read < READ_CHUNK {
                break None;
            }
        };
        let Some(end) = end else {
            return Ok(None);
        };

        let events = buf[..end]
            .split(|&b| b == b'\n')
            .filter_map(parse_bytes)
            .filter(|e| self.admits(e))
            .collect();
        self.offset += end as u64 + 1;
        Ok(Some(events))
    }

    /// Read every complete line past the offset.
    pub async fn drain(&mut self) -> Result<Vec<Event>> {
        let mut out = Vec::new();
        while let Some(mut batch) = self.next_chunk().await? {
            out.append(&mut batch);
        }
        Ok(out)
    }
}

/// Count records in a log matching `pred`.
pub async fn count_matching(path: &Path, pred: impl Fn(&Event) -> bool) -> Result<usize> {
    let mut cursor = TailCursor::new(path);
    let mut count = 0;
    while let Some(batch) = cursor.next_chunk().await? {
        count += batch.iter().filter(|e| pred(e)).count();
    }
    Ok(count)
}

/// Process-wide count of installed watches.
#[derive(Clone, Debug, Default)]
pub struct WatchCounter(Arc<AtomicUsize>);

impl WatchCounter {
    /// Create a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Watches currently installed.
    pub fn active(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a subscription reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchSignal {
    /// The log was created or modified.
    Changed,
    /// The watch backend reported an error.
    Error(String),
}

/// A cancellable change watch on one log file.
///
/// [`close`](Self::close) is idempotent and also runs on drop.
pub struct Subscription {
    watcher: Option<RecommendedWatcher>,
    rx: mpsc::Receiver<WatchSignal>,
    counter: WatchCounter,
}

impl Subscription {
    /// Install a watch for `path`.
    pub fn open(path: &Path, counter: &WatchCounter) -> Result<Self> {
        let (tx, rx) = mpsc::channel(WATCH_QUEUE);
        let target = path.file_name().map(std::ffi::OsStr::to_os_string);

        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    let is_target = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == target.as_deref());
                    if !is_target {
                        return;
                    }
                    if let EventKind::Modify(_) | EventKind::Create(_) = event.kind {
                        // Full queue: the pending signal already covers this change
                        let _ = tx.try_send(WatchSignal::Changed);
                    }
                }
                Err(e) => {
                    let _ = tx.try_send(WatchSignal::Error(e.to_string()));
                }
            })?;

        let watch_dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;

        let _ = counter.0.fetch_add(1, Ordering::SeqCst);
        debug!(path = %path.display(), "log watch installed");
        Ok(Self {
            watcher: Some(watcher),
            rx,
            counter: counter.clone(),
        })
    }

    /// Wait for the next signal; `None` once closed.
    pub async fn changed(&mut self) -> Option<WatchSignal> {
        if self.watcher.is_none() {
            return None;
        }
        self.rx.recv().await
    }

    /// Discard queued signals, returning how many were dropped.
    pub fn drain_pending(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Release the watch.
    pub fn close(&mut self) {
        if self.watcher.take().is_some() {
            self.rx.close();
            let _ = self.counter.0.fetch_sub(1, Ordering::SeqCst);
            debug!("log watch released");
        }
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.watcher.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
