//! Reading the most recent lines of a log without scanning it from the start.

use std::io::SeekFrom;
use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracker_core::events::Event;

use crate::errors::Result;
use crate::tail::parse_line;

const BACK_CHUNK: u64 = 8 * 1024;

/// Iterates complete lines of a file from last to first.
///
/// The segment after the final newline is an in-progress write and is never
/// yielded; [`end_offset`](Self::end_offset) points just past the last
/// complete line so a forward reader can resume there.
pub struct ReverseLines {
    file: Option<tokio::fs::File>,
    pos: u64,
    pending: Vec<u8>,
    end: Option<u64>,
}

impl ReverseLines {
    /// Open `path`; a missing file yields nothing.
    pub async fn open(path: &Path) -> Result<Self> {
        let file = match tokio::fs::File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    file: None,
                    pos: 0,
                    pending: Vec::new(),
                    end: Some(0),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        Ok(Self {
            file: Some(file),
            pos: len,
            pending: Vec::new(),
            end: None,
        })
    }

    /// Byte offset just past the last complete line.
    pub async fn end_offset(&mut self) -> Result<u64> {
        while self.end.is_none() {
            if !self.fill().await? {
                // No newline anywhere: nothing complete yet
                self.end = Some(0);
                self.pending.clear();
            }
        }
        Ok(self.end.unwrap_or(0))
    }

    /// The next line towards the start of the file, skipping blank lines.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        let _ = self.end_offset().await?;
        loop {
            if let Some(i) = self.pending.iter().rposition(|&b| b == b'\n') {
                let line = self.pending.split_off(i + 1);
                self.pending.truncate(i);
                if let Some(s) = Self::text(&line) {
                    return Ok(Some(s));
                }
                continue;
            }
            if self.pos == 0 {
                let line = std::mem::take(&mut self.pending);
                return Ok(Self::text(&line));
            }
            let _ = self.fill().await?;
        }
    }

    fn text(bytes: &[u8]) -> Option<String> {
        let s = String::from_utf8_lossy(bytes);
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_owned())
    }

    /// Read the chunk before `pos` into `pending`. Resolves `end` the first
    /// time a newline is seen. Returns `false` at the start of the file.
    async fn fill(&mut self) -> Result<bool> {
        let Some(file) = self.file.as_mut() else {
            return Ok(false);
        };
        if self.pos == 0 {
            return Ok(false);
        }
        let start = self.pos.saturating_sub(BACK_CHUNK);
        let mut chunk = vec![0u8; (self.pos - start) as usize];
        let _ = file.seek(SeekFrom::Start(start)).await?;
        let _ = file.read_exact(&mut chunk).await?;
        chunk.extend_from_slice(&self.pending);
        self.pending = chunk;
        self.pos = start;

        if self.end.is_none() {
            if let Some(i) = self.pending.iter().rposition(|&b| b == b'\n') {
                self.pending.truncate(i + 1);
                self.end = Some(start + i as u64 + 1);
            }
        }
        Ok(true)
    }
}

/// The last `n` complete non-blank lines, oldest first, and the offset just
/// past them.
pub async fn read_last_lines(path: &Path, n: usize) -> Result<(Vec<String>, u64)> {
    let mut rev = ReverseLines::open(path).await?;
    let end = rev.end_offset().await?;
    let mut lines = Vec::with_capacity(n);
    while lines.len() < n {
        match rev.next_line().await? {
            Some(line) => lines.push(line),
            None => break,
        }
    }
    lines.reverse();
    Ok((lines, end))
}

/// Up to `limit` most recent records matching `pred`, oldest first.
pub async fn recent_matching(
    path: &Path,
    limit: usize,
    pred: impl Fn(&Event) -> bool,
) -> Result<Vec<Event>> {
    let mut rev = ReverseLines::open(path).await?;
    let mut out = Vec::with_capacity(limit);
    while out.len() < limit {
        let Some(line) = rev.next_line().await? else {
            break;
        };
        if let Some(event) = parse_line(&line).filter(|e| pred(e)) {
            out.push(event);
        }
    }
    out.reverse();
    Ok(out)
}
