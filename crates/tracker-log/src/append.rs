//! Atomic append to a session log.

use std::io::Write;
use std::path::Path;

use tokio::sync::Mutex;
use tracing::debug;
use tracker_core::events::Event;

use crate::errors::Result;

/// Serialized appender for session logs.
///
/// Each record is written as `json + "\n"` in a single `write` on a file
/// opened in append mode. The lock keeps appends issued by this process from
/// interleaving with each other.
#[derive(Debug, Default)]
pub struct EventLog {
    lock: Mutex<()>,
}

impl EventLog {
    /// Create an appender.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `event` to the log at `path`, creating the file if needed.
    pub async fn append(&self, path: &Path, event: &Event) -> Result<()> {
        let mut line = event.to_line()?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        let path = path.to_path_buf();
        let etype = event.etype().to_owned();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(line.as_bytes())
        })
        .await??;
        debug!(etype = %etype, "event appended");
        Ok(())
    }
}
