//! Session directory resolution, creation and metadata.
//!
//! A session is a directory under the session root named by its
//! [`SessionId`]. The current session is the lexicographically greatest
//! subdirectory that is neither hidden nor the archive directory. Nothing is
//! cached: every call re-lists the root, since a new session can be created
//! while the gateway runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use tracker_core::constants::META_VERSION;
use tracker_core::events::Event;
use tracker_core::ids::SessionId;
use tracker_settings::SessionSettings;

use crate::append::EventLog;
use crate::errors::{LogError, Result};
use crate::frames;

const META_FILE: &str = "meta.json";
const AUDIO_CHUNKS: &str = "audio/chunks";

/// Lifecycle status recorded in `meta.json`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, nothing capturing yet.
    #[default]
    Active,
    /// At least one capture service was started.
    Recording,
    /// Capture stopped.
    Completed,
}

/// Contents of a session's `meta.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    /// Schema version.
    pub version: String,
    /// Session identifier (directory name).
    pub session_id: SessionId,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Creation time; absent for sessions created by another writer.
    pub started_at: Option<DateTime<Utc>>,
    /// When capture stopped.
    pub ended_at: Option<DateTime<Utc>>,
    /// Frames on disk at the last refresh.
    pub frame_count: u64,
    /// `speech.final` records at the last refresh.
    pub speech_count: u64,
    /// Nominal capture rate of the vision agent.
    pub fps_baseline: u32,
}

impl SessionMeta {
    fn new(session_id: SessionId, started_at: Option<DateTime<Utc>>) -> Self {
        Self {
            version: META_VERSION.into(),
            session_id,
            status: SessionStatus::Active,
            started_at,
            ended_at: None,
            frame_count: 0,
            speech_count: 0,
            fps_baseline: 2,
        }
    }
}

/// Paths of one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionDir {
    /// Session identifier.
    pub id: SessionId,
    /// The session directory.
    pub path: PathBuf,
    /// The session's event log.
    pub events: PathBuf,
    /// The session's frame directory.
    pub frames: PathBuf,
}

impl SessionDir {
    /// Path of `meta.json`.
    pub fn meta_path(&self) -> PathBuf {
        self.path.join(META_FILE)
    }
}

/// Resolves and creates sessions under a root directory.
#[derive(Clone, Debug)]
pub struct SessionStore {
    root: PathBuf,
    events_file: String,
    frames_dir: String,
    archived_dir: String,
    meta_lock: Arc<Mutex<()>>,
}

impl SessionStore {
    /// Create a store from the session settings.
    pub fn new(settings: &SessionSettings) -> Self {
        Self {
            root: settings.root.clone(),
            events_file: settings.events_file.clone(),
            frames_dir: settings.frames_dir.clone(),
            archived_dir: settings.archived_dir.clone(),
            meta_lock: Arc::new(Mutex::new(())),
        }
    }

    /// The session root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, id: SessionId) -> SessionDir {
        let path = self.root.join(id.as_str());
        SessionDir {
            events: path.join(&self.events_file),
            frames: path.join(&self.frames_dir),
            path,
            id,
        }
    }

    /// Resolve the current session.
    pub async fn current(&self) -> Result<SessionDir> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(LogError::NoSession),
            Err(e) => return Err(e.into()),
        };

        let mut latest: Option<String> = None;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || name == self.archived_dir {
                continue;
            }
            if latest.as_ref().is_none_or(|l| name > *l) {
                latest = Some(name);
            }
        }

        let name = latest.ok_or(LogError::NoSession)?;
        Ok(self.dir_for(SessionId::from_dir_name(&name)))
    }

    /// Create a new session named after `now`.
    ///
    /// Creates the directory (exclusively), its frame and audio chunk
    /// directories and `meta.json`, then appends the seed `session.created`
    /// record through `log`.
    pub async fn create(&self, now: DateTime<Utc>, log: &EventLog) -> Result<SessionDir> {
        tokio::fs::create_dir_all(&self.root).await?;
        let dir = self.dir_for(SessionId::from_time(now));

        match tokio::fs::create_dir(&dir.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(LogError::SessionExists(dir.id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&dir.frames).await?;
        tokio::fs::create_dir_all(dir.path.join(AUDIO_CHUNKS)).await?;

        let meta = SessionMeta::new(dir.id.clone(), Some(now));
        write_meta(&dir, &meta).await?;
        log.append(
            &dir.events,
            &Event::session_created(now.timestamp_millis(), dir.id.as_str()),
        )
        .await?;

        info!(session = %dir.id, path = %dir.path.display(), "session created");
        Ok(dir)
    }

    /// Read a session's metadata, synthesizing it when `meta.json` is absent.
    pub async fn meta(&self, dir: &SessionDir) -> Result<SessionMeta> {
        read_meta(dir).await
    }

    /// Read-modify-write a session's metadata.
    pub async fn update_meta<F>(&self, dir: &SessionDir, apply: F) -> Result<SessionMeta>
    where
        F: FnOnce(&mut SessionMeta),
    {
        let _guard = self.meta_lock.lock().await;
        let mut meta = read_meta(dir).await?;
        apply(&mut meta);
        write_meta(dir, &meta).await?;
        debug!(session = %dir.id, status = ?meta.status, "session meta updated");
        Ok(meta)
    }

    /// Mark the session completed and refresh its counters.
    pub async fn complete(&self, dir: &SessionDir, now: DateTime<Utc>) -> Result<SessionMeta> {
        let frame_count = frames::count_frames(&dir.frames).await?;
        let speech_count = crate::tail::count_matching(&dir.events, Event::is_speech).await?;
        self.update_meta(dir, |meta| {
            meta.status = SessionStatus::Completed;
            meta.ended_at = Some(now);
            meta.frame_count = frame_count as u64;
            meta.speech_count = speech_count as u64;
        })
        .await
    }
}

async fn read_meta(dir: &SessionDir) -> Result<SessionMeta> {
    match tokio::fs::read(dir.meta_path()).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(meta) => Ok(meta),
            Err(e) => {
                warn!(session = %dir.id, error = %e, "unreadable meta.json, rebuilding");
                Ok(SessionMeta::new(dir.id.clone(), None))
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok(SessionMeta::new(dir.id.clone(), None))
        }
        Err(e) => Err(e.into()),
    }
}

async fn write_meta(dir: &SessionDir, meta: &SessionMeta) -> Result<()> {
    let json = serde_json::to_vec_pretty(meta)?;
    let tmp = dir.path.join(format!(".{META_FILE}.tmp"));
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, dir.meta_path()).await?;
    Ok(())
}
