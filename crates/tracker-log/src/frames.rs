//! Frame image storage.
//!
//! Frames are `<frame_id>.jpg` files in the session's frame directory. A
//! frame is complete once its final name exists: writers stage the bytes
//! under a hidden temporary name and rename into place.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::errors::{LogError, Result};

const FRAME_EXT: &str = ".jpg";

/// A frame on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRef {
    /// File stem, the capture timestamp.
    pub id: String,
    /// Full path.
    pub path: PathBuf,
}

/// Reject ids that could escape the frame directory.
pub fn validate_frame_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= 64
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(LogError::InvalidFrameId(id.to_owned()))
    }
}

fn frame_stem(name: &str) -> Option<&str> {
    if name.starts_with('.') {
        return None;
    }
    name.strip_suffix(FRAME_EXT).filter(|stem| !stem.is_empty())
}

/// The lexicographically greatest complete frame, if any.
pub async fn latest_frame(frames_dir: &Path) -> Result<Option<FrameRef>> {
    let mut entries = match tokio::fs::read_dir(frames_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut latest: Option<String> = None;
    while let Some(entry) = entries.next_entry().await? {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let Some(stem) = frame_stem(&name) else {
            continue;
        };
        if latest.as_deref().is_none_or(|l| stem > l) {
            latest = Some(stem.to_owned());
        }
    }

    Ok(latest.map(|id| FrameRef {
        path: frames_dir.join(format!("{id}{FRAME_EXT}")),
        id,
    }))
}

/// Number of complete frames.
pub async fn count_frames(frames_dir: &Path) -> Result<usize> {
    let mut entries = match tokio::fs::read_dir(frames_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut count = 0;
    while let Some(entry) = entries.next_entry().await? {
        if entry
            .file_name()
            .to_str()
            .and_then(frame_stem)
            .is_some()
        {
            count += 1;
        }
    }
    Ok(count)
}

/// Read a frame's bytes by id.
pub async fn read_frame(frames_dir: &Path, id: &str) -> Result<Vec<u8>> {
    validate_frame_id(id)?;
    let path = frames_dir.join(format!("{id}{FRAME_EXT}"));
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(LogError::FrameNotFound(id.to_owned()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Store a frame the way the capture agent does: write to a hidden
/// temporary name, then rename into place.
#[cfg(test)]
pub(crate) async fn write_frame(frames_dir: &Path, id: &str, bytes: &[u8]) -> Result<FrameRef> {
    validate_frame_id(id)?;
    tokio::fs::create_dir_all(frames_dir).await?;
    let path = frames_dir.join(format!("{id}{FRAME_EXT}"));
    let tmp = frames_dir.join(format!(".{id}{FRAME_EXT}.tmp"));
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(FrameRef {
        id: id.to_owned(),
        path,
    })
}

/// Text-safe transport encoding of frame bytes.
pub fn encode_frame(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
