//! Event log records.
//!
//! Every line of a session log is a JSON object `{t, etype, ...payload}`.
//! `etype` is an open tag: a handful of kinds have a known payload shape and
//! get a typed variant, everything else is carried verbatim in
//! [`EventPayload::Unknown`]. Known kinds whose payload does not have the
//! expected shape also fall back to `Unknown` rather than failing the parse.
//!
//! Fields beyond the typed ones (`confidence`, `audio_file`, ...) are kept in
//! each variant's `extra` map so re-serialization preserves them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Known `etype` tags.
pub mod etype {
    /// A captured screen frame was written.
    pub const UI_FRAME: &str = "ui.frame";
    /// A user-placed bookmark.
    pub const BOOKMARK: &str = "marker.bookmark";
    /// A finalized speech-recognition result.
    pub const SPEECH_FINAL: &str = "speech.final";
    /// Seed record written when a session directory is created.
    pub const SESSION_CREATED: &str = "session.created";
}

/// A single log record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawEvent", into = "RawEvent")]
pub struct Event {
    /// Milliseconds since the Unix epoch.
    pub t: i64,
    /// Kind-specific payload.
    pub payload: EventPayload,
}

/// Typed payload of an [`Event`].
#[derive(Clone, Debug, PartialEq)]
pub enum EventPayload {
    /// `ui.frame`
    UiFrame {
        /// Name of the frame file without its extension.
        frame_id: String,
        /// Remaining fields.
        extra: Map<String, Value>,
    },
    /// `marker.bookmark`
    Bookmark {
        /// User-supplied label.
        label: String,
        /// Remaining fields.
        extra: Map<String, Value>,
    },
    /// `speech.final`
    SpeechFinal {
        /// Recognized text.
        text: String,
        /// Remaining fields (`confidence`, `audio_file`, ...).
        extra: Map<String, Value>,
    },
    /// `session.created`
    SessionCreated {
        /// Remaining fields.
        extra: Map<String, Value>,
    },
    /// Any other kind, or a known kind with an unexpected payload.
    Unknown {
        /// The raw tag.
        etype: String,
        /// All fields except `t` and `etype`.
        fields: Map<String, Value>,
    },
}

impl Event {
    /// Parse one log line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// Serialize to a single line without the trailing newline.
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Build a `marker.bookmark` record.
    pub fn bookmark(t: i64, label: impl Into<String>) -> Self {
        Self {
            t,
            payload: EventPayload::Bookmark {
                label: label.into(),
                extra: Map::new(),
            },
        }
    }

    /// Build the seed `session.created` record.
    pub fn session_created(t: i64, session: &str) -> Self {
        let mut extra = Map::new();
        let _ = extra.insert("session".into(), Value::String(session.to_owned()));
        Self {
            t,
            payload: EventPayload::SessionCreated { extra },
        }
    }

    /// The record's `etype` tag.
    pub fn etype(&self) -> &str {
        match &self.payload {
            EventPayload::UiFrame { .. } => etype::UI_FRAME,
            EventPayload::Bookmark { .. } => etype::BOOKMARK,
            EventPayload::SpeechFinal { .. } => etype::SPEECH_FINAL,
            EventPayload::SessionCreated { .. } => etype::SESSION_CREATED,
            EventPayload::Unknown { etype, .. } => etype,
        }
    }

    /// Whether this is a well-formed `speech.final` record.
    pub fn is_speech(&self) -> bool {
        matches!(self.payload, EventPayload::SpeechFinal { .. })
    }

    /// Frame id for `ui.frame` records.
    pub fn frame_id(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::UiFrame { frame_id, .. } => Some(frame_id),
            _ => None,
        }
    }
}

/// Wire shape shared by every record.
#[derive(Serialize, Deserialize)]
struct RawEvent {
    #[serde(deserialize_with = "timestamp_ms")]
    t: i64,
    etype: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl From<RawEvent> for Event {
    fn from(raw: RawEvent) -> Self {
        let RawEvent {
            t,
            etype,
            mut fields,
        } = raw;

        let payload = match etype.as_str() {
            etype::UI_FRAME => match take_text(&mut fields, "frame_id", true) {
                Some(frame_id) => EventPayload::UiFrame {
                    frame_id,
                    extra: fields,
                },
                None => EventPayload::Unknown { etype, fields },
            },
            etype::BOOKMARK => match take_text(&mut fields, "label", false) {
                Some(label) => EventPayload::Bookmark {
                    label,
                    extra: fields,
                },
                None => EventPayload::Unknown { etype, fields },
            },
            etype::SPEECH_FINAL => match take_text(&mut fields, "text", false) {
                Some(text) => EventPayload::SpeechFinal {
                    text,
                    extra: fields,
                },
                None => EventPayload::Unknown { etype, fields },
            },
            etype::SESSION_CREATED => EventPayload::SessionCreated { extra: fields },
            _ => EventPayload::Unknown { etype, fields },
        };

        Self { t, payload }
    }
}

impl From<Event> for RawEvent {
    fn from(event: Event) -> Self {
        let etype = event.etype().to_owned();
        let fields = match event.payload {
            EventPayload::UiFrame {
                frame_id,
                mut extra,
            } => {
                let _ = extra.insert("frame_id".into(), Value::String(frame_id));
                extra
            }
            EventPayload::Bookmark { label, mut extra } => {
                let _ = extra.insert("label".into(), Value::String(label));
                extra
            }
            EventPayload::SpeechFinal { text, mut extra } => {
                let _ = extra.insert("text".into(), Value::String(text));
                extra
            }
            EventPayload::SessionCreated { extra } => extra,
            EventPayload::Unknown { fields, .. } => fields,
        };
        Self {
            t: event.t,
            etype,
            fields,
        }
    }
}

/// Remove `key` if it holds a string (or, when allowed, an integer).
/// Leaves the map untouched otherwise.
fn take_text(fields: &mut Map<String, Value>, key: &str, allow_integer: bool) -> Option<String> {
    let text = match fields.get(key)? {
        Value::String(s) => s.clone(),
        Value::Number(n) if allow_integer && n.is_i64() => n.to_string(),
        _ => return None,
    };
    let _ = fields.remove(key);
    Some(text)
}

/// Accept integer timestamps, and floats truncated to whole milliseconds.
fn timestamp_ms<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let n = serde_json::Number::deserialize(deserializer)?;
    if let Some(v) = n.as_i64() {
        return Ok(v);
    }
    n.as_f64()
        .filter(|v| v.is_finite())
        .map(|v| v as i64)
        .ok_or_else(|| serde::de::Error::custom("timestamp out of range"))
}
