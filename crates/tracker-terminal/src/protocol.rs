//! Terminal channel wire format.
//!
//! Client → server: `{type:"init"|"input"|"resize", session, ...}`.
//! Server → client: `{type:"output"|"exit"|"session_created"|"error", session, ...}`.

use serde::{Deserialize, Serialize};

/// Control frame sent by a terminal client.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Create (or re-attach to) the session `session`.
    Init {
        /// Session token.
        session: String,
        /// Initial columns; the configured default when absent.
        #[serde(default)]
        cols: Option<u16>,
        /// Initial rows; the configured default when absent.
        #[serde(default)]
        rows: Option<u16>,
    },
    /// Keystrokes for the shell.
    Input {
        /// Session token.
        session: String,
        /// Raw input text.
        data: String,
    },
    /// New terminal geometry.
    Resize {
        /// Session token.
        session: String,
        /// Columns.
        cols: u16,
        /// Rows.
        rows: u16,
    },
}

impl ClientFrame {
    /// Parse one text frame.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Frame pushed to a terminal client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Shell output.
    Output {
        /// Session token.
        session: String,
        /// Output text.
        data: String,
    },
    /// The shell exited on its own.
    Exit {
        /// Session token.
        session: String,
        /// Exit status.
        #[serde(rename = "exitCode")]
        exit_code: i32,
    },
    /// Acknowledges a successful `init`.
    SessionCreated {
        /// Session token.
        session: String,
    },
    /// A request could not be served.
    Error {
        /// Session token, when the request named one.
        #[serde(skip_serializing_if = "Option::is_none")]
        session: Option<String>,
        /// Human-readable reason.
        message: String,
    },
}

impl ServerFrame {
    /// Serialize for the socket.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
