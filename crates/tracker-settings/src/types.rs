//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may specify any subset of fields.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracker_core::constants::DEFAULT_PORT;
use tracker_core::logging::LogFormat;

/// Root settings for the gateway.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Network listener.
    pub server: ServerSettings,
    /// Session directory layout.
    pub sessions: SessionSettings,
    /// Live channel pacing.
    pub live: LiveSettings,
    /// Interactive terminal defaults.
    pub terminal: TerminalSettings,
    /// Supervised external processes.
    pub services: ServiceSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// Listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Outbound message queue per connection.
    pub send_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            send_queue: 256,
        }
    }
}

/// Where sessions live on disk and how their contents are named.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Directory containing one subdirectory per session.
    pub root: PathBuf,
    /// Log file name inside a session directory.
    pub events_file: String,
    /// Frame directory name inside a session directory.
    pub frames_dir: String,
    /// Subdirectory of `root` that is never treated as a session.
    pub archived_dir: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("sessions"),
            events_file: "events.ndjson".into(),
            frames_dir: "frames".into(),
            archived_dir: "archived".into(),
        }
    }
}

/// Pacing of the latest-value channels.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveSettings {
    /// Minimum spacing between two vision pushes.
    pub vision_throttle_ms: u64,
    /// Minimum spacing between two combined snapshots.
    pub combined_throttle_ms: u64,
    /// Log lines scanned for speech on audio connect.
    pub audio_replay_lines: usize,
    /// Speech records bundled into a combined snapshot.
    pub combined_speech_limit: usize,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            vision_throttle_ms: 1000,
            combined_throttle_ms: 2000,
            audio_replay_lines: 10,
            combined_speech_limit: 5,
        }
    }
}

impl LiveSettings {
    /// Vision window as a [`Duration`].
    pub fn vision_window(&self) -> Duration {
        Duration::from_millis(self.vision_throttle_ms)
    }

    /// Combined window as a [`Duration`].
    pub fn combined_window(&self) -> Duration {
        Duration::from_millis(self.combined_throttle_ms)
    }
}

/// Terminal defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TerminalSettings {
    /// Shell to spawn; `$SHELL` or `/bin/sh` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    /// Initial columns.
    pub cols: u16,
    /// Initial rows.
    pub rows: u16,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            shell: None,
            cols: 80,
            rows: 24,
        }
    }
}

impl TerminalSettings {
    /// The shell program to launch.
    pub fn resolved_shell(&self) -> String {
        self.shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "/bin/sh".into())
    }
}

/// How to launch one supervised process.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceCommand {
    /// Executable name or path.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory; inherits the gateway's when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

/// Supervised processes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceSettings {
    /// Speech-recognition service.
    pub audio: ServiceCommand,
    /// Capture agent.
    pub vision: ServiceCommand,
    /// Delay between the graceful signal and the forced kill on shutdown.
    pub stop_grace_ms: u64,
    /// Stop every service when the last channel connection closes.
    pub stop_when_idle: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            audio: ServiceCommand {
                program: "python3".into(),
                args: vec!["asr/server.py".into()],
                cwd: None,
            },
            vision: ServiceCommand {
                program: "npx".into(),
                args: vec!["electron".into(), "app".into()],
                cwd: None,
            },
            stop_grace_ms: 2000,
            stop_when_idle: true,
        }
    }
}

impl ServiceSettings {
    /// Grace period as a [`Duration`].
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Compact,
        }
    }
}
