//! Package-level constants.

/// Current version of the gateway (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name advertised in the capability manifest.
pub const NAME: &str = "desktop-tracker";

/// Default listener port.
pub const DEFAULT_PORT: u16 = 6060;

/// Schema version written into `meta.json`.
pub const META_VERSION: &str = "0.1.0";

// ── WebSocket close codes ───────────────────────────────────────────────────

/// The requested path does not name a channel.
pub const CLOSE_UNKNOWN_CHANNEL: u16 = 4404;
/// No active session directory exists for a log-backed channel.
pub const CLOSE_NO_SESSION: u16 = 4004;
/// A terminal control frame could not be parsed.
pub const CLOSE_BAD_FRAME: u16 = 4400;
/// A terminal token is already bound to another connection.
pub const CLOSE_TOKEN_IN_USE: u16 = 4409;
/// The change watch for the session log could not be installed.
pub const CLOSE_WATCH_FAILED: u16 = 4500;
