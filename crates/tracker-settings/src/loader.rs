//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GatewaySettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply `TRACKER_*` environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::GatewaySettings;

/// Load settings from an optional file with env var overrides.
pub fn load_settings(path: Option<&Path>) -> Result<GatewaySettings> {
    match path {
        Some(path) => load_settings_from_path(path),
        None => {
            let mut settings = GatewaySettings::default();
            apply_env_overrides(&mut settings);
            validate(&settings)?;
            Ok(settings)
        }
    }
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<GatewaySettings> {
    let defaults = serde_json::to_value(GatewaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: GatewaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_env_overrides(settings: &mut GatewaySettings) {
    if let Some(v) = read_env_string("TRACKER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("TRACKER_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("TRACKER_SESSIONS_DIR") {
        settings.sessions.root = PathBuf::from(v);
    }
    if let Some(v) = read_env_string("TRACKER_SHELL") {
        settings.terminal.shell = Some(v);
    }
    if let Some(v) = read_env_string("TRACKER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_u64("TRACKER_VISION_THROTTLE_MS", 0, 3_600_000) {
        settings.live.vision_throttle_ms = v;
    }
    if let Some(v) = read_env_u64("TRACKER_COMBINED_THROTTLE_MS", 0, 3_600_000) {
        settings.live.combined_throttle_ms = v;
    }
    if let Some(v) = read_env_bool("TRACKER_STOP_WHEN_IDLE") {
        settings.services.stop_when_idle = v;
    }
}

/// Reject values the gateway cannot run with.
pub fn validate(settings: &GatewaySettings) -> Result<()> {
    if settings.terminal.cols == 0 || settings.terminal.rows == 0 {
        return Err(SettingsError::InvalidValue(format!(
            "terminal geometry {}x{} must be non-zero",
            settings.terminal.cols, settings.terminal.rows
        )));
    }
    if settings.server.send_queue == 0 {
        return Err(SettingsError::InvalidValue(
            "server.sendQueue must be at least 1".into(),
        ));
    }
    if settings.sessions.events_file.is_empty() || settings.sessions.frames_dir.is_empty() {
        return Err(SettingsError::InvalidValue(
            "session file names must not be empty".into(),
        ));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}
