//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RoomcastSettings::default()`]
//! 2. If `~/.roomcast/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `ROOMCAST_*` environment variable overrides
//! 4. Validate

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::RoomcastSettings;

/// Resolve the path to the settings file (`~/.roomcast/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".roomcast").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RoomcastSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or an invalid value is an
/// error.
pub fn load_settings_from_path(path: &Path) -> Result<RoomcastSettings> {
    let defaults = serde_json::to_value(RoomcastSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RoomcastSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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
/// Invalid values are ignored with a warning (falling back to file/default).
pub fn apply_env_overrides(settings: &mut RoomcastSettings) {
    if let Some(v) = read_env_string("ROOMCAST_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("ROOMCAST_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("ROOMCAST_PATH") {
        settings.server.path.clone_from(&v);
        settings.transport.path = v;
    }
    if let Some(v) = read_env_usize("ROOMCAST_SEND_QUEUE", 1, 65_536) {
        settings.server.send_queue = v;
    }
    if let Some(v) = read_env_string("ROOMCAST_URL") {
        settings.transport.url = v;
    }
    if let Some(v) = read_env_u32("ROOMCAST_RECONNECT_ATTEMPTS", 0, 1000) {
        settings.transport.reconnect.reconnection_attempts = v;
    }
    if let Some(v) = read_env_string("ROOMCAST_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("ROOMCAST_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// Reject settings the gateway cannot run with.
pub fn validate(settings: &RoomcastSettings) -> Result<()> {
    for (field, path) in [
        ("server.path", &settings.server.path),
        ("transport.path", &settings.transport.path),
    ] {
        if !path.starts_with('/') {
            return Err(SettingsError::invalid(field, format!("must start with '/', got {path}")));
        }
    }
    let server = &settings.server;
    if server.heartbeat_timeout_ms < server.heartbeat_interval_ms {
        return Err(SettingsError::invalid(
            "server.heartbeatTimeoutMs",
            "must be at least heartbeatIntervalMs",
        ));
    }
    let reconnect = &settings.transport.reconnect;
    if reconnect.reconnection_delay_max_ms < reconnect.reconnection_delay_ms {
        return Err(SettingsError::invalid(
            "transport.reconnect.reconnectionDelayMaxMs",
            "must be at least reconnectionDelayMs",
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

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

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

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    let val = std::env::var(name).ok()?;
    let result = parse_u32_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}
