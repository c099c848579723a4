//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`DsvpSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)

use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{DsvpSettings, ServerSettings};

/// Accepted `heartbeatIntervalMs`.
pub const HEARTBEAT_INTERVAL_MS: RangeInclusive<u64> = 1000..=600_000;
/// Accepted `heartbeatTimeoutMs`.
pub const HEARTBEAT_TIMEOUT_MS: RangeInclusive<u64> = 1000..=3_600_000;
/// Accepted `maxMessageSize`.
pub const MAX_MESSAGE_SIZE: RangeInclusive<usize> = 1024..=256 * 1024 * 1024;
/// Accepted `sendQueueSize`.
pub const SEND_QUEUE_SIZE: RangeInclusive<usize> = 1..=65_536;

/// Resolve the default settings path (`~/.dsvp/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".dsvp").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<DsvpSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<DsvpSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults merged with the settings file, without env overrides.
///
/// Out-of-range server limits are clamped into range.
pub fn load_file_layer(path: &Path) -> Result<DsvpSettings> {
    let defaults = serde_json::to_value(DsvpSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: DsvpSettings = serde_json::from_value(merged)?;
    clamp_server_limits(&mut settings.server);
    Ok(settings)
}

/// Pull heartbeat, frame size, and queue limits into their accepted ranges.
pub fn clamp_server_limits(server: &mut ServerSettings) {
    server.heartbeat_interval_ms = clamp_logged(
        "heartbeatIntervalMs",
        server.heartbeat_interval_ms,
        &HEARTBEAT_INTERVAL_MS,
    );
    server.heartbeat_timeout_ms = clamp_logged(
        "heartbeatTimeoutMs",
        server.heartbeat_timeout_ms,
        &HEARTBEAT_TIMEOUT_MS,
    );
    server.max_message_size =
        clamp_logged("maxMessageSize", server.max_message_size, &MAX_MESSAGE_SIZE);
    server.send_queue_size =
        clamp_logged("sendQueueSize", server.send_queue_size, &SEND_QUEUE_SIZE);
}

fn clamp_logged<T: Copy + Ord + Display>(key: &str, value: T, range: &RangeInclusive<T>) -> T {
    let clamped = value.clamp(*range.start(), *range.end());
    if clamped != value {
        warn!(key, %value, %clamped, "setting out of range, clamped");
    }
    clamped
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

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut DsvpSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and the file/default value stays.
pub fn apply_overrides_from(settings: &mut DsvpSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("DSVP_REDIS_URL") {
        settings.server.redis_url = Some(v);
    }
    if let Some(v) = env.u16("PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("DSVP_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.string("DSVP_REALM") {
        settings.server.realm = v;
    }
    if let Some(v) = env.u64("DSVP_HEARTBEAT_INTERVAL_MS", &HEARTBEAT_INTERVAL_MS) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.u64("DSVP_HEARTBEAT_TIMEOUT_MS", &HEARTBEAT_TIMEOUT_MS) {
        settings.server.heartbeat_timeout_ms = v;
    }
    if let Some(v) = env.usize("DSVP_MAX_MESSAGE_SIZE", &MAX_MESSAGE_SIZE) {
        settings.server.max_message_size = v;
    }

    // ── Worker ──────────────────────────────────────────────────────
    if let Some(v) = env.string("DSVP_SERVER_URL") {
        settings.worker.server_url = Some(v);
    }
    if let Some(v) = env.string("DSVP_CLIENT_AUTH_TOKEN") {
        settings.worker.auth_token = Some(v);
    }

    // ── Logging (both roles) ────────────────────────────────────────
    if let Some(v) = env.string("DSVP_LOG_LEVEL") {
        settings.server.log_level.clone_from(&v);
        settings.worker.log_level = v;
    }
    if let Some(v) = env.string("DSVP_LOG_FORMAT") {
        match v.parse() {
            Ok(format) => {
                settings.server.log_format = format;
                settings.worker.log_format = format;
            }
            Err(_) => tracing::warn!(key = "DSVP_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, range: &RangeInclusive<u64>) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, *range.start(), *range.end());
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, range: &RangeInclusive<usize>) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, *range.start(), *range.end());
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}
