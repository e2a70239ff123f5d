//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BoltSettings::default()`]
//! 2. If `~/.bolt/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `BOLT_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::BoltSettings;

/// Resolve the path to the settings file (`~/.bolt/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".bolt").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<BoltSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<BoltSettings> {
    let mut settings = read_layers(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults merged with the file, without env overrides.
fn read_layers(path: &Path) -> Result<BoltSettings> {
    let defaults = serde_json::to_value(BoltSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut BoltSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Same as [`apply_env_overrides`] with an injectable lookup.
pub fn apply_overrides(settings: &mut BoltSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Supervisor ──────────────────────────────────────────────────
    if let Some(v) = env.string("BOLT_BRIDGE_URL") {
        settings.supervisor.bridge_url = v;
    }
    if let Some(v) = env.u64("BOLT_SWEEP_INTERVAL_MS", 1_000, 86_400_000) {
        settings.supervisor.sweep_interval_ms = v;
    }
    if let Some(v) = env.u64("BOLT_EMIT_INTERVAL_MS", 0, 3_600_000) {
        settings.supervisor.emit_interval_ms = v;
    }
    if let Some(v) = env.u64("BOLT_FUTURE_TOLERANCE_SECS", 0, 86_400) {
        settings.supervisor.future_tolerance_secs = v;
    }
    if let Some(v) = env.bool("BOLT_UPPER_BOUND_INCLUSIVE") {
        settings.supervisor.upper_bound_inclusive = v;
    }
    if let Some(v) = env.string("BOLT_TIME_COLUMN") {
        settings.supervisor.time_column = v;
    }

    // ── Bridge ──────────────────────────────────────────────────────
    if let Some(v) = env.string("BOLT_BRIDGE_HOST") {
        settings.bridge.host = v;
    }
    if let Some(v) = env.u16("BOLT_BRIDGE_PORT", 1, 65535) {
        settings.bridge.port = v;
    }
    if let Some(v) = env.string("BOLT_UPSTREAM_URL") {
        settings.bridge.upstream_url = v;
    }
    if let Some(v) = env.usize("BOLT_MAX_SEND_QUEUE", 1, 1_000_000) {
        settings.bridge.max_send_queue = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("BOLT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("BOLT_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}
