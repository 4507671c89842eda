//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`DashSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `FREQDASH_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::DashSettings;

/// Resolve the default settings file (`~/.freqdash/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".freqdash").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<DashSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, or the merged result fails validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<DashSettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<DashSettings> {
    let defaults = serde_json::to_value(DashSettings::default())?;

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

/// Reject settings the sync layer cannot run with.
pub fn validate(settings: &DashSettings) -> Result<()> {
    if settings.connection.url.trim().is_empty() {
        return Err(SettingsError::InvalidValue("connection.url must not be empty".into()));
    }
    if settings.api.base_url.trim().is_empty() {
        return Err(SettingsError::InvalidValue("api.baseUrl must not be empty".into()));
    }
    if settings.polling.interval_ms == 0 {
        return Err(SettingsError::InvalidValue("polling.intervalMs must be positive".into()));
    }
    if settings.api.timeout_ms == 0 {
        return Err(SettingsError::InvalidValue("api.timeoutMs must be positive".into()));
    }
    if settings.connection.connect_timeout_ms == 0 {
        return Err(SettingsError::InvalidValue("connection.connectTimeoutMs must be positive".into()));
    }
    Ok(())
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut DashSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_overrides(settings: &mut DashSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Push connection ─────────────────────────────────────────────
    if let Some(v) = env.string("FREQDASH_WS_URL") {
        settings.connection.url = v;
    }
    if let Some(v) = env.u64("FREQDASH_MAX_RECONNECT_ATTEMPTS", 0, 1000) {
        settings.connection.max_reconnect_attempts = v as u32;
    }
    if let Some(v) = env.u64("FREQDASH_RECONNECT_DELAY_MS", 10, 600_000) {
        settings.connection.reconnect_delay_ms = v;
    }

    // ── Read endpoints ──────────────────────────────────────────────
    if let Some(v) = env.string("FREQDASH_API_URL") {
        settings.api.base_url = v;
    }
    if let Some(v) = env.string("FREQDASH_API_PREFIX") {
        settings.api.prefix = v;
    }
    if let Some(v) = env.string("FREQDASH_API_USERNAME") {
        settings.api.username = Some(v);
    }
    if let Some(v) = env.string("FREQDASH_API_PASSWORD") {
        settings.api.password = Some(v);
    }
    if let Some(v) = env.u64("FREQDASH_API_TIMEOUT_MS", 100, 300_000) {
        settings.api.timeout_ms = v;
    }
    if let Some(v) = env.u64("FREQDASH_POLL_INTERVAL_MS", 250, 3_600_000) {
        settings.polling.interval_ms = v;
    }

    // ── Server / logging ────────────────────────────────────────────
    if let Some(v) = env.string("FREQDASH_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64("FREQDASH_PORT", 1, 65535) {
        settings.server.port = v as u16;
    }
    if let Some(v) = env.string("FREQDASH_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("FREQDASH_LOG_JSON") {
        settings.logging.json = v;
    }
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

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, min, max, "invalid integer env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use serde_json::json;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn deep_merge_objects_recursively() {
        let target = json!({"connection": {"url": "ws://a", "maxReconnectAttempts": 5}});
        let source = json!({"connection": {"url": "ws://b"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["connection"]["url"], "ws://b");
        assert_eq!(merged["connection"]["maxReconnectAttempts"], 5);
    }

    #[test]
    fn deep_merge_skips_null() {
        let merged = deep_merge(json!({"api": {"prefix": "/api"}}), json!({"api": {"prefix": null}}));
        assert_eq!(merged["api"]["prefix"], "/api");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = read_file_layer(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings, DashSettings::default());
        assert_eq!(settings.connection.url, "ws://localhost:5000");
        assert_eq!(settings.connection.max_reconnect_attempts, 5);
        assert_eq!(settings.connection.reconnect_delay_ms, 1000);
        assert_eq!(settings.polling.interval_ms, 10_000);
        assert_eq!(settings.api.base_url, "http://localhost:5000");
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"api": {{"baseUrl": "http://engine:8080", "username": "freqtrade"}}, "polling": {{"intervalMs": 2500}}}}"#
        )
        .unwrap();

        let settings = read_file_layer(&path).unwrap();
        assert_eq!(settings.api.base_url, "http://engine:8080");
        assert_eq!(settings.api.username.as_deref(), Some("freqtrade"));
        assert_eq!(settings.api.prefix, "/api");
        assert_eq!(settings.polling.interval_ms, 2500);
        assert_eq!(settings.connection, Default::default());
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(read_file_layer(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn env_overrides_take_priority() {
        let mut settings = DashSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("FREQDASH_WS_URL", "wss://engine.example/events"),
                ("FREQDASH_MAX_RECONNECT_ATTEMPTS", "8"),
                ("FREQDASH_POLL_INTERVAL_MS", "5000"),
                ("FREQDASH_API_PASSWORD", "futures2024"),
                ("FREQDASH_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(settings.connection.url, "wss://engine.example/events");
        assert_eq!(settings.connection.max_reconnect_attempts, 8);
        assert_eq!(settings.polling.interval_ms, 5000);
        assert_eq!(settings.api.password.as_deref(), Some("futures2024"));
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = DashSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("FREQDASH_PORT", "0"),
                ("FREQDASH_RECONNECT_DELAY_MS", "soon"),
                ("FREQDASH_LOG_JSON", "maybe"),
                ("FREQDASH_WS_URL", ""),
            ]),
        );
        assert_eq!(settings, DashSettings::default());
    }

    #[test]
    fn validation_rejects_zero_interval() {
        let mut settings = DashSettings::default();
        assert!(validate(&settings).is_ok());
        settings.polling.interval_ms = 0;
        assert!(matches!(validate(&settings), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn validation_rejects_zero_timeouts() {
        let mut settings = DashSettings::default();
        settings.api.timeout_ms = 0;
        assert!(matches!(validate(&settings), Err(SettingsError::InvalidValue(_))));

        let mut settings = DashSettings::default();
        settings.connection.connect_timeout_ms = 0;
        assert!(matches!(validate(&settings), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("2"), None);
        assert_eq!(parse_u64_range("42", 1, 100), Some(42));
        assert_eq!(parse_u64_range("0", 1, 100), None);
        assert_eq!(parse_u64_range("-1", 0, 100), None);
    }
}
