//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SockgateSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `SOCKGATE_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::SockgateSettings;

/// `~/.sockgate/settings.json`, falling back to `/tmp` without a home directory.
pub fn settings_path() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
        .join(".sockgate")
        .join("settings.json")
}

/// Load settings from [`settings_path`] with env var overrides.
pub fn load_settings() -> Result<SockgateSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<SockgateSettings> {
    let mut layered = serde_json::to_value(SockgateSettings::default())?;

    match std::fs::read_to_string(path) {
        Ok(content) => {
            debug!(?path, "merging settings file over defaults");
            let file: Value = serde_json::from_str(&content)?;
            merge_into(&mut layered, file);
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(?path, "no settings file, using defaults");
        }
        Err(e) => return Err(e.into()),
    }

    let mut settings: SockgateSettings = serde_json::from_value(layered)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Merge `overlay` over `base` and return the result.
pub fn deep_merge(mut base: Value, overlay: Value) -> Value {
    merge_into(&mut base, overlay);
    base
}

fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map.into_iter().filter(|(_, v)| !v.is_null()) {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_into(slot, value),
                    None => {
                        let _ = base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, overlay) => *slot = overlay,
    }
}

/// Apply `SOCKGATE_*` environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut SockgateSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning and the file/default value kept.
pub fn apply_overrides<F>(settings: &mut SockgateSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = string("SOCKGATE_HOST") {
        settings.server.host = v;
    }
    if let Some(raw) = string("SOCKGATE_PORT") {
        match raw.parse::<u16>() {
            Ok(v) => settings.server.port = v,
            Err(_) => warn!(key = "SOCKGATE_PORT", value = %raw, "invalid port env var, ignoring"),
        }
    }
    if let Some(raw) = string("SOCKGATE_DEBUG") {
        match parse_bool(&raw) {
            Some(v) => settings.gateway.debug = v,
            None => warn!(key = "SOCKGATE_DEBUG", value = %raw, "invalid boolean env var, ignoring"),
        }
    }
    if let Some(raw) = string("SOCKGATE_USE_EXTERNAL_STORE") {
        match parse_bool(&raw) {
            Some(v) => settings.gateway.use_external_store = v,
            None => warn!(
                key = "SOCKGATE_USE_EXTERNAL_STORE",
                value = %raw,
                "invalid boolean env var, ignoring"
            ),
        }
    }
    if let Some(v) = string("SOCKGATE_STORE_URL") {
        settings.gateway.store_url = v;
    }
    if let Some(v) = string("SOCKGATE_REMOTE_ENDPOINT") {
        settings.gateway.remote_endpoint = Some(v);
    }
    if let Some(v) = string("SOCKGATE_STAGE") {
        settings.gateway.stage = v;
    }
    if let Some(v) = string("SOCKGATE_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

/// Parse `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, ignoring case.
pub fn parse_bool(val: &str) -> Option<bool> {
    let val = val.trim().to_ascii_lowercase();
    if matches!(val.as_str(), "true" | "1" | "yes" | "on") {
        Some(true)
    } else if matches!(val.as_str(), "false" | "0" | "no" | "off") {
        Some(false)
    } else {
        None
    }
}
