//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GatewaySettings::default()`]
//! 2. If `~/.gantry/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `GANTRY_*` environment variable overrides
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use gantry_core::session_key::normalize_agent_id;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{AlertCadence, GatewaySettings};

/// Resolve the path to the settings file (`~/.gantry/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".gantry").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<GatewaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a failed validation is an error.
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

/// Reject configurations the services cannot run with.
pub fn validate(settings: &GatewaySettings) -> Result<()> {
    let mut seen = Vec::new();
    for entry in &settings.agents.list {
        let id = normalize_agent_id(&entry.id);
        if seen.contains(&id) {
            return Err(SettingsError::InvalidValue(format!("duplicate agent id: {id}")));
        }
        seen.push(id);
    }
    if settings.spawn_audit.window_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "spawnAudit.windowMs must be positive".into(),
        ));
    }
    if settings.spawn_audit.alert_threshold == Some(0) {
        return Err(SettingsError::InvalidValue(
            "spawnAudit.alertThreshold must be positive".into(),
        ));
    }
    if settings.hierarchy.cache_ttl_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "hierarchy.cacheTtlMs must be positive".into(),
        ));
    }
    if settings.interrupts.default_timeout_ms > settings.interrupts.max_timeout_ms {
        return Err(SettingsError::InvalidValue(
            "interrupts.defaultTimeoutMs exceeds maxTimeoutMs".into(),
        ));
    }
    Ok(())
}

/// Apply environment variable overrides to loaded settings.
///
/// Integers must parse and fall within range; invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut GatewaySettings) {
    // ── Interrupts ──────────────────────────────────────────────────
    if let Some(v) = read_env_u64("GANTRY_INTERRUPT_TIMEOUT_MS", 1, 86_400_000) {
        settings.interrupts.default_timeout_ms = v;
    }

    // ── Spawn audit ─────────────────────────────────────────────────
    if let Some(v) = read_env_u64("GANTRY_SPAWN_WINDOW_MS", 1_000, 3_600_000) {
        settings.spawn_audit.window_ms = v;
    }
    if let Some(v) = read_env_usize("GANTRY_SPAWN_ALERT_THRESHOLD", 1, 100_000) {
        settings.spawn_audit.alert_threshold = Some(v);
    }
    if let Some(v) = read_env_string("GANTRY_SPAWN_ALERT_CADENCE") {
        match parse_cadence(&v) {
            Some(c) => settings.spawn_audit.alert_cadence = c,
            None => tracing::warn!(key = "GANTRY_SPAWN_ALERT_CADENCE", value = %v, "invalid cadence, ignoring"),
        }
    }

    // ── Subagents ───────────────────────────────────────────────────
    if let Some(v) = read_env_u32("GANTRY_MAX_SPAWN_DEPTH", 1, 16) {
        settings.agents.defaults.subagents.max_spawn_depth = v;
    }
    if let Some(v) = read_env_usize("GANTRY_MAX_CHILDREN", 1, 1_000) {
        settings.agents.defaults.subagents.max_children_per_agent = v;
    }

    // ── Models ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("GANTRY_PRIMARY_MODEL") {
        settings.agents.defaults.model.primary = Some(v);
    }

    // ── Resilience ──────────────────────────────────────────────────
    if let Some(v) = read_env_u32("GANTRY_CIRCUIT_FAILURE_THRESHOLD", 1, 1_000) {
        settings.resilience.circuit.failure_threshold = v;
    }
    if let Some(v) = read_env_u64("GANTRY_CIRCUIT_COOLDOWN_MS", 100, 3_600_000) {
        settings.resilience.circuit.cooldown_ms = v;
    }
    if let Some(v) = read_env_u64("GANTRY_REPORT_INTERVAL_MS", 0, 86_400_000) {
        settings.resilience.report.interval_ms = v;
    }

    // ── RPC ─────────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("GANTRY_HANDLER_TIMEOUT_MS", 100, 3_600_000) {
        settings.rpc.handler_timeout_ms = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse an alert cadence name (case-insensitive).
pub fn parse_cadence(val: &str) -> Option<AlertCadence> {
    match val.trim().to_lowercase().as_str() {
        "level" => Some(AlertCadence::Level),
        "edge" => Some(AlertCadence::Edge),
        _ => None,
    }
}

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
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

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    let val = std::env::var(name).ok()?;
    let result = parse_u32_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
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

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
