use serde::{Deserialize, Serialize};

/// Tool interrupt timeouts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InterruptSettings {
    /// Timeout applied when an emit does not specify one.
    pub default_timeout_ms: u64,
    /// Upper clamp for requested timeouts.
    pub max_timeout_ms: u64,
}

impl Default for InterruptSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 600_000,
            max_timeout_ms: 86_400_000,
        }
    }
}

/// When a spawn-rate alert fires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCadence {
    /// Every spawn that leaves the agent at or above the threshold.
    #[default]
    Level,
    /// Once per crossing; re-arms after the rate drops below the threshold.
    Edge,
}

/// Spawn-rate auditing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpawnAuditSettings {
    /// Trailing window for rate computation.
    pub window_ms: u64,
    /// Spawns per window that trigger an alert. `None` disables alerting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_threshold: Option<usize>,
    /// Alert firing cadence.
    pub alert_cadence: AlertCadence,
}

impl Default for SpawnAuditSettings {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            alert_threshold: None,
            alert_cadence: AlertCadence::Level,
        }
    }
}

/// Hierarchy snapshot tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HierarchySettings {
    /// Snapshot cache bucket width.
    pub cache_ttl_ms: u64,
    /// Ended runs older than this stop contributing edges.
    pub ended_run_ttl_ms: u64,
    /// Maximum traversal depth.
    pub max_depth: usize,
}

impl Default for HierarchySettings {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 250,
            ended_run_ttl_ms: 120_000,
            max_depth: 64,
        }
    }
}

/// Request router tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RpcSettings {
    /// Per-handler time limit.
    pub handler_timeout_ms: u64,
    /// Handlers slower than this are logged.
    pub slow_handler_warn_ms: u64,
    /// Queue depth for each broadcast subscriber.
    pub subscriber_capacity: usize,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            handler_timeout_ms: 60_000,
            slow_handler_warn_ms: 5_000,
            subscriber_capacity: gantry_core::events::DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}
