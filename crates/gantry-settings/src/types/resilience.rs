use serde::{Deserialize, Serialize};

/// Circuit breaker, retry budget, and health-report tuning.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResilienceSettings {
    /// Breaker thresholds applied to every scope.
    pub circuit: CircuitSettings,
    /// Retry budget per scope.
    pub retry_budget: RetryBudgetSettings,
    /// Periodic failure report.
    pub report: ReportSettings,
}

/// Circuit breaker thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitSettings {
    /// Failures within the window that open the breaker.
    pub failure_threshold: u32,
    /// Failure counting window.
    pub window_ms: u64,
    /// Time spent open before admitting a probe.
    pub cooldown_ms: u64,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_ms: 60_000,
            cooldown_ms: 30_000,
        }
    }
}

/// Retry budget.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryBudgetSettings {
    /// Retries allowed per scope per window.
    pub max_retries: u32,
    /// Budget window.
    pub window_ms: u64,
}

impl Default for RetryBudgetSettings {
    fn default() -> Self {
        Self {
            max_retries: 20,
            window_ms: 60_000,
        }
    }
}

/// Periodic failure report.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportSettings {
    /// Publication interval. `0` disables the periodic task.
    pub interval_ms: u64,
    /// Outcome window summarized by each report.
    pub window_ms: u64,
    /// Dead-letter queue capacity.
    pub dead_letter_capacity: usize,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            window_ms: 300_000,
            dead_letter_capacity: 1_000,
        }
    }
}
