//! Retry budget.
//!
//! Each scope may spend a bounded number of retries per fixed window. When the
//! budget is spent the caller gets [`BudgetExhausted`] back and must surface it;
//! the budget never retries on anyone's behalf.

use std::collections::HashMap;

use gantry_core::SharedClock;
use gantry_settings::RetryBudgetSettings;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Retry refused because the scope's budget is spent.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("retry budget exhausted for {scope}: {used}/{limit} in window")]
pub struct BudgetExhausted {
    /// Budget scope.
    pub scope: String,
    /// Retries spent in the current window.
    pub used: u32,
    /// Retries allowed per window.
    pub limit: u32,
}

#[derive(Debug, Default)]
struct Window {
    started_ms: i64,
    used: u32,
    succeeded: u32,
}

/// Aggregate retry counters across scopes for the current windows.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySummary {
    /// Retries attempted.
    pub attempted: u32,
    /// Retries that ended in success.
    pub succeeded: u32,
    /// Scopes whose budget is currently spent.
    pub exhausted_scopes: Vec<String>,
}

impl RetrySummary {
    /// Fraction of retries that succeeded; `1.0` when none were attempted.
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            1.0
        } else {
            f64::from(self.succeeded) / f64::from(self.attempted)
        }
    }
}

/// Bounded retries per scope per window.
pub struct RetryBudget {
    config: RetryBudgetSettings,
    clock: SharedClock,
    windows: Mutex<HashMap<String, Window>>,
}

impl RetryBudget {
    /// Create a budget with fresh windows.
    pub fn new(config: RetryBudgetSettings, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Spend one retry for `scope`.
    pub fn try_consume(&self, scope: &str) -> Result<(), BudgetExhausted> {
        let now = self.clock.now_ms();
        let mut windows = self.windows.lock();
        let window = windows.entry(scope.to_owned()).or_default();
        self.roll(window, now);
        if window.used >= self.config.max_retries {
            warn!(scope, used = window.used, limit = self.config.max_retries, "retry budget exhausted");
            return Err(BudgetExhausted {
                scope: scope.to_owned(),
                used: window.used,
                limit: self.config.max_retries,
            });
        }
        window.used += 1;
        Ok(())
    }

    /// Record that a retry spent on `scope` succeeded.
    pub fn record_retry_success(&self, scope: &str) {
        let now = self.clock.now_ms();
        let mut windows = self.windows.lock();
        if let Some(window) = windows.get_mut(scope) {
            self.roll(window, now);
            if window.succeeded < window.used {
                window.succeeded += 1;
            }
        }
    }

    /// Retries left for `scope` in its current window.
    pub fn remaining(&self, scope: &str) -> u32 {
        let now = self.clock.now_ms();
        let mut windows = self.windows.lock();
        match windows.get_mut(scope) {
            Some(window) => {
                self.roll(window, now);
                self.config.max_retries.saturating_sub(window.used)
            }
            None => self.config.max_retries,
        }
    }

    /// Counters across all scopes' current windows.
    pub fn summary(&self) -> RetrySummary {
        let now = self.clock.now_ms();
        let mut windows = self.windows.lock();
        let mut summary = RetrySummary::default();
        for (scope, window) in windows.iter_mut() {
            self.roll(window, now);
            summary.attempted += window.used;
            summary.succeeded += window.succeeded;
            if window.used >= self.config.max_retries {
                summary.exhausted_scopes.push(scope.clone());
            }
        }
        summary.exhausted_scopes.sort();
        summary
    }

    /// Forget every window.
    pub fn reset(&self) {
        self.windows.lock().clear();
    }

    fn roll(&self, window: &mut Window, now: i64) {
        let len = i64::try_from(self.config.window_ms).unwrap_or(i64::MAX);
        if window.used == 0 && window.succeeded == 0 {
            window.started_ms = now;
        } else if now.saturating_sub(window.started_ms) >= len {
            *window = Window {
                started_ms: now,
                used: 0,
                succeeded: 0,
            };
        }
    }
}
