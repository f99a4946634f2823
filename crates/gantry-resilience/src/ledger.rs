//! Windowed records feeding the failure report: model-call outcomes,
//! dead-lettered work, and raised alerts.

use std::collections::{BTreeMap, VecDeque};

use gantry_core::SharedClock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome records kept regardless of window.
const MAX_OUTCOMES: usize = 10_000;
/// Alerts kept regardless of window.
const MAX_ALERTS: usize = 500;

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// One model-call attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    /// When the attempt finished.
    pub at_ms: i64,
    /// Provider attempted.
    pub provider: String,
    /// Model attempted.
    pub model: String,
    /// Whether it succeeded.
    pub success: bool,
    /// Failure class label, for failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_class: Option<String>,
    /// Spend attributed to the attempt.
    pub cost_usd: f64,
}

/// Error counts over the report window.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSummary {
    /// Attempts recorded.
    pub total: u64,
    /// Attempts that failed.
    pub failures: u64,
    /// `failures / total`, `0` when empty.
    pub error_rate: f64,
    /// Failures per class.
    pub by_class: BTreeMap<String, u64>,
    /// Failures per provider.
    pub by_provider: BTreeMap<String, u64>,
}

/// Spend over the report window.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostSummary {
    /// Total spend.
    pub total_usd: f64,
    /// Spend on attempts that failed.
    pub wasted_usd: f64,
    /// `wasted / total * 100`, `0` when nothing was spent.
    pub waste_pct: f64,
}

/// Rolling record of model-call outcomes.
pub struct OutcomeLedger {
    clock: SharedClock,
    outcomes: Mutex<VecDeque<Outcome>>,
}

impl OutcomeLedger {
    /// Create an empty ledger.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            outcomes: Mutex::new(VecDeque::new()),
        }
    }

    /// Record an attempt, stamping it with the current time.
    pub fn record(
        &self,
        provider: &str,
        model: &str,
        success: bool,
        failure_class: Option<&str>,
        cost_usd: f64,
    ) {
        let outcome = Outcome {
            at_ms: self.clock.now_ms(),
            provider: provider.to_owned(),
            model: model.to_owned(),
            success,
            failure_class: failure_class.map(str::to_owned),
            cost_usd: cost_usd.max(0.0),
        };
        let mut outcomes = self.outcomes.lock();
        outcomes.push_back(outcome);
        while outcomes.len() > MAX_OUTCOMES {
            let _ = outcomes.pop_front();
        }
    }

    /// Error and cost summaries for the trailing `window_ms`.
    pub fn summarize(&self, window_ms: u64) -> (ErrorSummary, CostSummary) {
        let cutoff = self.cutoff(window_ms);
        let outcomes = self.outcomes.lock();
        let mut errors = ErrorSummary::default();
        let mut costs = CostSummary::default();
        for o in outcomes.iter().filter(|o| o.at_ms > cutoff) {
            errors.total += 1;
            costs.total_usd += o.cost_usd;
            if !o.success {
                errors.failures += 1;
                costs.wasted_usd += o.cost_usd;
                let class = o.failure_class.clone().unwrap_or_else(|| "unknown".to_owned());
                *errors.by_class.entry(class).or_insert(0) += 1;
                *errors.by_provider.entry(o.provider.clone()).or_insert(0) += 1;
            }
        }
        if errors.total > 0 {
            #[allow(clippy::cast_precision_loss)]
            let rate = errors.failures as f64 / errors.total as f64;
            errors.error_rate = rate;
        }
        if costs.total_usd > 0.0 {
            costs.waste_pct = costs.wasted_usd / costs.total_usd * 100.0;
        }
        (errors, costs)
    }

    /// Forget every outcome.
    pub fn reset(&self) {
        self.outcomes.lock().clear();
    }

    fn cutoff(&self, window_ms: u64) -> i64 {
        self.clock
            .now_ms()
            .saturating_sub(i64::try_from(window_ms).unwrap_or(i64::MAX))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dead letters
// ─────────────────────────────────────────────────────────────────────────────

/// Work abandoned after every recovery path failed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// When the item was abandoned.
    pub at_ms: i64,
    /// Why it was abandoned.
    pub reason: String,
    /// Opaque description of the work.
    pub payload: Value,
}

/// Dead-letter backlog facts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterSummary {
    /// Items waiting.
    pub backlog: usize,
    /// Age of the oldest waiting item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_age_ms: Option<i64>,
    /// Items evicted because the queue was full.
    pub evicted: u64,
}

/// Bounded FIFO of abandoned work; the oldest item is evicted when full.
pub struct DeadLetterQueue {
    clock: SharedClock,
    capacity: usize,
    inner: Mutex<(VecDeque<DeadLetter>, u64)>,
}

impl DeadLetterQueue {
    /// Create a queue holding at most `capacity` items.
    pub fn new(capacity: usize, clock: SharedClock) -> Self {
        Self {
            clock,
            capacity: capacity.max(1),
            inner: Mutex::new((VecDeque::new(), 0)),
        }
    }

    /// Append an item.
    pub fn push(&self, reason: impl Into<String>, payload: Value) {
        let letter = DeadLetter {
            at_ms: self.clock.now_ms(),
            reason: reason.into(),
            payload,
        };
        let mut inner = self.inner.lock();
        inner.0.push_back(letter);
        while inner.0.len() > self.capacity {
            let _ = inner.0.pop_front();
            inner.1 += 1;
        }
    }

    /// Remove and return every waiting item, oldest first.
    pub fn drain(&self) -> Vec<DeadLetter> {
        self.inner.lock().0.drain(..).collect()
    }

    /// Items waiting.
    pub fn len(&self) -> usize {
        self.inner.lock().0.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Backlog facts for the report.
    pub fn summary(&self) -> DeadLetterSummary {
        let now = self.clock.now_ms();
        let inner = self.inner.lock();
        DeadLetterSummary {
            backlog: inner.0.len(),
            oldest_age_ms: inner.0.front().map(|d| now.saturating_sub(d.at_ms)),
            evicted: inner.1,
        }
    }

    /// Drop every item and reset the eviction count.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.0.clear();
        inner.1 = 0;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Alerts
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of alert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Several breakers open at once.
    Cascade,
    /// An agent crossed its spawn-rate threshold.
    SpawnRate,
    /// A retry budget was spent.
    BudgetExhausted,
}

/// A raised alert.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Alert kind.
    pub kind: AlertKind,
    /// Human-readable description.
    pub message: String,
    /// When it was raised.
    pub at_ms: i64,
}

/// Rolling list of raised alerts.
pub struct AlertLog {
    clock: SharedClock,
    alerts: Mutex<VecDeque<Alert>>,
}

impl AlertLog {
    /// Create an empty log.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            alerts: Mutex::new(VecDeque::new()),
        }
    }

    /// Record an alert.
    pub fn raise(&self, kind: AlertKind, message: impl Into<String>) {
        let alert = Alert {
            kind,
            message: message.into(),
            at_ms: self.clock.now_ms(),
        };
        let mut alerts = self.alerts.lock();
        alerts.push_back(alert);
        while alerts.len() > MAX_ALERTS {
            let _ = alerts.pop_front();
        }
    }

    /// Alerts raised within the trailing `window_ms`, oldest first.
    pub fn recent(&self, window_ms: u64) -> Vec<Alert> {
        let cutoff = self
            .clock
            .now_ms()
            .saturating_sub(i64::try_from(window_ms).unwrap_or(i64::MAX));
        self.alerts
            .lock()
            .iter()
            .filter(|a| a.at_ms > cutoff)
            .cloned()
            .collect()
    }

    /// Forget every alert.
    pub fn reset(&self) {
        self.alerts.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::ManualClock;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn empty_ledger_summaries_are_zero() {
        let ledger = OutcomeLedger::new(ManualClock::new(0));
        let (errors, costs) = ledger.summarize(60_000);
        assert_eq!(errors, ErrorSummary::default());
        assert_eq!(costs, CostSummary::default());
    }

    #[test]
    fn ledger_computes_rates_and_waste() {
        let clock = ManualClock::new(1_000);
        let ledger = OutcomeLedger::new(clock.clone());
        ledger.record("anthropic", "opus", false, Some("rate_limit"), 1.0);
        ledger.record("anthropic", "opus", false, Some("rate_limit"), 1.0);
        ledger.record("openai", "gpt", true, None, 2.0);
        ledger.record("openai", "gpt", true, None, 0.0);

        let (errors, costs) = ledger.summarize(60_000);
        assert_eq!(errors.total, 4);
        assert_eq!(errors.failures, 2);
        assert!((errors.error_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(errors.by_class["rate_limit"], 2);
        assert_eq!(errors.by_provider["anthropic"], 2);
        assert!((costs.waste_pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn ledger_respects_window() {
        let clock = ManualClock::new(0);
        let ledger = OutcomeLedger::new(clock.clone());
        ledger.record("p", "m", false, None, 0.0);
        clock.advance(Duration::from_secs(61));
        ledger.record("p", "m", true, None, 0.0);
        let (errors, _) = ledger.summarize(60_000);
        assert_eq!(errors.total, 1);
        assert_eq!(errors.failures, 0);
    }

    #[test]
    fn dead_letters_evict_oldest() {
        let clock = ManualClock::new(0);
        let q = DeadLetterQueue::new(2, clock.clone());
        q.push("a", json!(1));
        clock.advance(Duration::from_millis(10));
        q.push("b", json!(2));
        q.push("c", json!(3));
        let s = q.summary();
        assert_eq!(s.backlog, 2);
        assert_eq!(s.evicted, 1);
        assert_eq!(s.oldest_age_ms, Some(0));
        let drained = q.drain();
        assert_eq!(drained[0].reason, "b");
        assert!(q.is_empty());
    }

    #[test]
    fn alerts_filter_by_window() {
        let clock = ManualClock::new(0);
        let log = AlertLog::new(clock.clone());
        log.raise(AlertKind::Cascade, "two circuits open");
        clock.advance(Duration::from_secs(120));
        log.raise(AlertKind::SpawnRate, "RATE ALERT");
        let recent = log.recent(60_000);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].kind, AlertKind::SpawnRate);
    }
}
