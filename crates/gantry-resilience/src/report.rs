//! Failure report and health score.
//!
//! ```text
//! health = 100 − min(40, errorRate·100)
//!              − min(20, openCircuits·10)
//!              − min(15, waste%·0.15)
//!              − min(15, alerts·5)
//!              − degradationPenalty
//! ```
//! clamped to `[0, 100]`.

use serde::{Deserialize, Serialize};

use crate::budget::RetrySummary;
use crate::circuit::{CircuitState, CircuitStatus};
use crate::degradation::DegradationLevel;
use crate::ledger::{Alert, AlertKind, CostSummary, DeadLetterSummary, ErrorSummary};

/// Recommendation emitted when nothing needs attention.
pub const HEALTHY_RECOMMENDATION: &str = "System operating normally. No action required.";

/// Dead-letter backlog above which a drain is recommended.
const DEAD_LETTER_BACKLOG_LIMIT: usize = 10;

/// Snapshot of gateway health over a window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    /// When the report was built.
    pub generated_at_ms: i64,
    /// Window the summaries cover.
    pub window_ms: u64,
    /// Error counts.
    pub errors: ErrorSummary,
    /// Retry counters.
    pub retries: RetrySummary,
    /// Spend.
    pub costs: CostSummary,
    /// Known breakers.
    pub circuits: Vec<CircuitStatus>,
    /// Breakers not closed.
    pub open_circuits: usize,
    /// Dead-letter backlog.
    pub dead_letters: DeadLetterSummary,
    /// Alerts in the window.
    pub alerts: Vec<Alert>,
    /// Assigned degradation level.
    pub degradation: DegradationLevel,
    /// Derived score in `[0, 100]`.
    pub health_score: f64,
    /// Operator guidance.
    pub recommendations: Vec<String>,
}

/// Assembles a [`FailureReport`] from its summaries. Missing inputs default to empty.
#[derive(Clone, Debug, Default)]
pub struct FailureReportBuilder {
    generated_at_ms: i64,
    window_ms: u64,
    errors: ErrorSummary,
    retries: RetrySummary,
    costs: CostSummary,
    circuits: Vec<CircuitStatus>,
    dead_letters: DeadLetterSummary,
    alerts: Vec<Alert>,
    degradation: DegradationLevel,
}

impl FailureReportBuilder {
    /// Start an empty report.
    pub fn new(generated_at_ms: i64, window_ms: u64) -> Self {
        Self {
            generated_at_ms,
            window_ms,
            ..Self::default()
        }
    }

    /// Error summary.
    #[must_use]
    pub fn errors(mut self, errors: ErrorSummary) -> Self {
        self.errors = errors;
        self
    }

    /// Retry summary.
    #[must_use]
    pub fn retries(mut self, retries: RetrySummary) -> Self {
        self.retries = retries;
        self
    }

    /// Cost summary.
    #[must_use]
    pub fn costs(mut self, costs: CostSummary) -> Self {
        self.costs = costs;
        self
    }

    /// Breaker states.
    #[must_use]
    pub fn circuits(mut self, circuits: Vec<CircuitStatus>) -> Self {
        self.circuits = circuits;
        self
    }

    /// Dead-letter summary.
    #[must_use]
    pub fn dead_letters(mut self, dead_letters: DeadLetterSummary) -> Self {
        self.dead_letters = dead_letters;
        self
    }

    /// Alerts raised in the window.
    #[must_use]
    pub fn alerts(mut self, alerts: Vec<Alert>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Degradation level.
    #[must_use]
    pub fn degradation(mut self, level: DegradationLevel) -> Self {
        self.degradation = level;
        self
    }

    /// Compute score and recommendations.
    pub fn build(self) -> FailureReport {
        let open_circuits = self
            .circuits
            .iter()
            .filter(|c| c.state != CircuitState::Closed)
            .count();
        let health_score = health_score(
            self.errors.error_rate,
            open_circuits,
            self.costs.waste_pct,
            self.alerts.len(),
            self.degradation,
        );
        let recommendations = recommendations(
            &self.errors,
            open_circuits,
            &self.costs,
            &self.dead_letters,
            &self.alerts,
            &self.retries,
        );
        FailureReport {
            generated_at_ms: self.generated_at_ms,
            window_ms: self.window_ms,
            errors: self.errors,
            retries: self.retries,
            costs: self.costs,
            circuits: self.circuits,
            open_circuits,
            dead_letters: self.dead_letters,
            alerts: self.alerts,
            degradation: self.degradation,
            health_score,
            recommendations,
        }
    }
}

/// The health score formula.
#[allow(clippy::cast_precision_loss)]
pub fn health_score(
    error_rate: f64,
    open_circuits: usize,
    waste_pct: f64,
    alert_count: usize,
    degradation: DegradationLevel,
) -> f64 {
    let score = 100.0
        - (error_rate * 100.0).min(40.0)
        - (open_circuits as f64 * 10.0).min(20.0)
        - (waste_pct * 0.15).min(15.0)
        - (alert_count as f64 * 5.0).min(15.0)
        - degradation.penalty();
    score.clamp(0.0, 100.0)
}

fn recommendations(
    errors: &ErrorSummary,
    open_circuits: usize,
    costs: &CostSummary,
    dead_letters: &DeadLetterSummary,
    alerts: &[Alert],
    retries: &RetrySummary,
) -> Vec<String> {
    let mut out = Vec::new();
    if errors.error_rate > 0.3 {
        out.push(format!(
            "Error rate is {:.0}%. Investigate failing providers and consider switching the primary model.",
            errors.error_rate * 100.0
        ));
    }
    if open_circuits > 0 {
        out.push(format!(
            "{open_circuits} circuit breaker(s) open. Check provider status before forcing traffic through."
        ));
    }
    if costs.waste_pct > 50.0 {
        out.push(format!(
            "{:.0}% of spend went to failed attempts. Tighten fallback chains or retry budgets.",
            costs.waste_pct
        ));
    }
    if dead_letters.backlog > DEAD_LETTER_BACKLOG_LIMIT {
        out.push(format!(
            "Dead-letter backlog is {}. Drain and replay abandoned work.",
            dead_letters.backlog
        ));
    }
    if alerts.iter().any(|a| a.kind == AlertKind::Cascade) {
        out.push(
            "Cascading failure detected across multiple scopes. Consider raising the degradation level."
                .to_owned(),
        );
    }
    if retries.attempted > 0 && retries.success_rate() < 0.2 {
        out.push(format!(
            "Retries succeed only {:.0}% of the time. Reduce retry attempts to avoid wasted calls.",
            retries.success_rate() * 100.0
        ));
    }
    if out.is_empty() {
        out.push(HEALTHY_RECOMMENDATION.to_owned());
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
