//! Owner of all resilience state.
//!
//! Model-call outcomes flow in through [`ResilienceMonitor::record_success`] and
//! [`ResilienceMonitor::record_failure`]; gating flows out through
//! [`ResilienceMonitor::check_candidate`]; the periodic reporter publishes a
//! [`FailureReport`].

use std::sync::Arc;
use std::time::Duration;

use gantry_core::SharedClock;
use gantry_settings::ResilienceSettings;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::budget::RetryBudget;
use crate::circuit::{CircuitBreakerRegistry, CircuitOpen, CircuitScope, CircuitState};
use crate::degradation::{DegradationLevel, DegradationState};
use crate::ledger::{AlertKind, AlertLog, DeadLetterQueue, OutcomeLedger};
use crate::report::{FailureReport, FailureReportBuilder};

/// Open breakers at which a cascade alert is raised.
const CASCADE_OPEN_THRESHOLD: usize = 2;

/// Circuit breakers, retry budget, degradation level, and outcome records.
pub struct ResilienceMonitor {
    settings: ResilienceSettings,
    clock: SharedClock,
    breakers: CircuitBreakerRegistry,
    budget: RetryBudget,
    degradation: DegradationState,
    ledger: OutcomeLedger,
    dead_letters: DeadLetterQueue,
    alerts: AlertLog,
}

impl ResilienceMonitor {
    /// Create a monitor with empty state.
    pub fn new(settings: ResilienceSettings, clock: SharedClock) -> Self {
        Self {
            breakers: CircuitBreakerRegistry::new(settings.circuit.clone(), Arc::clone(&clock)),
            budget: RetryBudget::new(settings.retry_budget.clone(), Arc::clone(&clock)),
            degradation: DegradationState::default(),
            ledger: OutcomeLedger::new(Arc::clone(&clock)),
            dead_letters: DeadLetterQueue::new(
                settings.report.dead_letter_capacity,
                Arc::clone(&clock),
            ),
            alerts: AlertLog::new(Arc::clone(&clock)),
            settings,
            clock,
        }
    }

    /// Breaker registry.
    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// Retry budget.
    pub fn budget(&self) -> &RetryBudget {
        &self.budget
    }

    /// Dead-letter queue.
    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dead_letters
    }

    /// Alert log.
    pub fn alerts(&self) -> &AlertLog {
        &self.alerts
    }

    /// Current degradation level.
    pub fn degradation(&self) -> DegradationLevel {
        self.degradation.level()
    }

    /// Assign a degradation level, returning the previous one.
    pub fn set_degradation(&self, level: DegradationLevel) -> DegradationLevel {
        self.degradation.set(level)
    }

    /// Whether an attempt against `provider` may proceed.
    ///
    /// A global probe taken here is handed back when the provider breaker
    /// rejects the candidate.
    pub fn check_candidate(&self, provider: &str) -> Result<(), CircuitOpen> {
        let global = self.breakers.breaker(&CircuitScope::Global);
        global.try_acquire()?;
        if let Err(open) = self
            .breakers
            .breaker(&CircuitScope::Provider(provider.to_owned()))
            .try_acquire()
        {
            global.release_probe();
            return Err(open);
        }
        Ok(())
    }

    /// Record a successful model call.
    ///
    /// Taxonomy breakers never gate a call, so the first success after their
    /// cooldown serves as their probe and closes them.
    pub fn record_success(&self, provider: &str, model: &str, cost_usd: f64) {
        self.ledger.record(provider, model, true, None, cost_usd);
        self.breakers.breaker(&CircuitScope::Global).record_success();
        self.breakers
            .breaker(&CircuitScope::Provider(provider.to_owned()))
            .record_success();
        for breaker in self.breakers.taxonomy_breakers() {
            if breaker.try_acquire().is_ok() {
                breaker.record_success();
            }
        }
    }

    /// Record a failed model call of `failure_class`.
    pub fn record_failure(&self, provider: &str, model: &str, failure_class: &str, cost_usd: f64) {
        self.ledger
            .record(provider, model, false, Some(failure_class), cost_usd);
        let open_before = self.breakers.open_count();
        for scope in [
            CircuitScope::Global,
            CircuitScope::Provider(provider.to_owned()),
            CircuitScope::Taxonomy(failure_class.to_owned()),
        ] {
            self.breakers.breaker(&scope).record_failure();
        }
        let open_after = self.breakers.open_count();
        if open_before < CASCADE_OPEN_THRESHOLD && open_after >= CASCADE_OPEN_THRESHOLD {
            let open: Vec<String> = self
                .breakers
                .summary()
                .into_iter()
                .filter(|c| c.state != CircuitState::Closed)
                .map(|c| c.scope)
                .collect();
            let message = format!("cascade: {} circuits open ({})", open.len(), open.join(", "));
            warn!(open_circuits = open_after, "{message}");
            self.alerts.raise(AlertKind::Cascade, message);
        }
    }

    /// Record a failure that says nothing about provider health, such as a
    /// malformed request. Counted in the ledger only.
    pub fn record_non_retryable(&self, provider: &str, model: &str, cost_usd: f64) {
        self.ledger
            .record(provider, model, false, Some("non_retryable"), cost_usd);
    }

    /// Build a report over the configured window.
    pub fn snapshot_report(&self) -> FailureReport {
        let window_ms = self.settings.report.window_ms;
        let (errors, costs) = self.ledger.summarize(window_ms);
        FailureReportBuilder::new(self.clock.now_ms(), window_ms)
            .errors(errors)
            .costs(costs)
            .retries(self.budget.summary())
            .circuits(self.breakers.summary())
            .dead_letters(self.dead_letters.summary())
            .alerts(self.alerts.recent(window_ms))
            .degradation(self.degradation.level())
            .build()
    }

    /// Publish a report every `interval` until `cancel` fires.
    ///
    /// Each report updates the `gateway_health_score` gauge, is logged, and is
    /// handed to `sink`.
    pub fn spawn_periodic_report<F>(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
        sink: F,
    ) -> JoinHandle<()>
    where
        F: Fn(&FailureReport) + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            let _ = ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("periodic failure report stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = self.snapshot_report();
                        metrics::gauge!("gateway_health_score").set(report.health_score);
                        if report.health_score < 70.0 {
                            warn!(
                                health_score = report.health_score,
                                open_circuits = report.open_circuits,
                                error_rate = report.errors.error_rate,
                                "gateway health degraded"
                            );
                        } else {
                            info!(health_score = report.health_score, "gateway health report");
                        }
                        sink(&report);
                    }
                }
            }
        })
    }

    /// Clear all state and return to `NORMAL`.
    pub fn reset_for_tests(&self) {
        self.breakers.reset();
        self.budget.reset();
        self.ledger.reset();
        self.dead_letters.reset();
        self.alerts.reset();
        let _ = self.degradation.set(DegradationLevel::Normal);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
