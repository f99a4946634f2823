//! Circuit breakers.
//!
//! A breaker counts failures inside a trailing window. Reaching the threshold
//! opens it; while open every attempt is rejected. After the cooldown the next
//! attempt is admitted as a single half-open probe: its success closes the
//! breaker, its failure re-opens it for another cooldown.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use gantry_core::SharedClock;
use gantry_settings::CircuitSettings;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Breaker status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Attempts flow normally.
    Closed,
    /// Attempts are rejected until the cooldown elapses.
    Open,
    /// One probe attempt is in flight.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open => f.write_str("open"),
            Self::HalfOpen => f.write_str("half-open"),
        }
    }
}

/// What a breaker protects.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CircuitScope {
    /// Every model call.
    Global,
    /// One failure class (e.g. `rate_limit`).
    Taxonomy(String),
    /// One provider.
    Provider(String),
}

impl fmt::Display for CircuitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Taxonomy(t) => write!(f, "taxonomy:{t}"),
            Self::Provider(p) => write!(f, "provider:{p}"),
        }
    }
}

/// Attempt rejected by an open breaker.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("circuit open for {scope}, retry in {retry_after_ms}ms")]
pub struct CircuitOpen {
    /// Scope of the rejecting breaker.
    pub scope: String,
    /// Time until a probe will be admitted.
    pub retry_after_ms: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: VecDeque<i64>,
    opened_at_ms: Option<i64>,
    probe_started_ms: Option<i64>,
}

/// Thread-safe breaker for one scope.
pub struct CircuitBreaker {
    scope: CircuitScope,
    config: CircuitSettings,
    clock: SharedClock,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(scope: CircuitScope, config: CircuitSettings, clock: SharedClock) -> Self {
        Self {
            scope,
            config,
            clock,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                opened_at_ms: None,
                probe_started_ms: None,
            }),
        }
    }

    /// The scope this breaker guards.
    pub fn scope(&self) -> &CircuitScope {
        &self.scope
    }

    /// Ask to make an attempt.
    ///
    /// Transitions open → half-open once the cooldown has elapsed and admits
    /// exactly one probe. A probe that never reports back is replaced after
    /// another cooldown.
    pub fn try_acquire(&self) -> Result<(), CircuitOpen> {
        let now = self.clock.now_ms();
        let cooldown = cooldown_ms(&self.config);
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let opened = inner.opened_at_ms.unwrap_or(now);
                let elapsed = now.saturating_sub(opened);
                if elapsed >= cooldown {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_started_ms = Some(now);
                    self.record_transition(CircuitState::HalfOpen);
                    Ok(())
                } else {
                    Err(self.rejection(cooldown - elapsed))
                }
            }
            CircuitState::HalfOpen => match inner.probe_started_ms {
                Some(started) if now.saturating_sub(started) < cooldown => {
                    Err(self.rejection(cooldown - now.saturating_sub(started)))
                }
                _ => {
                    inner.probe_started_ms = Some(now);
                    Ok(())
                }
            },
        }
    }

    /// Hand back a probe taken by [`try_acquire`](Self::try_acquire) that was
    /// never used, so the next caller may probe at once.
    pub fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_started_ms = None;
        }
    }

    /// Record a successful attempt.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.failures.clear();
            inner.opened_at_ms = None;
            inner.probe_started_ms = None;
            self.record_transition(CircuitState::Closed);
            info!(scope = %self.scope, "circuit closed after successful probe");
        }
    }

    /// Record a failed attempt.
    pub fn record_failure(&self) {
        let now = self.clock.now_ms();
        let window = i64::try_from(self.config.window_ms).unwrap_or(i64::MAX);
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures.push_back(now);
                while inner
                    .failures
                    .front()
                    .is_some_and(|&t| now.saturating_sub(t) >= window)
                {
                    let _ = inner.failures.pop_front();
                }
                if inner.failures.len() >= self.config.failure_threshold.max(1) as usize {
                    inner.state = CircuitState::Open;
                    inner.opened_at_ms = Some(now);
                    self.record_transition(CircuitState::Open);
                    warn!(
                        scope = %self.scope,
                        failures = inner.failures.len(),
                        window_ms = self.config.window_ms,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at_ms = Some(now);
                inner.probe_started_ms = None;
                self.record_transition(CircuitState::Open);
                warn!(scope = %self.scope, "probe failed, circuit re-opened");
            }
            CircuitState::Open => {}
        }
    }

    /// Current state. Does not perform the open → half-open transition.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Failures counted in the current window.
    pub fn failure_count(&self) -> usize {
        self.inner.lock().failures.len()
    }

    /// Force the breaker closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.opened_at_ms = None;
        inner.probe_started_ms = None;
    }

    fn rejection(&self, remaining_ms: i64) -> CircuitOpen {
        CircuitOpen {
            scope: self.scope.to_string(),
            retry_after_ms: u64::try_from(remaining_ms).unwrap_or(0),
        }
    }

    fn record_transition(&self, to: CircuitState) {
        metrics::counter!(
            "circuit_state_changes_total",
            "scope" => self.scope.to_string(),
            "to" => to.to_string()
        )
        .increment(1);
    }
}

fn cooldown_ms(config: &CircuitSettings) -> i64 {
    i64::try_from(config.cooldown_ms).unwrap_or(i64::MAX)
}

/// One row of [`CircuitBreakerRegistry::summary`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitStatus {
    /// Scope label.
    pub scope: String,
    /// Current state.
    pub state: CircuitState,
    /// Failures in the current window.
    pub failure_count: usize,
}

/// Lazily created breakers keyed by scope.
pub struct CircuitBreakerRegistry {
    config: CircuitSettings,
    clock: SharedClock,
    breakers: DashMap<CircuitScope, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry; every breaker shares `config`.
    pub fn new(config: CircuitSettings, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            breakers: DashMap::new(),
        }
    }

    /// Breaker for `scope`, created closed on first use.
    pub fn breaker(&self, scope: &CircuitScope) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(scope) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.breakers
                .entry(scope.clone())
                .or_insert_with(|| {
                    Arc::new(CircuitBreaker::new(
                        scope.clone(),
                        self.config.clone(),
                        Arc::clone(&self.clock),
                    ))
                })
                .value(),
        )
    }

    /// Every `taxonomy:<class>` breaker created so far.
    pub fn taxonomy_breakers(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers
            .iter()
            .filter(|entry| matches!(entry.key(), CircuitScope::Taxonomy(_)))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Number of breakers currently open or probing.
    pub fn open_count(&self) -> usize {
        self.breakers
            .iter()
            .filter(|b| b.value().state() != CircuitState::Closed)
            .count()
    }

    /// State of every known breaker, sorted by scope.
    pub fn summary(&self) -> Vec<CircuitStatus> {
        let mut rows: Vec<(CircuitScope, CircuitStatus)> = self
            .breakers
            .iter()
            .map(|entry| {
                let b = entry.value();
                (
                    entry.key().clone(),
                    CircuitStatus {
                        scope: entry.key().to_string(),
                        state: b.state(),
                        failure_count: b.failure_count(),
                    },
                )
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows.into_iter().map(|(_, s)| s).collect()
    }

    /// Drop every breaker.
    pub fn reset(&self) {
        self.breakers.clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use gantry_core::ManualClock;
    use std::time::Duration;

    fn config() -> CircuitSettings {
        CircuitSettings {
            failure_threshold: 3,
            window_ms: 10_000,
            cooldown_ms: 5_000,
        }
    }

    fn breaker() -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = ManualClock::new(0);
        let b = CircuitBreaker::new(CircuitScope::Global, config(), clock.clone());
        (b, clock)
    }

    #[test]
    fn opens_at_threshold() {
        let (b, _clock) = breaker();
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Closed);
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert_matches!(b.try_acquire(), Err(CircuitOpen { retry_after_ms: 5_000, .. }));
    }

    #[test]
    fn failures_outside_window_do_not_count() {
        let (b, clock) = breaker();
        b.record_failure();
        b.record_failure();
        clock.advance(Duration::from_secs(11));
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 1);
    }

    #[test]
    fn half_open_admits_single_probe() {
        let (b, clock) = breaker();
        for _ in 0..3 {
            b.record_failure();
        }
        clock.advance(Duration::from_secs(5));
        assert!(b.try_acquire().is_ok());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert!(b.try_acquire().is_err());
    }

    #[test]
    fn probe_success_closes() {
        let (b, clock) = breaker();
        for _ in 0..3 {
            b.record_failure();
        }
        clock.advance(Duration::from_secs(5));
        b.try_acquire().unwrap();
        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 0);
        assert!(b.try_acquire().is_ok());
    }

    #[test]
    fn probe_failure_reopens() {
        let (b, clock) = breaker();
        for _ in 0..3 {
            b.record_failure();
        }
        clock.advance(Duration::from_secs(5));
        b.try_acquire().unwrap();
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        clock.advance(Duration::from_secs(1));
        assert_matches!(b.try_acquire(), Err(CircuitOpen { retry_after_ms: 4_000, .. }));
    }

    #[test]
    fn abandoned_probe_is_replaced_after_cooldown() {
        let (b, clock) = breaker();
        for _ in 0..3 {
            b.record_failure();
        }
        clock.advance(Duration::from_secs(5));
        b.try_acquire().unwrap();
        clock.advance(Duration::from_secs(5));
        assert!(b.try_acquire().is_ok());
    }

    #[test]
    fn released_half_open_slot_is_available_immediately() {
        let (b, clock) = breaker();
        for _ in 0..3 {
            b.record_failure();
        }
        clock.advance(Duration::from_secs(5));
        b.try_acquire().unwrap();
        assert!(b.try_acquire().is_err());
        b.release_probe();
        assert!(b.try_acquire().is_ok());
        assert!(b.try_acquire().is_err());
        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn release_on_closed_breaker_is_noop() {
        let (b, _clock) = breaker();
        b.release_probe();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.try_acquire().is_ok());
    }

    #[test]
    fn success_while_closed_keeps_window() {
        let (b, _clock) = breaker();
        b.record_failure();
        b.record_success();
        assert_eq!(b.failure_count(), 1);
    }

    #[test]
    fn scope_labels() {
        assert_eq!(CircuitScope::Global.to_string(), "global");
        assert_eq!(
            CircuitScope::Taxonomy("rate_limit".into()).to_string(),
            "taxonomy:rate_limit"
        );
        assert_eq!(CircuitScope::Provider("openai".into()).to_string(), "provider:openai");
    }

    #[test]
    fn registry_reuses_breakers_and_counts_open() {
        let clock = ManualClock::new(0);
        let reg = CircuitBreakerRegistry::new(config(), clock);
        let scope = CircuitScope::Provider("anthropic".into());
        let a = reg.breaker(&scope);
        let b = reg.breaker(&scope);
        assert!(Arc::ptr_eq(&a, &b));
        for _ in 0..3 {
            a.record_failure();
        }
        let _ = reg.breaker(&CircuitScope::Global);
        assert_eq!(reg.open_count(), 1);

        let summary = reg.summary();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].scope, "global");
        assert_eq!(summary[1].state, CircuitState::Open);

        let _ = reg.breaker(&CircuitScope::Taxonomy("timeout".into()));
        let taxonomy = reg.taxonomy_breakers();
        assert_eq!(taxonomy.len(), 1);
        assert_eq!(taxonomy[0].scope(), &CircuitScope::Taxonomy("timeout".into()));

        reg.reset();
        assert_eq!(reg.open_count(), 0);
    }

    #[test]
    fn state_wire_format() {
        assert_eq!(
            serde_json::to_value(CircuitState::HalfOpen).unwrap(),
            serde_json::json!("half-open")
        );
    }
}
