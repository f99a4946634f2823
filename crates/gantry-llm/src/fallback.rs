//! Model fallback.
//!
//! The chain is the requested pair, then the configured fallbacks, then the
//! configured primary appended last so a transient detour always ends back on
//! the intended default. The agent's selection strategy may rotate that chain
//! (`round_robin`, `sticky_session`); the default `primary` keeps it as is.
//! Candidates are tried strictly one at a time. A non-retryable failure stops
//! the walk immediately and is returned unchanged.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use gantry_resilience::{AlertKind, ResilienceMonitor};
use gantry_settings::{AgentsSettings, ModelSelectionStrategy};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classify::{FailureClass, FailureClassifier};
use crate::error::ClassifiableError;
use crate::model_ref::{DEFAULT_FALLBACK_CHAIN, ModelRef};

/// Retry-budget scope spent by fallback hops.
const BUDGET_SCOPE: &str = "model_fallback";

/// One failed or skipped candidate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackAttempt {
    /// Provider attempted.
    pub provider: String,
    /// Model attempted.
    pub model: String,
    /// Failure description.
    pub error: String,
    /// Classification. `None` when the candidate was skipped by an open circuit.
    pub class: Option<FailureClass>,
}

impl FallbackAttempt {
    fn reason(&self) -> &'static str {
        self.class.map_or("circuit_open", FailureClass::as_str)
    }
}

/// Successful walk.
#[derive(Debug)]
pub struct FallbackOutcome<T> {
    /// Value produced by the winning candidate.
    pub result: T,
    /// Winning provider.
    pub provider: String,
    /// Winning model.
    pub model: String,
    /// Candidates that failed or were skipped first.
    pub attempts: Vec<FallbackAttempt>,
}

/// Failed walk.
#[derive(Debug)]
pub enum FallbackError<E> {
    /// A candidate failed and nothing after it succeeded. `error` is the last
    /// failure exactly as `run` returned it.
    Failed {
        /// Last error, unchanged.
        error: E,
        /// Every failed or skipped candidate in order.
        attempts: Vec<FallbackAttempt>,
    },
    /// Every candidate was skipped before any call was made.
    Unavailable {
        /// Skipped candidates in order.
        attempts: Vec<FallbackAttempt>,
    },
}

impl<E> FallbackError<E> {
    /// Failed or skipped candidates.
    pub fn attempts(&self) -> &[FallbackAttempt] {
        match self {
            Self::Failed { attempts, .. } | Self::Unavailable { attempts } => attempts,
        }
    }

    /// The last error returned by `run`, if a call was made.
    pub fn into_error(self) -> Option<E> {
        match self {
            Self::Failed { error, .. } => Some(error),
            Self::Unavailable { .. } => None,
        }
    }
}

fn summarize(attempts: &[FallbackAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}/{}: {} ({})", a.provider, a.model, a.error, a.reason()))
        .collect::<Vec<_>>()
        .join(" | ")
}

impl<E: fmt::Display> fmt::Display for FallbackError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { error, attempts } if attempts.len() <= 1 => write!(f, "{error}"),
            Self::Failed { attempts, .. } => write!(
                f,
                "All models failed ({}): {}",
                attempts.len(),
                summarize(attempts)
            ),
            Self::Unavailable { attempts } => write!(
                f,
                "No model available ({}): {}",
                attempts.len(),
                summarize(attempts)
            ),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for FallbackError<E> {}

/// A call result together with what the call cost.
#[derive(Clone, Debug, PartialEq)]
pub struct Metered<R> {
    /// The call result.
    pub outcome: R,
    /// Spend in USD, charged whether or not the call succeeded.
    pub cost_usd: f64,
}

impl<R> Metered<R> {
    /// Wrap `outcome` with its cost.
    pub fn new(outcome: R, cost_usd: f64) -> Self {
        Self { outcome, cost_usd }
    }

    /// Wrap an outcome that cost nothing or whose cost is unknown.
    pub fn unpriced(outcome: R) -> Self {
        Self::new(outcome, 0.0)
    }
}

/// What to run and for whom.
#[derive(Clone, Copy, Debug)]
pub struct FallbackRequest<'a> {
    /// Agent configuration.
    pub agents: &'a AgentsSettings,
    /// Agent whose chain applies. `None` uses the shared defaults.
    pub agent_id: Option<&'a str>,
    /// Requested provider. Empty uses the configured primary.
    pub provider: &'a str,
    /// Requested model. Empty uses the configured primary.
    pub model: &'a str,
    /// Session the call serves. Seeds `sticky_session` ordering.
    pub session_key: Option<&'a str>,
    /// Ordering override. `None` uses the agent's configured strategy.
    pub strategy: Option<ModelSelectionStrategy>,
}

/// Ordered candidates for a request.
///
/// Fallback entries already present in the chain are skipped. The configured
/// primary is appended last unless it already is the last fallback entry.
pub fn resolve_fallback_candidates(request: &FallbackRequest<'_>) -> Vec<ModelRef> {
    let agent = request.agent_id.unwrap_or("");
    let primary = request
        .agents
        .primary_model(agent)
        .and_then(|raw| ModelRef::parse(&raw, crate::model_ref::DEFAULT_PROVIDER))
        .unwrap_or_else(ModelRef::builtin_default);

    let provider = match request.provider.trim() {
        "" => primary.provider.clone(),
        p => p.to_lowercase(),
    };
    let model = match request.model.trim() {
        "" => primary.model.clone(),
        m => m.to_owned(),
    };
    let mut chain = vec![ModelRef::new(provider, model)];

    let fallbacks = request.agents.fallbacks(agent).unwrap_or_else(|| {
        DEFAULT_FALLBACK_CHAIN
            .iter()
            .map(|s| (*s).to_owned())
            .collect()
    });
    for raw in &fallbacks {
        match ModelRef::parse(raw, &primary.provider) {
            Some(candidate) if !chain.contains(&candidate) => chain.push(candidate),
            Some(_) => {}
            None => debug!(raw = raw.as_str(), "skipping unparseable fallback ref"),
        }
    }

    if chain.len() == 1 || chain.last() != Some(&primary) {
        chain.push(primary);
    }
    chain
}

/// Java-style string hash over UTF-16 units, so sticky positions stay stable
/// across restarts.
fn session_hash(key: &str) -> u32 {
    key.encode_utf16()
        .fold(0u32, |h, unit| h.wrapping_mul(31).wrapping_add(u32::from(unit)))
}

fn rotate(mut chain: Vec<ModelRef>, start: usize) -> Vec<ModelRef> {
    if !chain.is_empty() {
        let len = chain.len();
        chain.rotate_left(start % len);
    }
    chain
}

fn pool_key(chain: &[ModelRef]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

/// Observer called after each failed candidate.
pub type AttemptObserver = Arc<dyn Fn(&FallbackAttempt) + Send + Sync>;

/// Walks a fallback chain.
pub struct ModelFallbackResolver {
    classifier: FailureClassifier,
    monitor: Option<Arc<ResilienceMonitor>>,
    observer: Option<AttemptObserver>,
    round_robin: Mutex<HashMap<String, usize>>,
}

impl ModelFallbackResolver {
    /// Resolver with the built-in classifier and no resilience integration.
    pub fn new() -> Self {
        Self {
            classifier: FailureClassifier::new(),
            monitor: None,
            observer: None,
            round_robin: Mutex::new(HashMap::new()),
        }
    }

    /// Candidates for `request` in walk order, after the selection strategy.
    pub fn ordered_candidates(&self, request: &FallbackRequest<'_>) -> Vec<ModelRef> {
        let chain = resolve_fallback_candidates(request);
        if chain.len() <= 1 {
            return chain;
        }
        let agent = request.agent_id.unwrap_or("");
        let strategy = request
            .strategy
            .unwrap_or_else(|| request.agents.selection_strategy(agent));
        match strategy {
            ModelSelectionStrategy::Primary => chain,
            ModelSelectionStrategy::RoundRobin => {
                let start = {
                    let mut positions = self.round_robin.lock();
                    let slot = positions.entry(pool_key(&chain)).or_insert(0);
                    let current = *slot;
                    *slot = (current + 1) % chain.len();
                    current
                };
                rotate(chain, start)
            }
            ModelSelectionStrategy::StickySession => match request.session_key {
                Some(key) => {
                    let start = session_hash(key) as usize;
                    rotate(chain, start)
                }
                None => chain,
            },
        }
    }

    /// Use a custom classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: FailureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Gate candidates on circuit breakers and the retry budget, and record outcomes.
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<ResilienceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Call `observer` after every failed candidate.
    #[must_use]
    pub fn with_observer(mut self, observer: AttemptObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Run `run(provider, model)` against each candidate until one succeeds.
    ///
    /// Outcomes are recorded without cost. Use [`run_metered`](Self::run_metered)
    /// when the caller knows what each call spent.
    pub async fn run<T, E, F, Fut>(
        &self,
        request: FallbackRequest<'_>,
        mut run: F,
    ) -> Result<FallbackOutcome<T>, FallbackError<E>>
    where
        F: FnMut(String, String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifiableError + fmt::Display,
    {
        self.run_metered(request, move |provider, model| {
            let call = run(provider, model);
            async move { Metered::unpriced(call.await) }
        })
        .await
    }

    /// Like [`run`](Self::run), with each call reporting its spend.
    ///
    /// Spend on failed calls is recorded as waste in the outcome ledger.
    pub async fn run_metered<T, E, F, Fut>(
        &self,
        request: FallbackRequest<'_>,
        mut run: F,
    ) -> Result<FallbackOutcome<T>, FallbackError<E>>
    where
        F: FnMut(String, String) -> Fut,
        Fut: Future<Output = Metered<Result<T, E>>>,
        E: ClassifiableError + fmt::Display,
    {
        let candidates = self.ordered_candidates(&request);
        let mut attempts: Vec<FallbackAttempt> = Vec::new();
        let mut last_error: Option<E> = None;
        let mut calls_made = 0usize;

        for candidate in &candidates {
            if let Some(monitor) = &self.monitor {
                if let Err(open) = monitor.check_candidate(&candidate.provider) {
                    debug!(candidate = %candidate, error = %open, "skipping candidate, circuit open");
                    metrics::counter!("model_fallback_attempts_total", "outcome" => "skipped")
                        .increment(1);
                    attempts.push(FallbackAttempt {
                        provider: candidate.provider.clone(),
                        model: candidate.model.clone(),
                        error: open.to_string(),
                        class: None,
                    });
                    continue;
                }
                if calls_made > 0 {
                    if let Err(exhausted) = monitor.budget().try_consume(BUDGET_SCOPE) {
                        monitor
                            .alerts()
                            .raise(AlertKind::BudgetExhausted, exhausted.to_string());
                        break;
                    }
                }
            }

            calls_made += 1;
            let Metered { outcome, cost_usd } =
                run(candidate.provider.clone(), candidate.model.clone()).await;
            match outcome {
                Ok(result) => {
                    metrics::counter!(
                        "model_fallback_attempts_total",
                        "outcome" => "success",
                        "provider" => candidate.provider.clone()
                    )
                    .increment(1);
                    if let Some(monitor) = &self.monitor {
                        monitor.record_success(&candidate.provider, &candidate.model, cost_usd);
                        if calls_made > 1 {
                            monitor.budget().record_retry_success(BUDGET_SCOPE);
                        }
                    }
                    if !attempts.is_empty() {
                        info!(
                            candidate = %candidate,
                            failed_attempts = attempts.len(),
                            "model fallback succeeded"
                        );
                    }
                    return Ok(FallbackOutcome {
                        result,
                        provider: candidate.provider.clone(),
                        model: candidate.model.clone(),
                        attempts,
                    });
                }
                Err(err) => {
                    let class = self.classifier.classify(&err);
                    metrics::counter!(
                        "model_fallback_attempts_total",
                        "outcome" => class.as_str(),
                        "provider" => candidate.provider.clone()
                    )
                    .increment(1);
                    let attempt = FallbackAttempt {
                        provider: candidate.provider.clone(),
                        model: candidate.model.clone(),
                        error: err.to_string(),
                        class: Some(class),
                    };
                    if let Some(observer) = &self.observer {
                        observer(&attempt);
                    }
                    attempts.push(attempt);

                    if !class.is_retryable() {
                        if let Some(monitor) = &self.monitor {
                            monitor.record_non_retryable(
                                &candidate.provider,
                                &candidate.model,
                                cost_usd,
                            );
                        }
                        return Err(FallbackError::Failed {
                            error: err,
                            attempts,
                        });
                    }

                    warn!(candidate = %candidate, class = class.as_str(), error = %err, "model call failed, trying next candidate");
                    if let Some(monitor) = &self.monitor {
                        monitor.record_failure(
                            &candidate.provider,
                            &candidate.model,
                            class.as_str(),
                            cost_usd,
                        );
                    }
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(error) => {
                if let Some(monitor) = &self.monitor {
                    monitor.dead_letters().push(
                        "model fallback chain exhausted",
                        serde_json::to_value(&attempts).unwrap_or_default(),
                    );
                }
                Err(FallbackError::Failed { error, attempts })
            }
            None => Err(FallbackError::Unavailable { attempts }),
        }
    }
}

impl Default for ModelFallbackResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk the chain with the built-in classifier and no resilience integration.
pub async fn run_with_model_fallback<T, E, F, Fut>(
    request: FallbackRequest<'_>,
    run: F,
) -> Result<FallbackOutcome<T>, FallbackError<E>>
where
    F: FnMut(String, String) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: ClassifiableError + fmt::Display,
{
    ModelFallbackResolver::new().run(request, run).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelCallError;
    use assert_matches::assert_matches;
    use gantry_core::ManualClock;
    use gantry_settings::{AgentEntry, ModelChainSettings, ResilienceSettings};
    use std::sync::Mutex;

    type Calls = Arc<Mutex<Vec<String>>>;

    fn agents(primary: &str, fallbacks: Option<Vec<&str>>) -> AgentsSettings {
        let mut a = AgentsSettings::default();
        a.defaults.model = ModelChainSettings {
            primary: Some(primary.to_owned()),
            fallbacks: fallbacks.map(|f| f.into_iter().map(str::to_owned).collect()),
            strategy: None,
        };
        a
    }

    fn request<'a>(agents: &'a AgentsSettings, provider: &'a str, model: &'a str) -> FallbackRequest<'a> {
        FallbackRequest {
            agents,
            agent_id: None,
            provider,
            model,
            session_key: None,
            strategy: None,
        }
    }

    fn refs(chain: &[ModelRef]) -> Vec<String> {
        chain.iter().map(ToString::to_string).collect()
    }

    // ── candidate resolution ────────────────────────────────────────

    #[test]
    fn builtin_chain_when_nothing_configured() {
        let a = AgentsSettings::default();
        let chain = resolve_fallback_candidates(&request(&a, "", ""));
        assert_eq!(
            refs(&chain),
            vec![
                "anthropic/claude-opus-4-6",
                "anthropic/claude-sonnet-4-5",
                "openai/gpt-4.1-mini",
                "anthropic/claude-opus-4-6",
            ]
        );
    }

    #[test]
    fn explicit_empty_list_disables_fallbacks() {
        let a = agents("openai/gpt-4.1-mini", Some(vec![]));
        let chain = resolve_fallback_candidates(&request(&a, "openai", "gpt-4.1-mini"));
        assert_eq!(refs(&chain), vec!["openai/gpt-4.1-mini", "openai/gpt-4.1-mini"]);
    }

    #[test]
    fn primary_not_repeated_when_already_last() {
        let a = agents("openai/gpt-4.1", Some(vec!["google/gemini-2.5-pro", "openai/gpt-4.1"]));
        let chain = resolve_fallback_candidates(&request(&a, "anthropic", "claude-opus-4-6"));
        assert_eq!(
            refs(&chain),
            vec!["anthropic/claude-opus-4-6", "google/gemini-2.5-pro", "openai/gpt-4.1"]
        );
    }

    #[test]
    fn fallback_duplicates_are_skipped() {
        let a = agents("openai/gpt-4.1", Some(vec!["anthropic/claude-opus-4-6", "x/y", "x/y", "  "]));
        let chain = resolve_fallback_candidates(&request(&a, "anthropic", "claude-opus-4-6"));
        assert_eq!(
            refs(&chain),
            vec!["anthropic/claude-opus-4-6", "x/y", "openai/gpt-4.1"]
        );
    }

    #[test]
    fn agent_chain_overrides_defaults() {
        let mut a = agents("openai/gpt-4.1", Some(vec!["google/gemini-2.5-pro"]));
        a.list.push(AgentEntry {
            id: "coder".into(),
            model: Some(ModelChainSettings {
                primary: Some("anthropic/claude-sonnet-4-5".into()),
                fallbacks: Some(vec!["openai/o3".into()]),
                strategy: None,
            }),
            ..AgentEntry::default()
        });
        let req = FallbackRequest {
            agents: &a,
            agent_id: Some("coder"),
            provider: "",
            model: "",
            session_key: None,
            strategy: None,
        };
        assert_eq!(
            refs(&resolve_fallback_candidates(&req)),
            vec![
                "anthropic/claude-sonnet-4-5",
                "openai/o3",
                "anthropic/claude-sonnet-4-5"
            ]
        );
    }

    // ── selection strategy ──────────────────────────────────────────

    fn first_called(resolver: &ModelFallbackResolver, req: FallbackRequest<'_>) -> String {
        resolver.ordered_candidates(&req)[0].to_string()
    }

    #[test]
    fn primary_strategy_keeps_resolved_order() {
        let a = agents("openai/gpt-4.1", Some(vec!["x/a"]));
        let resolver = ModelFallbackResolver::new();
        let req = request(&a, "anthropic", "claude-opus-4-6");
        assert_eq!(
            refs(&resolver.ordered_candidates(&req)),
            refs(&resolve_fallback_candidates(&req))
        );
    }

    #[test]
    fn round_robin_rotates_per_chain() {
        let mut a = agents("openai/gpt-4.1", Some(vec!["x/a"]));
        a.defaults.model.strategy = Some(ModelSelectionStrategy::RoundRobin);
        let resolver = ModelFallbackResolver::new();
        let req = request(&a, "anthropic", "claude-opus-4-6");
        let starts: Vec<String> = (0..4).map(|_| first_called(&resolver, req)).collect();
        assert_eq!(
            starts,
            vec![
                "anthropic/claude-opus-4-6",
                "x/a",
                "openai/gpt-4.1",
                "anthropic/claude-opus-4-6"
            ]
        );
        // a different chain keeps its own position
        let other = request(&a, "google", "gemini-2.5-pro");
        assert_eq!(first_called(&resolver, other), "google/gemini-2.5-pro");
    }

    #[test]
    fn sticky_session_is_stable_per_session() {
        let a = agents("openai/gpt-4.1", Some(vec!["x/a"]));
        let resolver = ModelFallbackResolver::new();
        let mut req = request(&a, "anthropic", "claude-opus-4-6");
        req.strategy = Some(ModelSelectionStrategy::StickySession);
        req.session_key = Some("agent:main:main");

        let chain = resolve_fallback_candidates(&req);
        let expected = chain[session_hash("agent:main:main") as usize % chain.len()].to_string();
        assert_eq!(first_called(&resolver, req), expected);
        assert_eq!(first_called(&resolver, req), expected);

        req.session_key = None;
        assert_eq!(first_called(&resolver, req), "anthropic/claude-opus-4-6");
    }

    #[test]
    fn session_hash_matches_reference_values() {
        assert_eq!(session_hash(""), 0);
        assert_eq!(session_hash("a"), 97);
        assert_eq!(session_hash("ab"), 97 * 31 + 98);
    }

    #[tokio::test]
    async fn round_robin_walk_wraps_to_the_front() {
        let mut a = agents("openai/gpt-4.1", Some(vec!["x/a"]));
        a.defaults.model.strategy = Some(ModelSelectionStrategy::RoundRobin);
        let resolver = ModelFallbackResolver::new();
        let _ = resolver.ordered_candidates(&request(&a, "anthropic", "claude-opus-4-6"));

        let calls: Calls = Arc::default();
        let outcome = resolver
            .run(request(&a, "anthropic", "claude-opus-4-6"), |p, m| {
                calls.lock().unwrap().push(format!("{p}/{m}"));
                let fail = p == "x";
                async move {
                    if fail {
                        Err(ModelCallError::api(429, "busy"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["x/a", "openai/gpt-4.1"]);
        assert_eq!(outcome.provider, "openai");
    }

    // ── run ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn non_retryable_error_runs_once_and_propagates_unchanged() {
        let a = agents("openai/gpt-4.1", Some(vec!["google/gemini-2.5-pro"]));
        let calls: Calls = Arc::default();
        let original = ModelCallError::other("messages: field required");
        let result: Result<FallbackOutcome<()>, _> =
            run_with_model_fallback(request(&a, "anthropic", "claude-opus-4-6"), |p, m| {
                calls.lock().unwrap().push(format!("{p}/{m}"));
                let err = original.clone();
                async move { Err(err) }
            })
            .await;
        assert_eq!(calls.lock().unwrap().len(), 1);
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), original.to_string());
        assert_matches!(err.into_error(), Some(e) if e == original);
    }

    #[tokio::test]
    async fn auth_failure_moves_to_first_fallback() {
        let a = agents("openai/gpt-4.1", Some(vec!["google/gemini-2.5-pro", "openai/o3"]));
        let calls: Calls = Arc::default();
        let outcome = run_with_model_fallback(request(&a, "anthropic", "claude-opus-4-6"), |p, m| {
            let n = {
                let mut c = calls.lock().unwrap();
                c.push(format!("{p}/{m}"));
                c.len()
            };
            async move {
                if n == 1 {
                    Err(ModelCallError::api(401, "unauthorized"))
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["anthropic/claude-opus-4-6", "google/gemini-2.5-pro"]
        );
        assert_eq!(outcome.result, "done");
        assert_eq!(outcome.provider, "google");
        assert_eq!(outcome.model, "gemini-2.5-pro");
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].class, Some(FailureClass::TransientAuth));
    }

    #[tokio::test]
    async fn exhausted_chain_ends_on_primary_and_returns_last_error() {
        let a = agents("openai/gpt-4.1-mini", Some(vec![]));
        let calls: Calls = Arc::default();
        let result: Result<FallbackOutcome<()>, _> =
            run_with_model_fallback(request(&a, "openai", "gpt-4.1-mini"), |p, m| {
                let n = {
                    let mut c = calls.lock().unwrap();
                    c.push(format!("{p}/{m}"));
                    c.len()
                };
                async move { Err(ModelCallError::api(429, format!("rate limited #{n}"))) }
            })
            .await;

        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls.last().map(String::as_str), Some("openai/gpt-4.1-mini"));
        assert_eq!(calls.len(), 2);
        let err = result.unwrap_err();
        assert!(err.to_string().starts_with("All models failed (2): "));
        assert_matches!(err.into_error(), Some(ModelCallError::Api { message, .. }) if message == "rate limited #2");
    }

    #[tokio::test]
    async fn observer_sees_each_failure() {
        let a = agents("openai/gpt-4.1", Some(vec!["x/y"]));
        let seen: Calls = Arc::default();
        let sink = Arc::clone(&seen);
        let resolver = ModelFallbackResolver::new().with_observer(Arc::new(move |attempt| {
            sink.lock().unwrap().push(attempt.reason().to_owned());
        }));
        let _ = resolver
            .run(request(&a, "anthropic", "claude-opus-4-6"), |_, _| async {
                Err::<(), _>(ModelCallError::other("request timed out"))
            })
            .await;
        assert_eq!(*seen.lock().unwrap(), vec!["timeout", "timeout", "timeout"]);
    }

    #[tokio::test]
    async fn anyhow_errors_are_classified() {
        let a = agents("openai/gpt-4.1", Some(vec![]));
        let calls: Calls = Arc::default();
        let outcome = run_with_model_fallback(request(&a, "anthropic", "claude-opus-4-6"), |p, _| {
            calls.lock().unwrap().push(p.clone());
            async move {
                if p == "anthropic" {
                    Err(anyhow::anyhow!("Your credit balance is too low"))
                } else {
                    Ok(7)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(outcome.result, 7);
        assert_eq!(outcome.attempts[0].class, Some(FailureClass::TransientBilling));
    }

    // ── resilience integration ──────────────────────────────────────

    fn monitor(failure_threshold: u32, max_retries: u32) -> Arc<ResilienceMonitor> {
        let mut s = ResilienceSettings::default();
        s.circuit.failure_threshold = failure_threshold;
        s.retry_budget.max_retries = max_retries;
        Arc::new(ResilienceMonitor::new(s, ManualClock::new(0)))
    }

    #[tokio::test]
    async fn open_provider_circuit_is_skipped() {
        let m = monitor(1, 10);
        m.breakers()
            .breaker(&gantry_resilience::CircuitScope::Provider("anthropic".into()))
            .record_failure();
        let a = agents("openai/gpt-4.1", Some(vec![]));
        let calls: Calls = Arc::default();
        let outcome = ModelFallbackResolver::new()
            .with_monitor(Arc::clone(&m))
            .run(request(&a, "anthropic", "claude-opus-4-6"), |p, m| {
                calls.lock().unwrap().push(format!("{p}/{m}"));
                async { Ok::<_, ModelCallError>(()) }
            })
            .await
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["openai/gpt-4.1"]);
        assert_eq!(outcome.attempts[0].class, None);
        assert_eq!(m.snapshot_report().errors.total, 1);
    }

    #[tokio::test]
    async fn all_candidates_skipped_is_unavailable() {
        let m = monitor(1, 10);
        m.breakers()
            .breaker(&gantry_resilience::CircuitScope::Global)
            .record_failure();
        let a = agents("openai/gpt-4.1", Some(vec![]));
        let result = ModelFallbackResolver::new()
            .with_monitor(m)
            .run(request(&a, "anthropic", "claude-opus-4-6"), |_, _| async {
                Ok::<_, ModelCallError>(())
            })
            .await;
        let err = result.unwrap_err();
        assert_matches!(&err, FallbackError::Unavailable { attempts } if attempts.len() == 2);
        assert!(err.to_string().starts_with("No model available (2)"));
    }

    #[tokio::test]
    async fn spend_on_failed_candidates_is_reported_as_waste() {
        let m = monitor(100, 10);
        let a = agents("openai/gpt-4.1", Some(vec!["x/a"]));
        let outcome = ModelFallbackResolver::new()
            .with_monitor(Arc::clone(&m))
            .run_metered(request(&a, "anthropic", "claude-opus-4-6"), |p, _| async move {
                if p == "openai" {
                    Metered::new(Ok("answer"), 0.2)
                } else {
                    Metered::new(Err(ModelCallError::api(429, "slow down")), 0.3)
                }
            })
            .await
            .unwrap();
        assert_eq!(outcome.provider, "openai");

        let report = m.snapshot_report();
        assert!((report.costs.total_usd - 0.8).abs() < 1e-9);
        assert!((report.costs.wasted_usd - 0.6).abs() < 1e-9);
        assert!((report.costs.waste_pct - 75.0).abs() < 1e-9);
        assert!(
            report
                .recommendations
                .iter()
                .any(|r| r.contains("of spend went to failed attempts"))
        );
    }

    #[tokio::test]
    async fn non_retryable_spend_is_recorded() {
        let m = monitor(100, 10);
        let a = agents("openai/gpt-4.1", Some(vec![]));
        let result: Result<FallbackOutcome<()>, _> = ModelFallbackResolver::new()
            .with_monitor(Arc::clone(&m))
            .run_metered(request(&a, "anthropic", "claude-opus-4-6"), |_, _| async {
                Metered::new(Err(ModelCallError::other("messages: field required")), 0.5)
            })
            .await;
        assert!(result.is_err());
        let costs = m.snapshot_report().costs;
        assert!((costs.wasted_usd - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn spent_budget_stops_the_walk() {
        let m = monitor(100, 1);
        let a = agents("openai/gpt-4.1", Some(vec!["x/a", "x/b"]));
        let calls: Calls = Arc::default();
        let result: Result<FallbackOutcome<()>, _> = ModelFallbackResolver::new()
            .with_monitor(Arc::clone(&m))
            .run(request(&a, "anthropic", "claude-opus-4-6"), |p, m| {
                calls.lock().unwrap().push(format!("{p}/{m}"));
                async { Err(ModelCallError::api(429, "slow down")) }
            })
            .await;
        assert_eq!(calls.lock().unwrap().len(), 2);
        assert!(result.is_err());
        let alerts = m.alerts().recent(60_000);
        assert!(alerts.iter().any(|a| a.kind == AlertKind::BudgetExhausted));
        assert_eq!(m.dead_letters().len(), 1);
    }
}
