//! Subagent spawn audit trail and rate alerting.
//!
//! Every spawn is appended to a log. A per-agent timestamp deque backs the
//! rate query; it is pruned lazily whenever it is read or written. A spawn
//! counts toward the rate while `now - timestamp < window`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use gantry_core::SharedClock;
use gantry_settings::{AlertCadence, SpawnAuditSettings};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One recorded spawn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnEvent {
    /// Agent that spawned the child.
    pub agent_id: String,
    /// Child run.
    pub run_id: String,
    /// Child session key.
    pub child_session_key: String,
    /// Optional label supplied by the requester.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// When the spawn was recorded.
    pub timestamp_ms: i64,
}

/// Invoked with `(message, agent_id)` whenever a rate alert fires.
pub type SpawnAlertCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Filters for [`SpawnAudit::query_spawn_history`].
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    /// Only this agent.
    pub agent_id: Option<String>,
    /// At most this many events.
    pub limit: Option<usize>,
    /// Only events newer than this many milliseconds.
    pub window_ms: Option<u64>,
}

/// Per-agent rate in [`SpawnAudit::spawn_summary`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpawnRate {
    /// Agent id.
    pub agent_id: String,
    /// Spawns inside the window.
    pub count: usize,
    /// Spawns per minute over the window.
    pub per_minute: f64,
}

/// Audit-wide summary.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnSummary {
    /// Window the rates are computed over.
    pub window_ms: u64,
    /// Spawns ever recorded.
    pub total_spawns: usize,
    /// Rate per agent, sorted by agent id.
    pub agents: Vec<AgentSpawnRate>,
}

#[derive(Clone, Copy, Debug)]
struct AlertRule {
    threshold: usize,
    cadence: AlertCadence,
}

#[derive(Default)]
struct AuditState {
    log: Vec<SpawnEvent>,
    recent: HashMap<String, VecDeque<i64>>,
    rule: Option<AlertRule>,
    alerted: HashSet<String>,
}

/// Spawn audit log.
pub struct SpawnAudit {
    clock: SharedClock,
    window_ms: u64,
    state: Mutex<AuditState>,
    callback: RwLock<Option<SpawnAlertCallback>>,
}

impl SpawnAudit {
    /// Create an audit with the configured window and alert threshold.
    pub fn new(settings: &SpawnAuditSettings, clock: SharedClock) -> Self {
        let state = AuditState {
            rule: settings.alert_threshold.map(|threshold| AlertRule {
                threshold,
                cadence: settings.alert_cadence,
            }),
            ..AuditState::default()
        };
        Self {
            clock,
            window_ms: settings.window_ms.max(1),
            state: Mutex::new(state),
            callback: RwLock::new(None),
        }
    }

    /// Trailing window in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Configure rate alerting. A `None` threshold disables it.
    ///
    /// `callback` replaces any previous callback when given.
    pub fn configure_spawn_rate_alert(
        &self,
        threshold: Option<usize>,
        cadence: AlertCadence,
        callback: Option<SpawnAlertCallback>,
    ) {
        {
            let mut state = self.state.lock();
            state.rule = threshold
                .filter(|t| *t > 0)
                .map(|threshold| AlertRule { threshold, cadence });
            state.alerted.clear();
        }
        if let Some(cb) = callback {
            *self.callback.write() = Some(cb);
        }
    }

    /// Record a spawn and evaluate the alert rule.
    pub fn record_spawn(
        &self,
        agent_id: &str,
        run_id: &str,
        child_session_key: &str,
        label: Option<String>,
    ) -> SpawnEvent {
        let now = self.clock.now_ms();
        let event = SpawnEvent {
            agent_id: agent_id.to_owned(),
            run_id: run_id.to_owned(),
            child_session_key: child_session_key.to_owned(),
            label,
            timestamp_ms: now,
        };

        let alert = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.log.push(event.clone());
            let recent = state.recent.entry(agent_id.to_owned()).or_default();
            let before = prune(recent, now, self.window_ms);
            recent.push_back(now);
            let count = before + 1;

            state.rule.and_then(|rule| {
                if before < rule.threshold {
                    let _ = state.alerted.remove(agent_id);
                }
                if count < rule.threshold {
                    return None;
                }
                let fire = match rule.cadence {
                    AlertCadence::Level => true,
                    AlertCadence::Edge => state.alerted.insert(agent_id.to_owned()),
                };
                fire.then_some((count, rule.threshold))
            })
        };

        metrics::counter!("subagent_spawns_total", "agent" => agent_id.to_owned()).increment(1);
        debug!(agent_id, run_id, child_session_key, "subagent spawn recorded");

        if let Some((count, threshold)) = alert {
            let message = format!(
                "RATE ALERT: agent {agent_id} spawned {count} subagents in the last {}s (threshold {threshold})",
                self.window_ms / 1000
            );
            warn!(agent_id, count, threshold, "{message}");
            let callback = self.callback.read().clone();
            if let Some(cb) = callback {
                cb(&message, agent_id);
            }
        }
        event
    }

    /// Spawns by `agent_id` inside the trailing window.
    pub fn spawn_rate(&self, agent_id: &str) -> usize {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        state
            .recent
            .get_mut(agent_id)
            .map_or(0, |recent| prune(recent, now, self.window_ms))
    }

    /// Recorded spawns, newest first.
    pub fn query_spawn_history(&self, query: &HistoryQuery) -> Vec<SpawnEvent> {
        let now = self.clock.now_ms();
        let state = self.state.lock();
        let limit = query.limit.unwrap_or(usize::MAX);
        state
            .log
            .iter()
            .rev()
            .filter(|e| query.agent_id.as_deref().is_none_or(|a| e.agent_id == a))
            .filter(|e| query.window_ms.is_none_or(|w| within(now, e.timestamp_ms, w)))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Per-agent rates for every agent that has ever spawned.
    pub fn spawn_summary(&self) -> SpawnSummary {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let total_spawns = state.log.len();
        #[allow(clippy::cast_precision_loss)]
        let minutes = self.window_ms as f64 / 60_000.0;
        let mut agents: Vec<AgentSpawnRate> = state
            .recent
            .iter_mut()
            .map(|(agent_id, recent)| {
                let count = prune(recent, now, self.window_ms);
                #[allow(clippy::cast_precision_loss)]
                let per_minute = count as f64 / minutes;
                AgentSpawnRate {
                    agent_id: agent_id.clone(),
                    count,
                    per_minute,
                }
            })
            .collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        SpawnSummary {
            window_ms: self.window_ms,
            total_spawns,
            agents,
        }
    }

    /// Spawns ever recorded.
    pub fn total_spawns(&self) -> usize {
        self.state.lock().log.len()
    }

    /// Clear the log, rates, alert rule, and callback.
    pub fn reset_for_tests(&self) {
        *self.state.lock() = AuditState::default();
        *self.callback.write() = None;
    }
}

fn within(now: i64, ts: i64, window_ms: u64) -> bool {
    u64::try_from(now.saturating_sub(ts)).map_or(true, |age| age < window_ms)
}

/// Drop timestamps that left the window. Returns what remains.
fn prune(recent: &mut VecDeque<i64>, now: i64, window_ms: u64) -> usize {
    while recent.front().is_some_and(|ts| !within(now, *ts, window_ms)) {
        let _ = recent.pop_front();
    }
    recent.len()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
