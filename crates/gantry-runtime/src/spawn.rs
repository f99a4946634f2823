//! Subagent spawn gate.

use std::collections::HashMap;
use std::sync::Arc;

use gantry_core::session_key::{
    agent_id_from_session_key, main_session_key, normalize_agent_id, qualify_session_key,
    subagent_session_key,
};
use gantry_core::{ErrorCode, EventBroadcaster, RunId, SharedClock};
use gantry_settings::AgentsSettings;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::hierarchy::{EVENT_HIERARCHY, HierarchyBuilder};
use crate::session_store::{SessionPatch, SessionStore, SessionStoreError};
use crate::spawn_audit::SpawnAudit;

/// Event published for every accepted spawn.
pub const EVENT_SPAWNED: &str = "subagent.spawned";

/// A request to spawn a subagent.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnRequest {
    /// Session asking for the child.
    pub requester_session_key: String,
    /// Target agent. Defaults to the requester's own agent.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Display label for the child session.
    #[serde(default)]
    pub label: Option<String>,
    /// Model override for the child session.
    #[serde(default)]
    pub model: Option<String>,
}

/// An accepted spawn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnAccepted {
    /// Child run.
    pub run_id: RunId,
    /// Child session key.
    pub child_session_key: String,
    /// Agent the child runs as.
    pub agent_id: String,
    /// Session that asked.
    pub requester_session_key: String,
    /// Depth of the child session.
    pub spawn_depth: u32,
    /// Model the child uses, if one was resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Display label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// When the spawn was accepted.
    pub spawned_at_ms: i64,
}

/// A run marked complete.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedRun {
    /// Child run.
    pub run_id: String,
    /// Child session key.
    pub child_session_key: String,
    /// Session that spawned it.
    pub requester_session_key: String,
    /// When it ended.
    pub ended_at_ms: i64,
}

/// Spawn failures.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// A limit or allow-list refused the spawn.
    #[error("{0}")]
    Forbidden(String),
    /// Malformed request.
    #[error("invalid spawn request: {0}")]
    Invalid(String),
    /// No active run with this id.
    #[error("unknown run: {0}")]
    UnknownRun(String),
    /// The session store failed.
    #[error(transparent)]
    Store(#[from] SessionStoreError),
}

impl SpawnError {
    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::Invalid(_) => ErrorCode::InvalidRequest,
            Self::UnknownRun(_) => ErrorCode::NotFound,
            Self::Store(_) => ErrorCode::Unavailable,
        }
    }
}

#[derive(Clone, Debug)]
struct ActiveChild {
    requester_session_key: String,
    child_session_key: String,
}

/// Gates and records subagent spawns.
pub struct SubagentSpawner {
    agents: Arc<AgentsSettings>,
    store: Arc<dyn SessionStore>,
    audit: Arc<SpawnAudit>,
    hierarchy: Arc<HierarchyBuilder>,
    broadcaster: Arc<EventBroadcaster>,
    clock: SharedClock,
    active: Mutex<HashMap<String, ActiveChild>>,
}

impl SubagentSpawner {
    /// Wire the spawner to its collaborators.
    pub fn new(
        agents: Arc<AgentsSettings>,
        store: Arc<dyn SessionStore>,
        audit: Arc<SpawnAudit>,
        hierarchy: Arc<HierarchyBuilder>,
        broadcaster: Arc<EventBroadcaster>,
        clock: SharedClock,
    ) -> Self {
        Self {
            agents,
            store,
            audit,
            hierarchy,
            broadcaster,
            clock,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a requester key to its agent-scoped form.
    ///
    /// The `main` alias is the default agent's main session. Other bare keys
    /// are qualified under the default agent.
    pub fn resolve_requester_key(&self, raw: &str) -> String {
        let default_agent = self.agents.default_agent_id();
        match raw.trim() {
            "main" => main_session_key(&default_agent),
            key => qualify_session_key(&default_agent, key),
        }
    }

    /// Check limits, create the child session, and record the spawn.
    pub async fn spawn(&self, request: SpawnRequest) -> Result<SpawnAccepted, SpawnError> {
        if request.requester_session_key.trim().is_empty() {
            return Err(SpawnError::Invalid("requesterSessionKey is required".into()));
        }
        let requester_key = self.resolve_requester_key(&request.requester_session_key);
        let requester_agent = agent_id_from_session_key(&requester_key)
            .unwrap_or_else(|| self.agents.default_agent_id());
        let target_agent = request
            .agent_id
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map_or_else(|| requester_agent.clone(), normalize_agent_id);

        if target_agent != requester_agent {
            let allowed = self.agents.allow_agents(&requester_agent);
            if !allowed.iter().any(|a| a == "*" || *a == target_agent) {
                let allowed_text = if allowed.is_empty() {
                    "none".to_owned()
                } else {
                    allowed.join(", ")
                };
                return Err(self.forbid(
                    &requester_agent,
                    format!("agentId {target_agent} is not allowed (allowed: {allowed_text})"),
                ));
            }
        }

        let parent = self.store.get(&requester_key).await?;
        let depth = parent.as_ref().map_or(0, |p| p.spawn_depth);
        let limits = &self.agents.defaults.subagents;
        if depth >= limits.max_spawn_depth {
            return Err(self.forbid(
                &requester_agent,
                format!(
                    "spawn depth {depth} has reached the limit of {}",
                    limits.max_spawn_depth
                ),
            ));
        }

        let run_id = RunId::new();
        let child_key = subagent_session_key(&target_agent);
        {
            let mut active = self.active.lock();
            let children = active
                .values()
                .filter(|c| c.requester_session_key == requester_key)
                .count();
            if children >= limits.max_children_per_agent {
                drop(active);
                return Err(self.forbid(
                    &requester_agent,
                    format!(
                        "requester already has {children} active children (limit {})",
                        limits.max_children_per_agent
                    ),
                ));
            }
            let _ = active.insert(
                run_id.to_string(),
                ActiveChild {
                    requester_session_key: requester_key.clone(),
                    child_session_key: child_key.clone(),
                },
            );
        }

        let model = request
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .or_else(|| self.agents.subagent_model(&target_agent))
            .or_else(|| parent.and_then(|p| p.model));
        let patch = SessionPatch {
            spawn_depth: Some(depth + 1),
            spawned_by: Some(requester_key.clone()),
            model: model.clone(),
            label: request.label.clone(),
        };
        if let Err(err) = self.store.patch(&child_key, patch).await {
            let _ = self.active.lock().remove(run_id.as_str());
            warn!(requester = %requester_key, error = %err, "child session write failed");
            return Err(err.into());
        }

        let _ = self.audit.record_spawn(
            &requester_agent,
            run_id.as_str(),
            &child_key,
            request.label.clone(),
        );
        self.hierarchy
            .record_run_started(run_id.as_str(), &requester_key, &child_key);

        let accepted = SpawnAccepted {
            run_id,
            child_session_key: child_key,
            agent_id: target_agent,
            requester_session_key: requester_key,
            spawn_depth: depth + 1,
            model,
            label: request.label,
            spawned_at_ms: self.clock.now_ms(),
        };
        let _ = self.broadcaster.broadcast(
            EVENT_SPAWNED,
            serde_json::to_value(&accepted).unwrap_or_default(),
        );
        self.publish_hierarchy("started", accepted.run_id.as_str());
        info!(
            run_id = %accepted.run_id,
            agent_id = %accepted.agent_id,
            requester = %accepted.requester_session_key,
            spawn_depth = accepted.spawn_depth,
            "subagent spawned"
        );
        Ok(accepted)
    }

    /// Mark a child run ended, freeing its slot.
    pub fn complete(&self, run_id: &str) -> Result<CompletedRun, SpawnError> {
        let child = self
            .active
            .lock()
            .remove(run_id)
            .ok_or_else(|| SpawnError::UnknownRun(run_id.to_owned()))?;
        let _ = self.hierarchy.record_run_ended(run_id);
        self.publish_hierarchy("ended", run_id);
        info!(run_id, child_session_key = %child.child_session_key, "subagent run completed");
        Ok(CompletedRun {
            run_id: run_id.to_owned(),
            child_session_key: child.child_session_key,
            requester_session_key: child.requester_session_key,
            ended_at_ms: self.clock.now_ms(),
        })
    }

    /// Active children of `requester_session_key`.
    pub fn active_children(&self, requester_session_key: &str) -> usize {
        self.active
            .lock()
            .values()
            .filter(|c| c.requester_session_key == requester_session_key)
            .count()
    }

    /// Forget every active child.
    pub fn reset_for_tests(&self) {
        self.active.lock().clear();
    }

    fn publish_hierarchy(&self, reason: &str, run_id: &str) {
        let snapshot = self.hierarchy.snapshot();
        let _ = self.broadcaster.broadcast(
            EVENT_HIERARCHY,
            json!({ "reason": reason, "runId": run_id, "snapshot": &*snapshot }),
        );
    }

    fn forbid(&self, requester_agent: &str, message: String) -> SpawnError {
        warn!(agent_id = requester_agent, "{message}");
        metrics::counter!("subagent_spawns_rejected_total", "agent" => requester_agent.to_owned())
            .increment(1);
        SpawnError::Forbidden(message)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
