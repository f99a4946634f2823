//! Session metadata store used by the spawner.

use async_trait::async_trait;
use dashmap::DashMap;
use gantry_core::SharedClock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Spawn-relevant metadata for one session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    /// 0 for top-level sessions, parent depth + 1 for subagents.
    pub spawn_depth: u32,
    /// Requester session key for subagent sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spawned_by: Option<String>,
    /// Model override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Display label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Last write.
    pub updated_at_ms: i64,
}

/// Partial update. `None` leaves a field unchanged.
#[derive(Clone, Debug, Default)]
#[allow(missing_docs)]
pub struct SessionPatch {
    pub spawn_depth: Option<u32>,
    pub spawned_by: Option<String>,
    pub model: Option<String>,
    pub label: Option<String>,
}

/// Store failure.
#[derive(Debug, Error)]
#[error("session store: {0}")]
pub struct SessionStoreError(pub String);

/// Session metadata persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch an entry.
    async fn get(&self, session_key: &str) -> Result<Option<SessionEntry>, SessionStoreError>;

    /// Apply a patch, creating the entry if needed. Returns the merged entry.
    async fn patch(
        &self,
        session_key: &str,
        patch: SessionPatch,
    ) -> Result<SessionEntry, SessionStoreError>;

    /// Remove an entry.
    async fn remove(&self, session_key: &str) -> Result<(), SessionStoreError>;
}

/// Process-local store.
pub struct InMemorySessionStore {
    entries: DashMap<String, SessionEntry>,
    clock: SharedClock,
}

impl InMemorySessionStore {
    /// Empty store.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_key: &str) -> Result<Option<SessionEntry>, SessionStoreError> {
        Ok(self.entries.get(session_key).map(|e| e.value().clone()))
    }

    async fn patch(
        &self,
        session_key: &str,
        patch: SessionPatch,
    ) -> Result<SessionEntry, SessionStoreError> {
        let now = self.clock.now_ms();
        let mut entry = self.entries.entry(session_key.to_owned()).or_default();
        if let Some(depth) = patch.spawn_depth {
            entry.spawn_depth = depth;
        }
        if patch.spawned_by.is_some() {
            entry.spawned_by = patch.spawned_by;
        }
        if patch.model.is_some() {
            entry.model = patch.model;
        }
        if patch.label.is_some() {
            entry.label = patch.label;
        }
        entry.updated_at_ms = now;
        Ok(entry.clone())
    }

    async fn remove(&self, session_key: &str) -> Result<(), SessionStoreError> {
        let _ = self.entries.remove(session_key);
        Ok(())
    }
}
