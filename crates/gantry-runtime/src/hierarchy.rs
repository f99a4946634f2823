//! Agent hierarchy snapshots.
//!
//! Nodes are the configured agents followed by any agent first seen as a run
//! child. Each node gets at most one parent edge, taken from the first source
//! that offers one:
//!
//! 1. live run relationships (ended runs linger for `ended_run_ttl_ms`), oldest first
//! 2. configured allow-lists, in configuration order
//!
//! Self edges, `*` wildcards, and edges into the default agent are skipped.
//! Traversal is depth-first with the ancestor path tracked, so an edge that
//! would close a cycle is dropped. Nodes left unplaced (cycle members) are
//! promoted to roots in node order. Every agent appears exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use gantry_core::SharedClock;
use gantry_core::session_key::agent_id_from_session_key;
use gantry_settings::{AgentsSettings, HierarchySettings};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Event published with a fresh snapshot whenever a run starts or ends.
pub const EVENT_HIERARCHY: &str = "hierarchy";

/// Where a parent edge came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeSource {
    /// A recorded run relationship.
    Run,
    /// A configured allow-list entry.
    AllowList,
}

/// A requester→child run relationship.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRelationship {
    /// Child run id.
    pub run_id: String,
    /// Session that requested the spawn.
    pub requester_session_key: String,
    /// Child session.
    pub child_session_key: String,
    /// When the run started.
    pub started_at_ms: i64,
    /// When the run ended, if it has.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<i64>,
}

/// One agent in a snapshot.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyNode {
    /// Agent id.
    pub agent_id: String,
    /// Source of the edge to this node's parent. `None` for roots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge: Option<EdgeSource>,
    /// Runs of this agent that have not ended.
    pub active_runs: usize,
    /// Children in edge order.
    pub children: Vec<HierarchyNode>,
}

/// A point-in-time forest of agents.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchySnapshot {
    /// When the snapshot was built.
    pub generated_at_ms: i64,
    /// Root nodes.
    pub roots: Vec<HierarchyNode>,
    /// Total nodes across all trees.
    pub node_count: usize,
}

impl HierarchySnapshot {
    /// Every agent id, depth-first.
    pub fn agent_ids(&self) -> Vec<String> {
        fn walk(node: &HierarchyNode, out: &mut Vec<String>) {
            out.push(node.agent_id.clone());
            for child in &node.children {
                walk(child, out);
            }
        }
        let mut out = Vec::with_capacity(self.node_count);
        for root in &self.roots {
            walk(root, &mut out);
        }
        out
    }
}

struct CachedSnapshot {
    bucket: i64,
    snapshot: Arc<HierarchySnapshot>,
}

/// Builds hierarchy snapshots from config and run relationships.
pub struct HierarchyBuilder {
    agents: Arc<AgentsSettings>,
    settings: HierarchySettings,
    clock: SharedClock,
    runs: Mutex<HashMap<String, RunRelationship>>,
    cache: Mutex<Option<CachedSnapshot>>,
}

impl HierarchyBuilder {
    /// Create a builder with no recorded runs.
    pub fn new(agents: Arc<AgentsSettings>, settings: HierarchySettings, clock: SharedClock) -> Self {
        Self {
            agents,
            settings,
            clock,
            runs: Mutex::new(HashMap::new()),
            cache: Mutex::new(None),
        }
    }

    /// Record a run relationship. Invalidates the cache.
    pub fn record_run_started(
        &self,
        run_id: &str,
        requester_session_key: &str,
        child_session_key: &str,
    ) {
        let rel = RunRelationship {
            run_id: run_id.to_owned(),
            requester_session_key: requester_session_key.to_owned(),
            child_session_key: child_session_key.to_owned(),
            started_at_ms: self.clock.now_ms(),
            ended_at_ms: None,
        };
        let _ = self.runs.lock().insert(run_id.to_owned(), rel);
        self.invalidate();
    }

    /// Mark a run ended. Returns `false` for unknown runs.
    pub fn record_run_ended(&self, run_id: &str) -> bool {
        let now = self.clock.now_ms();
        let found = self
            .runs
            .lock()
            .get_mut(run_id)
            .map(|rel| rel.ended_at_ms = Some(now))
            .is_some();
        if found {
            self.invalidate();
        }
        found
    }

    /// Recorded relationships, oldest first.
    pub fn runs(&self) -> Vec<RunRelationship> {
        let mut runs: Vec<RunRelationship> = self.runs.lock().values().cloned().collect();
        runs.sort_by(|a, b| {
            a.started_at_ms
                .cmp(&b.started_at_ms)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        runs
    }

    /// Drop the cached snapshot.
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    /// Current snapshot. Reads inside the same `cache_ttl_ms` bucket share one build.
    pub fn snapshot(&self) -> Arc<HierarchySnapshot> {
        let now = self.clock.now_ms();
        let ttl = i64::try_from(self.settings.cache_ttl_ms.max(1)).unwrap_or(i64::MAX);
        let bucket = now.div_euclid(ttl);
        let mut cache = self.cache.lock();
        if let Some(cached) = cache.as_ref().filter(|c| c.bucket == bucket) {
            return Arc::clone(&cached.snapshot);
        }
        let snapshot = Arc::new(self.build(now));
        *cache = Some(CachedSnapshot {
            bucket,
            snapshot: Arc::clone(&snapshot),
        });
        snapshot
    }

    /// Clear recorded runs and the cache.
    pub fn reset_for_tests(&self) {
        self.runs.lock().clear();
        self.invalidate();
    }

    fn build(&self, now: i64) -> HierarchySnapshot {
        let runs = self.live_runs(now);
        let default_agent = self.agents.default_agent_id();

        let mut arena = Arena::default();
        for id in self.agents.agent_ids() {
            let _ = arena.intern(&id);
        }
        let _ = arena.intern(&default_agent);
        for rel in &runs {
            if let Some(child) = agent_id_from_session_key(&rel.child_session_key) {
                let idx = arena.intern(&child);
                if rel.ended_at_ms.is_none() {
                    arena.active[idx] += 1;
                }
            }
        }
        let default_idx = arena.index(&default_agent);

        let mut parent: Vec<Option<usize>> = vec![None; arena.len()];
        let mut children: Vec<Vec<(usize, EdgeSource)>> = vec![Vec::new(); arena.len()];
        let mut link = |from: usize, to: usize, source: EdgeSource| {
            if from == to || Some(to) == default_idx || parent[to].is_some() {
                return;
            }
            parent[to] = Some(from);
            children[from].push((to, source));
        };

        for rel in &runs {
            let Some(child) = agent_id_from_session_key(&rel.child_session_key)
                .and_then(|c| arena.index(&c))
            else {
                continue;
            };
            // unparseable or unknown requester: the child stays a root
            let Some(from) = agent_id_from_session_key(&rel.requester_session_key)
                .and_then(|r| arena.index(&r))
            else {
                continue;
            };
            link(from, child, EdgeSource::Run);
        }
        for from_id in self.agents.agent_ids() {
            let Some(from) = arena.index(&from_id) else {
                continue;
            };
            for target in self.agents.allow_agents(&from_id) {
                if target == "*" {
                    continue;
                }
                if let Some(to) = arena.index(&target) {
                    link(from, to, EdgeSource::AllowList);
                }
            }
        }

        let mut walk = Walk {
            arena: &arena,
            children: &children,
            max_depth: self.settings.max_depth.max(1),
            placed: vec![false; arena.len()],
            on_path: vec![false; arena.len()],
        };
        let mut roots = Vec::new();
        for idx in 0..arena.len() {
            if parent[idx].is_none() {
                roots.push(walk.place(idx, None, 1));
            }
        }
        while let Some(idx) = walk.placed.iter().position(|p| !p) {
            debug!(agent_id = %arena.ids[idx], "promoting cycle member to root");
            roots.push(walk.place(idx, None, 1));
        }

        HierarchySnapshot {
            generated_at_ms: now,
            node_count: arena.len(),
            roots,
        }
    }

    fn live_runs(&self, now: i64) -> Vec<RunRelationship> {
        let ttl = i64::try_from(self.settings.ended_run_ttl_ms).unwrap_or(i64::MAX);
        self.runs
            .lock()
            .retain(|_, rel| rel.ended_at_ms.is_none_or(|ended| now.saturating_sub(ended) < ttl));
        self.runs()
    }
}

#[derive(Default)]
struct Arena {
    ids: Vec<String>,
    lookup: HashMap<String, usize>,
    active: Vec<usize>,
}

impl Arena {
    fn intern(&mut self, id: &str) -> usize {
        if let Some(idx) = self.lookup.get(id) {
            return *idx;
        }
        let idx = self.ids.len();
        self.ids.push(id.to_owned());
        self.active.push(0);
        let _ = self.lookup.insert(id.to_owned(), idx);
        idx
    }

    fn index(&self, id: &str) -> Option<usize> {
        self.lookup.get(id).copied()
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

struct Walk<'a> {
    arena: &'a Arena,
    children: &'a [Vec<(usize, EdgeSource)>],
    max_depth: usize,
    placed: Vec<bool>,
    on_path: Vec<bool>,
}

impl Walk<'_> {
    fn place(&mut self, idx: usize, edge: Option<EdgeSource>, depth: usize) -> HierarchyNode {
        self.placed[idx] = true;
        self.on_path[idx] = true;
        let mut nodes = Vec::new();
        if depth < self.max_depth {
            for &(child, source) in &self.children[idx] {
                if self.on_path[child] || self.placed[child] {
                    continue;
                }
                nodes.push(self.place(child, Some(source), depth + 1));
            }
        }
        self.on_path[idx] = false;
        HierarchyNode {
            agent_id: self.arena.ids[idx].clone(),
            edge,
            active_runs: self.arena.active[idx],
            children: nodes,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
