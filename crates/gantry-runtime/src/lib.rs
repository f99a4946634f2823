//! # gantry-runtime
//!
//! Stateful gateway services:
//!
//! - **Interrupts**: park a tool call until a matching resume or a timeout, whichever comes first
//! - **Spawn gate**: allow-list, depth, and child-count checks before a subagent session exists
//! - **Spawn audit**: append-only log with per-agent trailing-window rates and alerts
//! - **Hierarchy**: acyclic forest of agents built from run relationships and allow-lists
//! - **Services**: the [`GatewayServices`] bundle that wires everything together

#![deny(unsafe_code)]

pub mod hierarchy;
pub mod interrupts;
pub mod services;
pub mod session_store;
pub mod spawn;
pub mod spawn_audit;

pub use hierarchy::{
    EVENT_HIERARCHY, EdgeSource, HierarchyBuilder, HierarchyNode, HierarchySnapshot,
    RunRelationship,
};
pub use interrupts::{
    InterruptError, InterruptKey, InterruptRequested, InterruptSettlement, InterruptStatus,
    InterruptWait, PendingInterrupt, ToolInterruptManager,
};
pub use services::GatewayServices;
pub use session_store::{InMemorySessionStore, SessionEntry, SessionPatch, SessionStore, SessionStoreError};
pub use spawn::{CompletedRun, SpawnAccepted, SpawnError, SpawnRequest, SubagentSpawner};
pub use spawn_audit::{HistoryQuery, SpawnAudit, SpawnEvent, SpawnSummary};
