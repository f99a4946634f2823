//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production values. Types marked `#[serde(default)]`
//! accept partial JSON.

mod agents;
mod resilience;
mod runtime;

pub use agents::*;
pub use resilience::*;
pub use runtime::*;

use serde::{Deserialize, Serialize};

/// Root settings type for the gateway.
///
/// ```json
/// {
///   "agents": { "list": [{ "id": "main", "default": true }] },
///   "interrupts": { "defaultTimeoutMs": 600000 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Agent list, delegation allow-lists, and model chains.
    pub agents: AgentsSettings,
    /// Tool interrupt timeouts.
    pub interrupts: InterruptSettings,
    /// Spawn-rate auditing and alerting.
    pub spawn_audit: SpawnAuditSettings,
    /// Hierarchy snapshot tuning.
    pub hierarchy: HierarchySettings,
    /// Circuit breakers, retry budget, and health reporting.
    pub resilience: ResilienceSettings,
    /// Request router tuning.
    pub rpc: RpcSettings,
}
