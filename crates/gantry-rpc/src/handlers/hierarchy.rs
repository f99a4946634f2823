//! Hierarchy snapshot handler.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::handlers::{parse_params, to_payload};
use crate::registry::MethodHandler;

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotParams {
    #[serde(default)]
    refresh: bool,
    #[serde(default)]
    include_runs: bool,
}

/// Current agent forest. `refresh` bypasses the cache; `includeRuns` adds the
/// run relationships the forest was built from.
pub struct SnapshotHandler;

#[async_trait]
impl MethodHandler for SnapshotHandler {
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let p: SnapshotParams = parse_params("hierarchy.snapshot", params)?;
        let hierarchy = &ctx.services.hierarchy;
        if p.refresh {
            hierarchy.invalidate();
        }
        let mut payload = to_payload(hierarchy.snapshot().as_ref())?;
        if p.include_runs {
            payload["runs"] = to_payload(&hierarchy.runs())?;
        }
        Ok(payload)
    }

    fn params_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "refresh": { "type": "boolean" },
                "includeRuns": { "type": "boolean" }
            }
        }))
    }
}
