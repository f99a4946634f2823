//! Health handlers: failure report and degradation level.

use async_trait::async_trait;
use gantry_resilience::DegradationLevel;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument};

use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::handlers::{parse_params, to_payload};
use crate::registry::MethodHandler;

/// Failure report over the configured window.
pub struct ReportHandler;

#[async_trait]
impl MethodHandler for ReportHandler {
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        to_payload(&ctx.services.resilience.snapshot_report())
    }
}

#[derive(Deserialize)]
struct SetDegradationParams {
    level: DegradationLevel,
}

/// Assigns the degradation level. Returns the previous and new level.
pub struct SetDegradationHandler;

#[async_trait]
impl MethodHandler for SetDegradationHandler {
    #[instrument(skip_all, fields(method = "health.setDegradation"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let p: SetDegradationParams = parse_params("health.setDegradation", params)?;
        let previous = ctx.services.resilience.set_degradation(p.level);
        if previous != p.level {
            info!(%previous, level = %p.level, "degradation level assigned");
        }
        Ok(json!({ "previous": previous, "level": p.level }))
    }

    fn params_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "required": ["level"],
            "properties": {
                "level": { "enum": ["NORMAL", "REDUCED", "MINIMAL", "EMERGENCY"] }
            }
        }))
    }
}
