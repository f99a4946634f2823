//! Subagent handlers: spawn gate, completion, and the spawn audit views.

use async_trait::async_trait;
use gantry_runtime::{HistoryQuery, SpawnRequest};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::instrument;

use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::handlers::{parse_params, to_payload};
use crate::registry::MethodHandler;

/// Admits a subagent spawn if the allow-list and limits permit it.
pub struct SpawnHandler;

#[async_trait]
impl MethodHandler for SpawnHandler {
    #[instrument(skip_all, fields(method = "subagent.spawn"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let request: SpawnRequest = parse_params("subagent.spawn", params)?;
        let accepted = ctx.services.spawner.spawn(request).await?;
        to_payload(&accepted)
    }

    fn params_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "required": ["requesterSessionKey"],
            "properties": {
                "requesterSessionKey": { "type": "string", "minLength": 1 },
                "agentId": { "type": "string", "minLength": 1 },
                "label": { "type": "string" },
                "model": { "type": "string", "minLength": 1 }
            }
        }))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteParams {
    run_id: String,
}

/// Marks a child run ended, freeing the requester's slot.
pub struct CompleteHandler;

#[async_trait]
impl MethodHandler for CompleteHandler {
    #[instrument(skip_all, fields(method = "subagent.complete"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let p: CompleteParams = parse_params("subagent.complete", params)?;
        let completed = ctx.services.spawner.complete(&p.run_id)?;
        to_payload(&completed)
    }

    fn params_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "required": ["runId"],
            "properties": { "runId": { "type": "string", "minLength": 1 } }
        }))
    }
}

/// Spawn log, newest first.
pub struct HistoryHandler;

#[async_trait]
impl MethodHandler for HistoryHandler {
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let query: HistoryQuery = parse_params("subagent.history", params)?;
        let events = ctx.services.spawn_audit.query_spawn_history(&query);
        Ok(json!({ "events": to_payload(&events)? }))
    }

    fn params_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "agentId": { "type": "string" },
                "limit": { "type": "integer", "minimum": 0 },
                "windowMs": { "type": "integer", "minimum": 0 }
            }
        }))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateParams {
    agent_id: String,
}

/// Spawns by one agent inside the trailing window.
pub struct RateHandler;

#[async_trait]
impl MethodHandler for RateHandler {
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let p: RateParams = parse_params("subagent.rate", params)?;
        let audit = &ctx.services.spawn_audit;
        Ok(json!({
            "agentId": p.agent_id,
            "count": audit.spawn_rate(&p.agent_id),
            "windowMs": audit.window_ms(),
        }))
    }

    fn params_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "required": ["agentId"],
            "properties": { "agentId": { "type": "string", "minLength": 1 } }
        }))
    }
}

/// Per-agent spawn rates.
pub struct SummaryHandler;

#[async_trait]
impl MethodHandler for SummaryHandler {
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        to_payload(&ctx.services.spawn_audit.spawn_summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_helpers::make_test_context;
    use assert_matches::assert_matches;
    use gantry_core::ErrorCode;

    async fn spawn_main(ctx: &RpcContext) -> Value {
        SpawnHandler
            .handle(Some(json!({"requesterSessionKey": "agent:main:main"})), ctx)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn spawn_then_complete() {
        let ctx = make_test_context();
        let accepted = spawn_main(&ctx).await;
        assert_eq!(accepted["agentId"], "main");
        assert_eq!(accepted["spawnDepth"], 1);
        let run_id = accepted["runId"].as_str().unwrap().to_owned();

        let completed = CompleteHandler
            .handle(Some(json!({"runId": run_id})), &ctx)
            .await
            .unwrap();
        assert_eq!(completed["runId"], run_id.as_str());
        assert_eq!(completed["requesterSessionKey"], "agent:main:main");
    }

    #[tokio::test]
    async fn spawn_outside_allow_list_is_forbidden() {
        let ctx = make_test_context();
        let err = SpawnHandler
            .handle(
                Some(json!({"requesterSessionKey": "agent:main:main", "agentId": "intruder"})),
                &ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Forbidden);
        assert!(err.to_string().contains("intruder"));
    }

    #[tokio::test]
    async fn completing_twice_is_not_found() {
        let ctx = make_test_context();
        let accepted = spawn_main(&ctx).await;
        let params = json!({"runId": accepted["runId"]});
        let _ = CompleteHandler.handle(Some(params.clone()), &ctx).await.unwrap();
        let err = CompleteHandler.handle(Some(params), &ctx).await.unwrap_err();
        assert_matches!(err, RpcError::NotFound { .. });
    }

    #[tokio::test]
    async fn audit_views_reflect_spawns() {
        let ctx = make_test_context();
        let first = spawn_main(&ctx).await;
        let _ = CompleteHandler
            .handle(Some(json!({"runId": first["runId"]})), &ctx)
            .await
            .unwrap();
        let _ = spawn_main(&ctx).await;

        let history = HistoryHandler
            .handle(Some(json!({"agentId": "main", "limit": 1})), &ctx)
            .await
            .unwrap();
        assert_eq!(history["events"].as_array().unwrap().len(), 1);

        let rate = RateHandler
            .handle(Some(json!({"agentId": "main"})), &ctx)
            .await
            .unwrap();
        assert_eq!(rate["count"], 2);
        assert_eq!(rate["windowMs"], ctx.services.spawn_audit.window_ms());

        let summary = SummaryHandler.handle(None, &ctx).await.unwrap();
        assert_eq!(summary["totalSpawns"], 2);
        assert_eq!(summary["agents"][0]["agentId"], "main");
    }
}
