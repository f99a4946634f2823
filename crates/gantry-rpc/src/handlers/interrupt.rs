//! Tool interrupt handlers: emit, resume, list.

use async_trait::async_trait;
use gantry_runtime::InterruptKey;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::instrument;

use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::handlers::{parse_params, to_payload};
use crate::registry::MethodHandler;

fn tuple_schema(extra: Value, extra_required: &[&str]) -> Value {
    let mut properties = json!({
        "approvalRequestId": { "type": "string", "minLength": 1 },
        "runId": { "type": "string", "minLength": 1 },
        "sessionKey": { "type": "string", "minLength": 1 },
        "toolCallId": { "type": "string", "minLength": 1 }
    });
    if let (Some(props), Value::Object(more)) = (properties.as_object_mut(), extra) {
        props.extend(more);
    }
    let mut required = vec!["approvalRequestId", "runId", "sessionKey", "toolCallId"];
    required.extend_from_slice(extra_required);
    json!({
        "type": "object",
        "required": required,
        "properties": properties
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmitParams {
    #[serde(flatten)]
    key: InterruptKey,
    #[serde(default)]
    interrupt: Value,
    timeout_ms: Option<u64>,
    #[serde(default)]
    two_phase: bool,
}

/// Parks a tool call. Responds with the settlement, or with `accepted` right
/// away in two-phase mode (the settlement then arrives only as a broadcast).
pub struct EmitHandler;

#[async_trait]
impl MethodHandler for EmitHandler {
    #[instrument(skip_all, fields(method = "tool.interrupt.emit"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let p: EmitParams = parse_params("tool.interrupt.emit", params)?;
        let (requested, wait) =
            ctx.services
                .interrupts
                .emit(p.key, p.interrupt, p.timeout_ms)?;

        if p.two_phase {
            let mut payload = to_payload(&requested)?;
            payload["status"] = json!("accepted");
            return Ok(payload);
        }
        to_payload(&wait.wait().await)
    }

    fn params_schema(&self) -> Option<Value> {
        Some(tuple_schema(
            json!({
                "interrupt": {},
                "timeoutMs": { "type": "integer", "minimum": 0 },
                "twoPhase": { "type": "boolean" }
            }),
            &[],
        ))
    }

    fn exempt_from_timeout(&self) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResumeParams {
    #[serde(flatten)]
    key: InterruptKey,
    resume_token: String,
    #[serde(default)]
    result: Value,
    resumed_by: Option<String>,
}

/// Resumes a parked tool call.
pub struct ResumeHandler;

#[async_trait]
impl MethodHandler for ResumeHandler {
    #[instrument(skip_all, fields(method = "tool.interrupt.resume"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let p: ResumeParams = parse_params("tool.interrupt.resume", params)?;
        let resumed = ctx.services.interrupts.resume(
            &p.key,
            &p.resume_token,
            p.result,
            p.resumed_by,
        )?;
        let mut payload = to_payload(&resumed)?;
        payload["status"] = json!("resumed");
        Ok(payload)
    }

    fn params_schema(&self) -> Option<Value> {
        Some(tuple_schema(
            json!({
                "resumeToken": { "type": "string", "minLength": 1 },
                "result": {},
                "resumedBy": { "type": "string" }
            }),
            &["resumeToken"],
        ))
    }
}

/// Lists pending interrupts (without tokens).
pub struct ListHandler;

#[async_trait]
impl MethodHandler for ListHandler {
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let pending = ctx.services.interrupts.list_pending();
        Ok(json!({ "count": pending.len(), "interrupts": to_payload(&pending)? }))
    }
}
