//! End-to-end dispatch through the full method table.

use std::sync::Arc;

use gantry_core::{ErrorCode, ManualClock, SharedClock};
use gantry_rpc::{MethodRegistry, RpcContext, RpcRequest, RpcResponse, register_all};
use gantry_runtime::{GatewayServices, InMemorySessionStore, SessionStore};
use gantry_settings::GatewaySettings;
use serde_json::{Value, json};

struct Harness {
    registry: MethodRegistry,
    ctx: RpcContext,
    next_id: std::cell::Cell<u32>,
}

impl Harness {
    fn new(settings: GatewaySettings) -> Self {
        let clock: SharedClock = ManualClock::new(1_000);
        let sessions: Arc<dyn SessionStore> =
            Arc::new(InMemorySessionStore::new(Arc::clone(&clock)));
        let mut registry = MethodRegistry::with_settings(&settings.rpc);
        register_all(&mut registry).unwrap();
        let services = Arc::new(GatewayServices::with_parts(settings, clock, sessions));
        Self {
            registry,
            ctx: RpcContext::new(services),
            next_id: std::cell::Cell::new(0),
        }
    }

    async fn call(&self, method: &str, params: Value) -> RpcResponse {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        self.registry
            .dispatch(RpcRequest::new(format!("r{id}"), method, Some(params)), &self.ctx)
            .await
    }

    async fn ok(&self, method: &str, params: Value) -> Value {
        let response = self.call(method, params).await;
        assert!(response.ok, "{method} failed: {:?}", response.error);
        response.payload.unwrap()
    }
}

fn tuple() -> Value {
    json!({
        "approvalRequestId": "appr-7",
        "runId": "run-7",
        "sessionKey": "agent:main:main",
        "toolCallId": "call-7",
    })
}

fn merged(extra: Value) -> Value {
    let mut base = tuple();
    if let (Some(b), Value::Object(e)) = (base.as_object_mut(), extra) {
        b.extend(e);
    }
    base
}

// ── Router ──────────────────────────────────────────────────────────

#[tokio::test]
async fn methods_lists_the_full_table() {
    let h = Harness::new(GatewaySettings::default());
    let payload = h.ok("system.methods", json!({})).await;
    let methods = payload["methods"].as_array().unwrap();
    assert_eq!(methods.len(), 13);
    assert!(methods.contains(&json!("tool.interrupt.emit")));
}

#[tokio::test]
async fn unknown_method_is_invalid_request() {
    let h = Harness::new(GatewaySettings::default());
    let response = h.call("nope.nothing", json!({})).await;
    assert!(!response.ok);
    let error = response.error.unwrap();
    assert_eq!(error.code, ErrorCode::InvalidRequest);
    assert_eq!(error.message, "unknown method: nope.nothing");
}

#[tokio::test]
async fn schema_violation_response_shape() {
    let h = Harness::new(GatewaySettings::default());
    let response = h.call("subagent.complete", json!({})).await;
    insta::assert_json_snapshot!(response, @r#"
    {
      "id": "r1",
      "ok": false,
      "error": {
        "code": "INVALID_REQUEST",
        "message": "invalid subagent.complete params: \"runId\" is a required property"
      }
    }
    "#);
}

// ── Interrupts ──────────────────────────────────────────────────────

#[tokio::test]
async fn two_phase_interrupt_resumes_once() {
    let h = Harness::new(GatewaySettings::default());
    let mut events = h.ctx.services.subscribe();

    let accepted = h
        .ok("tool.interrupt.emit", merged(json!({"twoPhase": true, "interrupt": {"cmd": "rm"}})))
        .await;
    assert_eq!(accepted["status"], "accepted");
    let token = accepted["resumeToken"].as_str().unwrap().to_owned();

    let requested = events.try_recv().unwrap();
    assert_eq!(requested.event, "tool.interrupt.requested");
    assert_eq!(requested.payload["resumeToken"], token.as_str());

    let listed = h.ok("tool.interrupt.list", json!({})).await;
    assert_eq!(listed["count"], 1);

    let resumed = h
        .ok(
            "tool.interrupt.resume",
            merged(json!({"resumeToken": token, "result": {"approved": true}})),
        )
        .await;
    assert_eq!(resumed["status"], "resumed");
    assert_eq!(resumed["result"]["approved"], true);

    let event = events.try_recv().unwrap();
    assert_eq!(event.event, "tool.interrupt.resumed");
    assert!(event.seq > requested.seq);

    let again = h
        .call("tool.interrupt.resume", merged(json!({"resumeToken": token})))
        .await;
    assert_eq!(again.error.unwrap().code, ErrorCode::InvalidRequest);
}

#[tokio::test]
async fn duplicate_emit_is_rejected() {
    let h = Harness::new(GatewaySettings::default());
    let _ = h.ok("tool.interrupt.emit", merged(json!({"twoPhase": true}))).await;
    let dup = h.call("tool.interrupt.emit", merged(json!({"twoPhase": true}))).await;
    let error = dup.error.unwrap();
    assert_eq!(error.code, ErrorCode::InvalidRequest);
    assert!(error.message.contains("already pending"));
}

#[tokio::test(start_paused = true)]
async fn blocking_emit_expires_after_timeout() {
    let h = Harness::new(GatewaySettings::default());
    let settled = h.ok("tool.interrupt.emit", merged(json!({"timeoutMs": 50}))).await;
    assert_eq!(settled["status"], "expired");
    assert_eq!(settled["toolCallId"], "call-7");
    assert_eq!(h.ctx.services.interrupts.pending_count(), 0);
}

#[tokio::test]
async fn emit_missing_tuple_field_fails_validation() {
    let h = Harness::new(GatewaySettings::default());
    let mut params = tuple();
    let _ = params.as_object_mut().unwrap().remove("toolCallId");
    let response = h.call("tool.interrupt.emit", params).await;
    let error = response.error.unwrap();
    assert_eq!(error.code, ErrorCode::InvalidRequest);
    assert!(error.message.contains("toolCallId"));
}

// ── Subagents ───────────────────────────────────────────────────────

#[tokio::test]
async fn subagent_session_cannot_spawn_at_default_depth() {
    let h = Harness::new(GatewaySettings::default());
    let child = h
        .ok("subagent.spawn", json!({"requesterSessionKey": "agent:main:main"}))
        .await;
    let child_key = child["childSessionKey"].as_str().unwrap();

    let nested = h
        .call("subagent.spawn", json!({"requesterSessionKey": child_key}))
        .await;
    let error = nested.error.unwrap();
    assert_eq!(error.code, ErrorCode::Forbidden);
    assert!(error.message.contains("spawn depth"));
}

#[tokio::test]
async fn spawn_rate_alert_reaches_the_health_report() {
    let settings: GatewaySettings = serde_json::from_value(json!({
        "spawnAudit": {"alertThreshold": 2}
    }))
    .unwrap();
    let h = Harness::new(settings);
    for _ in 0..2 {
        let _ = h
            .ok("subagent.spawn", json!({"requesterSessionKey": "agent:main:main"}))
            .await;
    }

    let rate = h.ok("subagent.rate", json!({"agentId": "main"})).await;
    assert_eq!(rate["count"], 2);

    let report = h.ok("health.report", json!({})).await;
    let alerts = report["alerts"].as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["kind"], "spawn_rate");
    assert!(report["healthScore"].as_f64().unwrap() < 100.0);
}

#[tokio::test]
async fn hierarchy_reflects_spawned_runs() {
    let settings: GatewaySettings = serde_json::from_value(json!({
        "agents": {"list": [
            {"id": "main", "default": true, "subagents": {"allowAgents": ["coder"]}},
            {"id": "coder"},
            {"id": "ops"}
        ]}
    }))
    .unwrap();
    let h = Harness::new(settings);
    let _ = h
        .ok(
            "subagent.spawn",
            json!({"requesterSessionKey": "agent:main:main", "agentId": "coder"}),
        )
        .await;

    let snapshot = h.ok("hierarchy.snapshot", json!({"refresh": true})).await;
    assert_eq!(snapshot["nodeCount"], 3);
    let roots: Vec<&str> = snapshot["roots"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["agentId"].as_str())
        .collect();
    assert_eq!(roots, vec!["main", "ops"]);
    let coder = &snapshot["roots"][0]["children"][0];
    assert_eq!(coder["agentId"], "coder");
    assert_eq!(coder["edge"], "run");
    assert_eq!(coder["activeRuns"], 1);
}

// ── Health ──────────────────────────────────────────────────────────

#[tokio::test]
async fn degradation_round_trips_through_the_router() {
    let h = Harness::new(GatewaySettings::default());
    let bad = h.call("health.setDegradation", json!({"level": "LOW"})).await;
    assert_eq!(bad.error.unwrap().code, ErrorCode::InvalidRequest);

    let set = h.ok("health.setDegradation", json!({"level": "EMERGENCY"})).await;
    assert_eq!(set["previous"], "NORMAL");
    let report = h.ok("health.report", json!({})).await;
    assert_eq!(report["degradation"], "EMERGENCY");
    assert_eq!(report["healthScore"], 60.0);
}
