//! System handlers: ping, methods.

use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::registry::MethodHandler;

/// Returns a pong with the current timestamp and uptime.
pub struct PingHandler;

#[async_trait]
impl MethodHandler for PingHandler {
    #[instrument(skip(self, ctx), fields(method = "system.ping"))]
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        Ok(serde_json::json!({
            "pong": true,
            "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "uptimeSecs": ctx.started_at.elapsed().as_secs(),
        }))
    }
}

/// Lists registered methods.
pub struct MethodsHandler {
    methods: Vec<String>,
}

impl MethodsHandler {
    /// Handler reporting `methods`.
    pub fn new(methods: Vec<String>) -> Self {
        Self { methods }
    }
}

#[async_trait]
impl MethodHandler for MethodsHandler {
    async fn handle(&self, _params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
        Ok(serde_json::json!({ "methods": self.methods }))
    }
}
