//! Method registry and async dispatch.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use gantry_core::ErrorShape;
use gantry_settings::RpcSettings;
use jsonschema::{Draft, JSONSchema};
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::types::{RpcRequest, RpcResponse};

/// Trait implemented by every method handler.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler with the given params and context.
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError>;

    /// JSON schema (draft 7) the params must satisfy before `handle` runs.
    fn params_schema(&self) -> Option<Value> {
        None
    }

    /// Handlers that legitimately block (interrupt waits) opt out of the time limit.
    fn exempt_from_timeout(&self) -> bool {
        false
    }
}

/// Registration failure.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The handler's params schema does not compile.
    #[error("invalid params schema for {method}: {message}")]
    InvalidSchema {
        /// Method being registered.
        method: String,
        /// Compiler message.
        message: String,
    },
}

struct Registered {
    handler: Arc<dyn MethodHandler>,
    schema: Option<JSONSchema>,
    exempt: bool,
}

/// Registry mapping method names to handlers.
pub struct MethodRegistry {
    handlers: HashMap<String, Registered>,
    handler_timeout: Duration,
    slow_threshold: Duration,
}

impl MethodRegistry {
    /// Empty registry with default limits.
    pub fn new() -> Self {
        Self::with_settings(&RpcSettings::default())
    }

    /// Empty registry with configured limits.
    pub fn with_settings(settings: &RpcSettings) -> Self {
        Self {
            handlers: HashMap::new(),
            handler_timeout: Duration::from_millis(settings.handler_timeout_ms.max(1)),
            slow_threshold: Duration::from_millis(settings.slow_handler_warn_ms),
        }
    }

    /// Register a handler, compiling its params schema. Replaces any previous handler.
    pub fn register(
        &mut self,
        method: &str,
        handler: impl MethodHandler + 'static,
    ) -> Result<(), RegistryError> {
        let schema = handler
            .params_schema()
            .map(|schema| {
                JSONSchema::options()
                    .with_draft(Draft::Draft7)
                    .compile(&schema)
                    .map_err(|e| RegistryError::InvalidSchema {
                        method: method.to_owned(),
                        message: e.to_string(),
                    })
            })
            .transpose()?;
        let exempt = handler.exempt_from_timeout();
        let _ = self.handlers.insert(
            method.to_owned(),
            Registered {
                handler: Arc::new(handler),
                schema,
                exempt,
            },
        );
        Ok(())
    }

    /// Dispatch a request and return its response.
    pub async fn dispatch(&self, request: RpcRequest, ctx: &RpcContext) -> RpcResponse {
        let RpcRequest { id, method, params } = request;
        match self.run(&method, params, ctx).await {
            Ok(payload) => RpcResponse::success(id, payload),
            Err(shape) => RpcResponse::failure(id, shape),
        }
    }

    /// Dispatch a request and hand the outcome to `respond(ok, payload, error)`.
    pub async fn dispatch_with<F>(&self, request: RpcRequest, ctx: &RpcContext, respond: F)
    where
        F: FnOnce(bool, Option<Value>, Option<ErrorShape>),
    {
        let response = self.dispatch(request, ctx).await;
        respond(response.ok, response.payload, response.error);
    }

    /// All registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    async fn run(
        &self,
        method: &str,
        params: Option<Value>,
        ctx: &RpcContext,
    ) -> Result<Value, ErrorShape> {
        counter!("rpc_requests_total", "method" => method.to_owned()).increment(1);

        let Some(entry) = self.handlers.get(method) else {
            counter!("rpc_errors_total", "method" => method.to_owned(), "error_type" => "unknown_method").increment(1);
            debug!(method, "unknown method");
            return Err(ErrorShape::invalid_request(format!("unknown method: {method}")));
        };

        if let Some(schema) = &entry.schema {
            let empty = Value::Object(serde_json::Map::new());
            if let Err(shape) = validate_params(method, schema, params.as_ref().unwrap_or(&empty)) {
                counter!("rpc_errors_total", "method" => method.to_owned(), "error_type" => "invalid_params").increment(1);
                return Err(shape);
            }
        }

        let start = Instant::now();
        let call = AssertUnwindSafe(entry.handler.handle(params, ctx)).catch_unwind();
        let outcome = if entry.exempt {
            Ok(call.await)
        } else {
            tokio::time::timeout(self.handler_timeout, call).await
        };

        let result = match outcome {
            Ok(Ok(Ok(payload))) => Ok(payload),
            Ok(Ok(Err(err))) => {
                let shape = err.to_error_shape();
                counter!("rpc_errors_total", "method" => method.to_owned(), "error_type" => shape.code.as_str()).increment(1);
                if matches!(err, RpcError::Uncoded(_)) {
                    warn!(method, error = %err, "handler failed");
                }
                Err(shape)
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                counter!("rpc_errors_total", "method" => method.to_owned(), "error_type" => "panic").increment(1);
                error!(method, panic = %message, "handler panicked");
                Err(ErrorShape::unavailable(message))
            }
            Err(_elapsed) => {
                counter!("rpc_errors_total", "method" => method.to_owned(), "error_type" => "timeout").increment(1);
                error!(method, "handler timed out after {:?}", self.handler_timeout);
                Err(ErrorShape::unavailable(format!("{method} timed out")))
            }
        };

        let duration = start.elapsed();
        histogram!("rpc_request_duration_seconds", "method" => method.to_owned())
            .record(duration.as_secs_f64());
        if !entry.exempt && duration >= self.slow_threshold {
            warn!(method, duration_secs = duration.as_secs_f64(), "slow request");
        }
        result
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate `params`, producing `invalid <method> params: ...` on failure.
fn validate_params(method: &str, schema: &JSONSchema, params: &Value) -> Result<(), ErrorShape> {
    let Err(errors) = schema.validate(params) else {
        return Ok(());
    };
    let mut violations: Vec<String> = Vec::new();
    for err in errors {
        let path = err.instance_path.to_string();
        let line = if path.is_empty() {
            err.to_string()
        } else {
            format!("at {path}: {err}")
        };
        if !violations.contains(&line) {
            violations.push(line);
        }
    }
    let detail = if violations.is_empty() {
        "unknown validation error".to_owned()
    } else {
        violations.join("; ")
    };
    Err(ErrorShape::invalid_request(format!(
        "invalid {method} params: {detail}"
    )))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}
