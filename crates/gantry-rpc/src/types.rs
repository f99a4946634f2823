//! Request/response envelope.

use gantry_core::ErrorShape;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Caller-chosen id, echoed in the response.
    pub id: String,
    /// Method name (e.g. `tool.interrupt.emit`).
    pub method: String,
    /// Parameters object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Build a request.
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Outbound response: `{ok: true, payload}` or `{ok: false, error}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Echoed request id.
    pub id: String,
    /// Whether the call succeeded.
    pub ok: bool,
    /// Handler payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Coded error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorShape>,
}

impl RpcResponse {
    /// Success response.
    pub fn success(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Failure response.
    pub fn failure(id: impl Into<String>, error: ErrorShape) -> Self {
        Self {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::ErrorCode;
    use serde_json::json;

    #[test]
    fn success_omits_error() {
        let v = serde_json::to_value(RpcResponse::success("1", json!({"a": 1}))).unwrap();
        assert_eq!(v["ok"], true);
        assert!(v.get("error").is_none());
    }

    #[test]
    fn failure_carries_code() {
        let resp = RpcResponse::failure("2", ErrorShape::new(ErrorCode::Forbidden, "no"));
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["code"], "FORBIDDEN");
        assert!(v.get("payload").is_none());
    }

    #[test]
    fn request_params_optional() {
        let req: RpcRequest = serde_json::from_str(r#"{"id":"1","method":"system.ping"}"#).unwrap();
        assert!(req.params.is_none());
    }
}
