//! Gateway error codes.
//!
//! Every failure that reaches a caller is reduced to `{code, message}` where
//! `code` comes from the small fixed [`ErrorCode`] set. Transports serialize
//! the code as its `SCREAMING_SNAKE` string.

use serde::{Deserialize, Serialize};
use std::fmt;

// ─────────────────────────────────────────────────────────────────────────────
// Error codes
// ─────────────────────────────────────────────────────────────────────────────

/// Machine-readable error code attached to every failed response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed request, unknown method, or schema violation. Never retried.
    #[serde(rename = "INVALID_REQUEST")]
    InvalidRequest,
    /// Handler failure, panic, or timeout.
    #[serde(rename = "UNAVAILABLE")]
    Unavailable,
    /// Referenced entity does not exist.
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    /// Policy rejected the operation.
    #[serde(rename = "FORBIDDEN")]
    Forbidden,
    /// An agent run exceeded its deadline.
    #[serde(rename = "AGENT_TIMEOUT")]
    AgentTimeout,
}

impl ErrorCode {
    /// Wire representation of the code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Unavailable => "UNAVAILABLE",
            Self::NotFound => "NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::AgentTimeout => "AGENT_TIMEOUT",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error shape
// ─────────────────────────────────────────────────────────────────────────────

/// The `{code, message}` body carried by every failed response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorShape {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ErrorShape {
    /// Create a new error body.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// `INVALID_REQUEST` with the given message.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// `UNAVAILABLE` with the given message.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }
}

impl fmt::Display for ErrorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorShape {}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn codes_serialize_screaming() {
        assert_eq!(
            serde_json::to_value(ErrorCode::InvalidRequest).unwrap(),
            json!("INVALID_REQUEST")
        );
        assert_eq!(
            serde_json::to_value(ErrorCode::AgentTimeout).unwrap(),
            json!("AGENT_TIMEOUT")
        );
    }

    #[test]
    fn display_matches_serde() {
        for code in [
            ErrorCode::InvalidRequest,
            ErrorCode::Unavailable,
            ErrorCode::NotFound,
            ErrorCode::Forbidden,
            ErrorCode::AgentTimeout,
        ] {
            let wire = serde_json::to_value(code).unwrap();
            assert_eq!(wire, json!(code.to_string()));
        }
    }

    #[test]
    fn shape_wire_format() {
        let shape = ErrorShape::unavailable("boom");
        let v = serde_json::to_value(&shape).unwrap();
        assert_eq!(v, json!({"code": "UNAVAILABLE", "message": "boom"}));
    }

    #[test]
    fn shape_display() {
        let shape = ErrorShape::invalid_request("unknown method: x");
        assert_eq!(shape.to_string(), "[INVALID_REQUEST] unknown method: x");
    }

    #[test]
    fn shape_roundtrip_from_wire() {
        let shape: ErrorShape =
            serde_json::from_value(json!({"code": "FORBIDDEN", "message": "no"})).unwrap();
        assert_eq!(shape.code, ErrorCode::Forbidden);
    }
}
