//! Handler error type.

use gantry_core::{ErrorCode, ErrorShape};
use gantry_runtime::{InterruptError, SpawnError};

/// Error returned by a method handler.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Malformed params or a request the handler refuses outright.
    #[error("{message}")]
    InvalidRequest {
        /// Description of what is wrong.
        message: String,
    },

    /// Referenced entity does not exist.
    #[error("{message}")]
    NotFound {
        /// Description.
        message: String,
    },

    /// Policy rejected the operation.
    #[error("{message}")]
    Forbidden {
        /// Description.
        message: String,
    },

    /// The handler could not complete.
    #[error("{message}")]
    Unavailable {
        /// Description.
        message: String,
    },

    /// An agent run exceeded its deadline.
    #[error("{message}")]
    AgentTimeout {
        /// Description.
        message: String,
    },

    /// A failure with no code of its own. Reported as `UNAVAILABLE`.
    #[error(transparent)]
    Uncoded(#[from] anyhow::Error),
}

impl RpcError {
    /// Build from a code and message.
    pub fn coded(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::InvalidRequest => Self::InvalidRequest { message },
            ErrorCode::NotFound => Self::NotFound { message },
            ErrorCode::Forbidden => Self::Forbidden { message },
            ErrorCode::Unavailable => Self::Unavailable { message },
            ErrorCode::AgentTimeout => Self::AgentTimeout { message },
        }
    }

    /// `INVALID_REQUEST` shorthand.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest { .. } => ErrorCode::InvalidRequest,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Forbidden { .. } => ErrorCode::Forbidden,
            Self::Unavailable { .. } | Self::Uncoded(_) => ErrorCode::Unavailable,
            Self::AgentTimeout { .. } => ErrorCode::AgentTimeout,
        }
    }

    /// Convert to the `{code, message}` body.
    pub fn to_error_shape(&self) -> ErrorShape {
        ErrorShape::new(self.code(), self.to_string())
    }
}

impl From<InterruptError> for RpcError {
    fn from(err: InterruptError) -> Self {
        Self::coded(err.code(), err.to_string())
    }
}

impl From<SpawnError> for RpcError {
    fn from(err: SpawnError) -> Self {
        Self::coded(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coded_round_trips_every_code() {
        for code in [
            ErrorCode::InvalidRequest,
            ErrorCode::NotFound,
            ErrorCode::Forbidden,
            ErrorCode::Unavailable,
            ErrorCode::AgentTimeout,
        ] {
            assert_eq!(RpcError::coded(code, "x").code(), code);
        }
    }

    #[test]
    fn uncoded_is_unavailable() {
        let err = RpcError::from(anyhow::anyhow!("disk on fire"));
        let shape = err.to_error_shape();
        assert_eq!(shape.code, ErrorCode::Unavailable);
        assert_eq!(shape.message, "disk on fire");
    }

    #[test]
    fn interrupt_errors_are_invalid_requests() {
        let err = RpcError::from(InterruptError::NoMatch);
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
        assert_eq!(err.to_string(), "no matching pending interrupt");
    }

    #[test]
    fn spawn_errors_keep_their_code() {
        let err = RpcError::from(SpawnError::Forbidden("nope".into()));
        assert_eq!(err.code(), ErrorCode::Forbidden);
    }
}
