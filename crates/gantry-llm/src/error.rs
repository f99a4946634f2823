//! Errors produced by model invocations.

use thiserror::Error;

/// What the classifier needs to know about a failed model call.
pub trait ClassifiableError {
    /// HTTP-like status, when the failure carried one.
    fn status(&self) -> Option<u16> {
        None
    }

    /// Provider or transport error code (e.g. `ETIMEDOUT`, `insufficient_quota`).
    fn code(&self) -> Option<&str> {
        None
    }

    /// Human-readable description, matched against known signatures.
    fn message(&self) -> String;
}

/// Failure reported by a provider call.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ModelCallError {
    /// Provider returned an error response.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error description.
        message: String,
        /// Provider-specific error code.
        code: Option<String>,
    },
    /// Transport-level failure without a status.
    #[error("transport error: {message}")]
    Transport {
        /// Error description.
        message: String,
        /// Transport error code.
        code: Option<String>,
    },
    /// Anything else.
    #[error("{message}")]
    Other {
        /// Error description.
        message: String,
    },
}

impl ModelCallError {
    /// API error with a status and message.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
            code: None,
        }
    }

    /// Unclassified error with a message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

impl ClassifiableError for ModelCallError {
    fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport { .. } | Self::Other { .. } => None,
        }
    }

    fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } | Self::Transport { code, .. } => code.as_deref(),
            Self::Other { .. } => None,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Api { message, .. }
            | Self::Transport { message, .. }
            | Self::Other { message } => message.clone(),
        }
    }
}

impl ClassifiableError for anyhow::Error {
    fn status(&self) -> Option<u16> {
        self.downcast_ref::<ModelCallError>()
            .and_then(ClassifiableError::status)
    }

    fn code(&self) -> Option<&str> {
        self.downcast_ref::<ModelCallError>()
            .and_then(ClassifiableError::code)
    }

    fn message(&self) -> String {
        format!("{self:#}")
    }
}
