//! `provider/model` references.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Provider used when a ref names only a model and nothing is configured.
pub const DEFAULT_PROVIDER: &str = "anthropic";
/// Model used when nothing is configured.
pub const DEFAULT_MODEL: &str = "claude-opus-4-6";
/// Fallbacks used when no fallback list is configured anywhere.
pub const DEFAULT_FALLBACK_CHAIN: &[&str] = &["anthropic/claude-sonnet-4-5", "openai/gpt-4.1-mini"];

/// A provider/model pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelRef {
    /// Provider id, lowercase.
    pub provider: String,
    /// Model id as the provider names it.
    pub model: String,
}

impl ModelRef {
    /// Build from parts.
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Parse `provider/model`, or a bare `model` under `default_provider`.
    ///
    /// Only the first `/` separates provider from model, so model ids may
    /// themselves contain slashes. Empty segments yield `None`.
    pub fn parse(raw: &str, default_provider: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let (provider, model) = match raw.split_once('/') {
            Some((p, m)) => (p.trim(), m.trim()),
            None => (default_provider.trim(), raw),
        };
        if provider.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self::new(provider.to_lowercase(), model))
    }

    /// Built-in primary.
    pub fn builtin_default() -> Self {
        Self::new(DEFAULT_PROVIDER, DEFAULT_MODEL)
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}
