//! Failure classification.
//!
//! Status codes are checked first, then error codes, then message signatures.
//! Rules are checked in order and the first match wins. Anything unmatched is
//! [`FailureClass::NonRetryable`].

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ClassifiableError;

/// Closed set of failure classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Credentials rejected or expired.
    TransientAuth,
    /// Account out of credit.
    TransientBilling,
    /// Throttled by the provider.
    TransientRateLimit,
    /// Call did not complete in time.
    TransientTimeout,
    /// Anything else. Never retried.
    NonRetryable,
}

impl FailureClass {
    /// Whether a different candidate should be tried.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::NonRetryable)
    }

    /// Short label used for metrics and circuit scopes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransientAuth => "auth",
            Self::TransientBilling => "billing",
            Self::TransientRateLimit => "rate_limit",
            Self::TransientTimeout => "timeout",
            Self::NonRetryable => "non_retryable",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
struct MessageRule {
    pattern: Regex,
    class: FailureClass,
}

static BUILTIN_RULES: LazyLock<Vec<MessageRule>> = LazyLock::new(|| {
    let builtin: &[(&str, FailureClass)] = &[
        (
            r"(?i)credit balance is too low|insufficient (credits|balance|funds|quota)|payment required|billing|exceeded your current quota",
            FailureClass::TransientBilling,
        ),
        (
            r"(?i)rate[ _-]?limit|too many requests|\btpm\b|\brpm\b|tokens per minute|resource[ _]exhausted|overloaded",
            FailureClass::TransientRateLimit,
        ),
        (
            r"(?i)timed? ?out|timeout|etimedout|esockettimedout|deadline exceeded",
            FailureClass::TransientTimeout,
        ),
        (
            r"(?i)invalid (x-)?api[ _-]?key|incorrect api key|unauthorized|authentication[ _]error|token (has )?expired",
            FailureClass::TransientAuth,
        ),
    ];
    builtin
        .iter()
        .map(|(pattern, class)| MessageRule {
            pattern: Regex::new(pattern).unwrap(),
            class: *class,
        })
        .collect()
});

/// Maps failures to a [`FailureClass`].
#[derive(Clone)]
pub struct FailureClassifier {
    rules: Vec<MessageRule>,
}

impl FailureClassifier {
    /// Classifier with the built-in signatures.
    pub fn new() -> Self {
        Self {
            rules: BUILTIN_RULES.clone(),
        }
    }

    /// Add a message signature checked after the built-in ones.
    pub fn with_rule(mut self, pattern: &str, class: FailureClass) -> Result<Self, regex::Error> {
        self.rules.push(MessageRule {
            pattern: Regex::new(pattern)?,
            class,
        });
        Ok(self)
    }

    /// Classify a failure.
    pub fn classify<E: ClassifiableError + ?Sized>(&self, err: &E) -> FailureClass {
        if let Some(class) = err.status().and_then(class_for_status) {
            return class;
        }
        if let Some(class) = err.code().and_then(|c| self.match_text(c)) {
            return class;
        }
        self.match_text(&err.message())
            .unwrap_or(FailureClass::NonRetryable)
    }

    fn match_text(&self, text: &str) -> Option<FailureClass> {
        self.rules
            .iter()
            .find(|r| r.pattern.is_match(text))
            .map(|r| r.class)
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn class_for_status(status: u16) -> Option<FailureClass> {
    match status {
        401 | 403 => Some(FailureClass::TransientAuth),
        402 => Some(FailureClass::TransientBilling),
        408 => Some(FailureClass::TransientTimeout),
        429 => Some(FailureClass::TransientRateLimit),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
