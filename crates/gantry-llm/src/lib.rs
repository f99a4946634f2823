//! # gantry-llm
//!
//! Decides what happens after a model call fails.
//!
//! - [`FailureClassifier`] maps an error to a closed [`FailureClass`] set
//! - [`resolve_fallback_candidates`] builds the ordered provider/model chain
//! - [`ModelFallbackResolver`] walks the chain strictly in sequence, consulting
//!   circuit breakers and the retry budget when a resilience monitor is attached

#![deny(unsafe_code)]

pub mod classify;
pub mod error;
pub mod fallback;
pub mod model_ref;

pub use classify::{FailureClass, FailureClassifier};
pub use error::{ClassifiableError, ModelCallError};
pub use fallback::{
    FallbackAttempt, FallbackError, FallbackOutcome, FallbackRequest, Metered,
    ModelFallbackResolver, resolve_fallback_candidates, run_with_model_fallback,
};
pub use model_ref::{DEFAULT_FALLBACK_CHAIN, DEFAULT_MODEL, DEFAULT_PROVIDER, ModelRef};
