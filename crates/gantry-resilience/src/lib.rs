//! # gantry-resilience
//!
//! Contracts that decide when to stop trying:
//!
//! - **Circuit breakers** per scope (`global`, `taxonomy:<class>`, `provider:<name>`)
//! - **Retry budget**: bounded retries per scope per window, exhaustion reported as a fact
//! - **Degradation level**: externally assigned, feeds the health score
//! - **Failure report**: windowed summaries, a health score, and recommendations
//!
//! Findings here are advisory. Nothing in this crate raises an error into a
//! caller's hot path except [`CircuitOpen`] and [`BudgetExhausted`], which
//! callers consult before attempting work.

#![deny(unsafe_code)]

pub mod budget;
pub mod circuit;
pub mod degradation;
pub mod ledger;
pub mod monitor;
pub mod report;

pub use budget::{BudgetExhausted, RetryBudget, RetrySummary};
pub use circuit::{
    CircuitBreaker, CircuitBreakerRegistry, CircuitOpen, CircuitScope, CircuitState, CircuitStatus,
};
pub use degradation::{DegradationLevel, DegradationState};
pub use ledger::{
    Alert, AlertKind, AlertLog, CostSummary, DeadLetter, DeadLetterQueue, DeadLetterSummary,
    ErrorSummary, OutcomeLedger,
};
pub use monitor::ResilienceMonitor;
pub use report::{FailureReport, FailureReportBuilder, HEALTHY_RECOMMENDATION, health_score};
