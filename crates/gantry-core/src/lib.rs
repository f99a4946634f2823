//! # gantry-core
//!
//! Foundation types shared by every Gantry crate.
//!
//! - **Error codes**: the fixed [`ErrorCode`] enumeration and the `{code, message}` [`ErrorShape`]
//! - **Session keys**: parsing and idempotent qualification of `agent:<id>:<rest>` keys
//! - **Branded IDs**: `RunId` and `InterruptId` newtypes
//! - **Clock**: injectable time source so windowed logic is testable
//! - **Events**: best-effort [`EventBroadcaster`] with per-subscriber bounded queues
//! - **Logging**: `tracing` subscriber setup and an in-memory capture layer for tests

#![deny(unsafe_code)]

pub mod clock;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod session_key;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use errors::{ErrorCode, ErrorShape};
pub use events::{EventBroadcaster, GatewayEvent, Subscription};
pub use ids::{InterruptId, RunId};
