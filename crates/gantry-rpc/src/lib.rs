//! # gantry-rpc
//!
//! Request router for the gateway.
//!
//! - **Registry**: method name to handler, with a draft-7 params schema per method
//! - **Dispatch**: schema check, panic capture, and a per-call time limit, all
//!   reported as coded error responses
//! - **Handlers**: tool interrupts, subagent spawning and audit, hierarchy, health
//!
//! Every call gets exactly one response, `{ok: true, payload}` or
//! `{ok: false, error: {code, message}}`.

#![deny(unsafe_code)]

pub mod context;
pub mod errors;
pub mod handlers;
pub mod registry;
pub mod types;

pub use context::RpcContext;
pub use errors::RpcError;
pub use handlers::register_all;
pub use registry::{MethodHandler, MethodRegistry, RegistryError};
pub use types::{RpcRequest, RpcResponse};
