//! Handler dependency-injection context.

use std::sync::Arc;
use std::time::Instant;

use gantry_runtime::GatewayServices;

/// Shared context passed to every handler.
#[derive(Clone)]
pub struct RpcContext {
    /// Gateway services.
    pub services: Arc<GatewayServices>,
    /// When the router started.
    pub started_at: Instant,
}

impl RpcContext {
    /// Wrap a service bundle.
    pub fn new(services: Arc<GatewayServices>) -> Self {
        Self {
            services,
            started_at: Instant::now(),
        }
    }
}
