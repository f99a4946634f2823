//! Handler modules and registration.

pub mod health;
pub mod hierarchy;
pub mod interrupt;
pub mod subagent;
pub mod system;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::RpcError;
use crate::registry::{MethodRegistry, RegistryError};

/// Register every gateway handler.
pub fn register_all(registry: &mut MethodRegistry) -> Result<(), RegistryError> {
    // System
    registry.register("system.ping", system::PingHandler)?;

    // Tool interrupts
    registry.register("tool.interrupt.emit", interrupt::EmitHandler)?;
    registry.register("tool.interrupt.resume", interrupt::ResumeHandler)?;
    registry.register("tool.interrupt.list", interrupt::ListHandler)?;

    // Subagents
    registry.register("subagent.spawn", subagent::SpawnHandler)?;
    registry.register("subagent.complete", subagent::CompleteHandler)?;
    registry.register("subagent.history", subagent::HistoryHandler)?;
    registry.register("subagent.rate", subagent::RateHandler)?;
    registry.register("subagent.summary", subagent::SummaryHandler)?;

    // Hierarchy
    registry.register("hierarchy.snapshot", hierarchy::SnapshotHandler)?;

    // Health
    registry.register("health.report", health::ReportHandler)?;
    registry.register("health.setDegradation", health::SetDegradationHandler)?;

    // Registered last so it sees everything, itself included.
    let mut methods = registry.methods();
    methods.push("system.methods".to_owned());
    methods.sort();
    registry.register("system.methods", system::MethodsHandler::new(methods))
}

/// Deserialize params (absent params read as `{}`).
pub(crate) fn parse_params<T: DeserializeOwned>(
    method: &str,
    params: Option<Value>,
) -> Result<T, RpcError> {
    let value = params.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    serde_json::from_value(value)
        .map_err(|e| RpcError::invalid(format!("invalid {method} params: {e}")))
}

/// Serialize a handler payload.
pub(crate) fn to_payload<T: serde::Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::Uncoded(e.into()))
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use std::sync::Arc;

    use gantry_core::{ManualClock, SharedClock};
    use gantry_runtime::{GatewayServices, InMemorySessionStore, SessionStore};
    use gantry_settings::GatewaySettings;

    use crate::context::RpcContext;

    /// Context over default settings and a manual clock at t=0.
    pub fn make_test_context() -> RpcContext {
        make_test_context_with(GatewaySettings::default()).0
    }

    /// Context over `settings`, returning the clock for time travel.
    pub fn make_test_context_with(settings: GatewaySettings) -> (RpcContext, Arc<ManualClock>) {
        let manual = ManualClock::new(0);
        let clock: SharedClock = manual.clone();
        let sessions: Arc<dyn SessionStore> =
            Arc::new(InMemorySessionStore::new(Arc::clone(&clock)));
        let services = GatewayServices::with_parts(settings, clock, sessions);
        (RpcContext::new(Arc::new(services)), manual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn register_all_populates_registry() {
        let mut reg = MethodRegistry::new();
        register_all(&mut reg).unwrap();
        for method in [
            "system.ping",
            "system.methods",
            "tool.interrupt.emit",
            "tool.interrupt.resume",
            "tool.interrupt.list",
            "subagent.spawn",
            "subagent.complete",
            "subagent.history",
            "subagent.rate",
            "subagent.summary",
            "hierarchy.snapshot",
            "health.report",
            "health.setDegradation",
        ] {
            assert!(reg.has_method(method), "{method}");
        }
        assert_eq!(reg.methods().len(), 13);
    }

    #[derive(Debug, Deserialize)]
    struct Demo {
        #[serde(default)]
        name: Option<String>,
    }

    #[test]
    fn parse_params_treats_absent_as_empty() {
        let demo: Demo = parse_params("demo", None).unwrap();
        assert!(demo.name.is_none());
    }

    #[test]
    fn parse_params_reports_method() {
        let err = parse_params::<Demo>("demo", Some(json!({"name": 3}))).unwrap_err();
        assert!(err.to_string().starts_with("invalid demo params: "));
    }
}
