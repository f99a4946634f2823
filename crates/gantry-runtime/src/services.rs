//! Service bundle shared by every request handler.

use std::sync::Arc;
use std::time::Duration;

use gantry_core::{EventBroadcaster, SharedClock, Subscription, SystemClock};
use gantry_llm::ModelFallbackResolver;
use gantry_resilience::{AlertKind, ResilienceMonitor};
use gantry_settings::GatewaySettings;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::hierarchy::HierarchyBuilder;
use crate::interrupts::ToolInterruptManager;
use crate::session_store::{InMemorySessionStore, SessionStore};
use crate::spawn::SubagentSpawner;
use crate::spawn_audit::{SpawnAlertCallback, SpawnAudit};

/// Event carrying each periodic failure report.
pub const EVENT_HEALTH_REPORT: &str = "health.report";

/// Every stateful service, constructed once and injected.
pub struct GatewayServices {
    /// Settings the services were built from.
    pub settings: Arc<GatewaySettings>,
    /// Time source.
    pub clock: SharedClock,
    /// Event fan-out to subscribers.
    pub broadcaster: Arc<EventBroadcaster>,
    /// Parked tool calls.
    pub interrupts: Arc<ToolInterruptManager>,
    /// Spawn log and rate alerts.
    pub spawn_audit: Arc<SpawnAudit>,
    /// Agent hierarchy snapshots.
    pub hierarchy: Arc<HierarchyBuilder>,
    /// Session metadata.
    pub sessions: Arc<dyn SessionStore>,
    /// Subagent spawn gate.
    pub spawner: Arc<SubagentSpawner>,
    /// Breakers, budget, degradation, and reports.
    pub resilience: Arc<ResilienceMonitor>,
    /// Model fallback chain walker, wired to `resilience`.
    pub fallback: Arc<ModelFallbackResolver>,
}

impl GatewayServices {
    /// Build with the system clock and an in-memory session store.
    pub fn new(settings: GatewaySettings) -> Self {
        let clock = SystemClock::shared();
        let sessions: Arc<dyn SessionStore> =
            Arc::new(InMemorySessionStore::new(Arc::clone(&clock)));
        Self::with_parts(settings, clock, sessions)
    }

    /// Build with an explicit clock and session store.
    pub fn with_parts(
        settings: GatewaySettings,
        clock: SharedClock,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let settings = Arc::new(settings);
        let agents = Arc::new(settings.agents.clone());
        let broadcaster = Arc::new(EventBroadcaster::new());
        let interrupts = Arc::new(ToolInterruptManager::new(
            settings.interrupts.clone(),
            Arc::clone(&broadcaster),
            Arc::clone(&clock),
        ));
        let spawn_audit = Arc::new(SpawnAudit::new(&settings.spawn_audit, Arc::clone(&clock)));
        let hierarchy = Arc::new(HierarchyBuilder::new(
            Arc::clone(&agents),
            settings.hierarchy.clone(),
            Arc::clone(&clock),
        ));
        let spawner = Arc::new(SubagentSpawner::new(
            agents,
            Arc::clone(&sessions),
            Arc::clone(&spawn_audit),
            Arc::clone(&hierarchy),
            Arc::clone(&broadcaster),
            Arc::clone(&clock),
        ));
        let resilience = Arc::new(ResilienceMonitor::new(
            settings.resilience.clone(),
            Arc::clone(&clock),
        ));
        let fallback = Arc::new(ModelFallbackResolver::new().with_monitor(Arc::clone(&resilience)));

        let services = Self {
            settings,
            clock,
            broadcaster,
            interrupts,
            spawn_audit,
            hierarchy,
            sessions,
            spawner,
            resilience,
            fallback,
        };
        services.install_spawn_alert();
        services
    }

    /// Start the periodic failure report. Each report is broadcast as `health.report`.
    pub fn start_background(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let interval = Duration::from_millis(self.settings.resilience.report.interval_ms.max(1));
        let broadcaster = Arc::clone(&self.broadcaster);
        Arc::clone(&self.resilience).spawn_periodic_report(interval, cancel, move |report| {
            let _ = broadcaster.broadcast(
                EVENT_HEALTH_REPORT,
                serde_json::to_value(report).unwrap_or_default(),
            );
        })
    }

    /// Subscribe to gateway events with the configured queue depth.
    pub fn subscribe(&self) -> Subscription {
        self.broadcaster
            .subscribe(self.settings.rpc.subscriber_capacity.max(1))
    }

    /// Return every service to its initial state.
    pub fn reset_for_tests(&self) {
        self.interrupts.reset_for_tests();
        self.spawn_audit.reset_for_tests();
        self.hierarchy.reset_for_tests();
        self.spawner.reset_for_tests();
        self.resilience.reset_for_tests();
        self.install_spawn_alert();
    }

    fn install_spawn_alert(&self) {
        let resilience = Arc::clone(&self.resilience);
        let callback: SpawnAlertCallback = Arc::new(move |message: &str, _agent_id: &str| {
            resilience.alerts().raise(AlertKind::SpawnRate, message);
        });
        let audit = &self.settings.spawn_audit;
        self.spawn_audit
            .configure_spawn_rate_alert(audit.alert_threshold, audit.alert_cadence, Some(callback));
    }
}
