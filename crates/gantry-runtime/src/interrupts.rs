//! Tool interrupts.
//!
//! A tool call that needs an external decision is parked with [`ToolInterruptManager::emit`].
//! The caller gets a descriptor (including the single-use resume token) and an
//! [`InterruptWait`] that settles exactly once: `resumed` when a matching
//! [`ToolInterruptManager::resume`] arrives, or `expired` when the timeout fires
//! first. Both paths remove the pending record under the same lock, so the
//! first one to get there wins and the other finds nothing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use gantry_core::{ErrorCode, EventBroadcaster, InterruptId, SharedClock};
use gantry_settings::InterruptSettings;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Event published when an interrupt is parked.
pub const EVENT_REQUESTED: &str = "tool.interrupt.requested";
/// Event published when an interrupt is resumed.
pub const EVENT_RESUMED: &str = "tool.interrupt.resumed";
/// Event published when an interrupt times out.
pub const EVENT_EXPIRED: &str = "tool.interrupt.expired";

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Correlation tuple identifying one parked tool call.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterruptKey {
    /// Approval request the decision belongs to.
    pub approval_request_id: String,
    /// Run that issued the tool call.
    pub run_id: String,
    /// Session the run belongs to.
    pub session_key: String,
    /// Tool call being held.
    pub tool_call_id: String,
}

impl InterruptKey {
    fn validate(&self) -> Result<(), InterruptError> {
        for (name, value) in [
            ("approvalRequestId", &self.approval_request_id),
            ("runId", &self.run_id),
            ("sessionKey", &self.session_key),
            ("toolCallId", &self.tool_call_id),
        ] {
            if value.trim().is_empty() {
                return Err(InterruptError::Invalid(format!("{name} is required")));
            }
        }
        Ok(())
    }
}

/// Lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptStatus {
    /// Waiting for a decision.
    Requested,
    /// Resumed by a matching decision.
    Resumed,
    /// Timed out.
    Expired,
}

/// Descriptor returned by [`ToolInterruptManager::emit`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterruptRequested {
    /// Always [`InterruptStatus::Requested`].
    pub status: InterruptStatus,
    /// Correlation tuple.
    #[serde(flatten)]
    pub key: InterruptKey,
    /// Internal id of this parking.
    pub interrupt_id: InterruptId,
    /// Single-use token a resume must present.
    pub resume_token: String,
    /// When the interrupt was parked.
    pub created_at_ms: i64,
    /// When it will expire.
    pub expires_at_ms: i64,
    /// Payload describing what needs deciding.
    pub interrupt: Value,
}

/// Pending interrupt as listed for observers. Carries no token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingInterrupt {
    /// Correlation tuple.
    #[serde(flatten)]
    pub key: InterruptKey,
    /// Internal id of this parking.
    pub interrupt_id: InterruptId,
    /// When the interrupt was parked.
    pub created_at_ms: i64,
    /// When it will expire.
    pub expires_at_ms: i64,
    /// Payload describing what needs deciding.
    pub interrupt: Value,
}

/// Terminal outcome of a parked interrupt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum InterruptSettlement {
    /// A matching resume arrived in time.
    Resumed(ResumedInterrupt),
    /// The timeout fired first.
    Expired(ExpiredInterrupt),
}

impl InterruptSettlement {
    /// Correlation tuple of the settled interrupt.
    pub fn key(&self) -> &InterruptKey {
        match self {
            Self::Resumed(r) => &r.key,
            Self::Expired(e) => &e.key,
        }
    }

    /// Status of the settlement.
    pub fn status(&self) -> InterruptStatus {
        match self {
            Self::Resumed(_) => InterruptStatus::Resumed,
            Self::Expired(_) => InterruptStatus::Expired,
        }
    }
}

/// Payload of a resumed interrupt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumedInterrupt {
    /// Correlation tuple.
    #[serde(flatten)]
    pub key: InterruptKey,
    /// When the resume was accepted.
    pub resumed_at_ms: i64,
    /// Who resumed it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumed_by: Option<String>,
    /// Decision payload handed back to the tool call.
    pub result: Value,
}

/// Payload of an expired interrupt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiredInterrupt {
    /// Correlation tuple.
    #[serde(flatten)]
    pub key: InterruptKey,
    /// When it expired.
    pub expired_at_ms: i64,
}

/// Interrupt failures.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum InterruptError {
    /// The tuple is already parked.
    #[error("interrupt already pending for tool call {0}")]
    AlreadyPending(String),
    /// No pending record matches the tuple and token.
    #[error("no matching pending interrupt")]
    NoMatch,
    /// Malformed emit or resume.
    #[error("invalid interrupt: {0}")]
    Invalid(String),
}

impl InterruptError {
    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        ErrorCode::InvalidRequest
    }
}

/// Resolves once the interrupt settles.
pub struct InterruptWait {
    key: InterruptKey,
    rx: oneshot::Receiver<InterruptSettlement>,
    clock: SharedClock,
}

impl std::fmt::Debug for InterruptWait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptWait")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl InterruptWait {
    /// Correlation tuple being waited on.
    pub fn key(&self) -> &InterruptKey {
        &self.key
    }

    /// Wait for settlement.
    ///
    /// If the manager is dropped without settling, the wait reports `expired`.
    pub async fn wait(self) -> InterruptSettlement {
        match self.rx.await {
            Ok(settlement) => settlement,
            Err(_) => InterruptSettlement::Expired(ExpiredInterrupt {
                key: self.key,
                expired_at_ms: self.clock.now_ms(),
            }),
        }
    }
}

struct PendingEntry {
    interrupt_id: InterruptId,
    resume_token: String,
    created_at_ms: i64,
    expires_at_ms: i64,
    interrupt: Value,
    tx: oneshot::Sender<InterruptSettlement>,
    timer: Option<AbortHandle>,
}

type PendingMap = Arc<Mutex<HashMap<InterruptKey, PendingEntry>>>;

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Parks tool calls awaiting an external decision.
pub struct ToolInterruptManager {
    pending: PendingMap,
    broadcaster: Arc<EventBroadcaster>,
    clock: SharedClock,
    settings: InterruptSettings,
}

impl ToolInterruptManager {
    /// Create a manager with no pending interrupts.
    pub fn new(
        settings: InterruptSettings,
        broadcaster: Arc<EventBroadcaster>,
        clock: SharedClock,
    ) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            broadcaster,
            clock,
            settings,
        }
    }

    /// Park a tool call.
    ///
    /// `timeout_ms` defaults to the configured timeout and is clamped to
    /// `[1, max]`. Must be called from within a tokio runtime.
    pub fn emit(
        &self,
        key: InterruptKey,
        interrupt: Value,
        timeout_ms: Option<u64>,
    ) -> Result<(InterruptRequested, InterruptWait), InterruptError> {
        key.validate()?;
        let timeout_ms = timeout_ms
            .unwrap_or(self.settings.default_timeout_ms)
            .clamp(1, self.settings.max_timeout_ms.max(1));
        let created_at_ms = self.clock.now_ms();
        let expires_at_ms =
            created_at_ms.saturating_add(i64::try_from(timeout_ms).unwrap_or(i64::MAX));
        let interrupt_id = InterruptId::new();
        let resume_token = new_resume_token();
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&key) {
                return Err(InterruptError::AlreadyPending(key.tool_call_id.clone()));
            }
            let _ = pending.insert(
                key.clone(),
                PendingEntry {
                    interrupt_id: interrupt_id.clone(),
                    resume_token: resume_token.clone(),
                    created_at_ms,
                    expires_at_ms,
                    interrupt: interrupt.clone(),
                    tx,
                    timer: None,
                },
            );
        }

        let timer = tokio::spawn(expire_after(
            Arc::clone(&self.pending),
            Arc::clone(&self.broadcaster),
            Arc::clone(&self.clock),
            key.clone(),
            interrupt_id.clone(),
            Duration::from_millis(timeout_ms),
        ));
        if let Some(entry) = self.pending.lock().get_mut(&key) {
            entry.timer = Some(timer.abort_handle());
        }

        let requested = InterruptRequested {
            status: InterruptStatus::Requested,
            key: key.clone(),
            interrupt_id,
            resume_token,
            created_at_ms,
            expires_at_ms,
            interrupt,
        };
        info!(
            run_id = %key.run_id,
            tool_call_id = %key.tool_call_id,
            approval_request_id = %key.approval_request_id,
            timeout_ms,
            "tool interrupt requested"
        );
        metrics::counter!("tool_interrupts_total", "outcome" => "requested").increment(1);
        let _ = self.broadcaster.broadcast(
            EVENT_REQUESTED,
            serde_json::to_value(&requested).unwrap_or_default(),
        );

        let wait = InterruptWait {
            key,
            rx,
            clock: Arc::clone(&self.clock),
        };
        Ok((requested, wait))
    }

    /// Resume a parked tool call.
    ///
    /// Succeeds only when a pending record matches the full tuple and the
    /// token. Every other case is [`InterruptError::NoMatch`].
    pub fn resume(
        &self,
        key: &InterruptKey,
        resume_token: &str,
        result: Value,
        resumed_by: Option<String>,
    ) -> Result<ResumedInterrupt, InterruptError> {
        let entry = {
            let mut pending = self.pending.lock();
            match pending.get(key) {
                Some(entry) if tokens_match(&entry.resume_token, resume_token) => {}
                _ => {
                    debug!(tool_call_id = %key.tool_call_id, "resume rejected");
                    return Err(InterruptError::NoMatch);
                }
            }
            pending.remove(key).ok_or(InterruptError::NoMatch)?
        };
        if let Some(timer) = &entry.timer {
            timer.abort();
        }

        let resumed = ResumedInterrupt {
            key: key.clone(),
            resumed_at_ms: self.clock.now_ms(),
            resumed_by,
            result,
        };
        let settlement = InterruptSettlement::Resumed(resumed.clone());
        let _ = self.broadcaster.broadcast(
            EVENT_RESUMED,
            serde_json::to_value(&settlement).unwrap_or_default(),
        );
        if entry.tx.send(settlement).is_err() {
            debug!(tool_call_id = %key.tool_call_id, "resumed interrupt had no waiter");
        }
        info!(
            run_id = %key.run_id,
            tool_call_id = %key.tool_call_id,
            interrupt_id = %entry.interrupt_id,
            "tool interrupt resumed"
        );
        metrics::counter!("tool_interrupts_total", "outcome" => "resumed").increment(1);
        Ok(resumed)
    }

    /// Pending interrupts, oldest first.
    pub fn list_pending(&self) -> Vec<PendingInterrupt> {
        let mut list: Vec<PendingInterrupt> = self
            .pending
            .lock()
            .iter()
            .map(|(key, entry)| PendingInterrupt {
                key: key.clone(),
                interrupt_id: entry.interrupt_id.clone(),
                created_at_ms: entry.created_at_ms,
                expires_at_ms: entry.expires_at_ms,
                interrupt: entry.interrupt.clone(),
            })
            .collect();
        list.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.interrupt_id.cmp(&b.interrupt_id))
        });
        list
    }

    /// Number of pending interrupts.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drop every pending interrupt. Outstanding waits settle `expired`.
    pub fn reset_for_tests(&self) {
        let drained: Vec<(InterruptKey, PendingEntry)> = self.pending.lock().drain().collect();
        let now = self.clock.now_ms();
        for (key, entry) in drained {
            if let Some(timer) = &entry.timer {
                timer.abort();
            }
            let _ = entry.tx.send(InterruptSettlement::Expired(ExpiredInterrupt {
                key,
                expired_at_ms: now,
            }));
        }
    }
}

async fn expire_after(
    pending: PendingMap,
    broadcaster: Arc<EventBroadcaster>,
    clock: SharedClock,
    key: InterruptKey,
    interrupt_id: InterruptId,
    after: Duration,
) {
    tokio::time::sleep(after).await;
    let entry = {
        let mut map = pending.lock();
        match map.get(&key) {
            Some(entry) if entry.interrupt_id == interrupt_id => map.remove(&key),
            _ => None,
        }
    };
    let Some(entry) = entry else {
        return;
    };
    let settlement = InterruptSettlement::Expired(ExpiredInterrupt {
        key: key.clone(),
        expired_at_ms: clock.now_ms(),
    });
    let _ = broadcaster.broadcast(
        EVENT_EXPIRED,
        serde_json::to_value(&settlement).unwrap_or_default(),
    );
    let _ = entry.tx.send(settlement);
    warn!(
        run_id = %key.run_id,
        tool_call_id = %key.tool_call_id,
        interrupt_id = %interrupt_id,
        "tool interrupt expired"
    );
    metrics::counter!("tool_interrupts_total", "outcome" => "expired").increment(1);
}

fn new_resume_token() -> String {
    let bytes: [u8; 32] = rand::random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Length-independent comparison that doesn't short-circuit on the first differing byte.
fn tokens_match(expected: &str, presented: &str) -> bool {
    let a = expected.as_bytes();
    let b = presented.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
