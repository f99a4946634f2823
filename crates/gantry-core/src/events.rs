//! Best-effort event fan-out.
//!
//! Each subscriber owns a bounded queue. Publishing never waits on a
//! subscriber: when a subscriber's queue is full the event is dropped for that
//! subscriber only and its drop counter is incremented. Subscribers whose
//! receiver has gone away are pruned during the publish that finds them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{SecondsFormat, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Default per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// A named event delivered to subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEvent {
    /// Event name, e.g. `tool.interrupt.requested`.
    pub event: String,
    /// Monotonically increasing sequence number, unique per broadcaster.
    pub seq: u64,
    /// ISO 8601 timestamp of publication.
    pub timestamp: String,
    /// Event body.
    pub payload: Value,
}

struct Subscriber {
    tx: mpsc::Sender<Arc<GatewayEvent>>,
    dropped: AtomicU64,
}

/// Receiving half of a subscription.
pub struct Subscription {
    /// Subscriber id, usable with [`EventBroadcaster::unsubscribe`].
    pub id: u64,
    rx: mpsc::Receiver<Arc<GatewayEvent>>,
}

impl Subscription {
    /// Wait for the next event. `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<Arc<GatewayEvent>> {
        self.rx.recv().await
    }

    /// Take an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<GatewayEvent>> {
        self.rx.try_recv().ok()
    }
}

/// Fans events out to every subscriber without blocking the publisher.
pub struct EventBroadcaster {
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    seq: AtomicU64,
}

impl EventBroadcaster {
    /// Create an empty broadcaster.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            seq: AtomicU64::new(0),
        }
    }

    /// Register a subscriber with a queue of `capacity` events.
    pub fn subscribe(&self, capacity: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.subscribers.write().insert(
            id,
            Subscriber {
                tx,
                dropped: AtomicU64::new(0),
            },
        );
        Subscription { id, rx }
    }

    /// Remove a subscriber. Its receiver drains and then yields `None`.
    pub fn unsubscribe(&self, id: u64) {
        let _ = self.subscribers.write().remove(&id);
    }

    /// Publish `event` with `payload` to every subscriber. Returns the sequence number.
    ///
    /// Publishers are serialized on the subscriber lock, so every subscriber
    /// receives events in `seq` order.
    pub fn broadcast(&self, event: &str, payload: Value) -> u64 {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut subs = self.subscribers.write();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let message = Arc::new(GatewayEvent {
            event: event.to_owned(),
            seq,
            timestamp,
            payload,
        });

        debug!(event, seq, recipients = subs.len(), "broadcast event");
        subs.retain(|id, sub| match sub.tx.try_send(Arc::clone(&message)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let _ = sub.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("broadcast_drops_total", "event" => event.to_owned())
                    .increment(1);
                warn!(subscriber = id, event, "subscriber queue full, dropping event");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        seq
    }

    /// Events dropped for a subscriber because its queue was full.
    pub fn drop_count(&self, id: u64) -> u64 {
        self.subscribers
            .read()
            .get(&id)
            .map_or(0, |s| s.dropped.load(Ordering::Relaxed))
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Last sequence number issued.
    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
