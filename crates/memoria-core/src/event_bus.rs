//! In-process publish/subscribe for observation-created / session-ended
//! signals (spec.md §2 row 2, §9). A single-writer, many-reader
//! broadcaster with bounded per-subscriber buffers, grounded in this
//! codebase's own prior `broadcast::channel` wiring and event-shape
//! conventions — generalized to this spec's events and moved into the
//! core crate since emission now happens at commit time inside the
//! store/queue, not at a dashboard layer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Default bound on the broadcast channel.
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum MemoryEvent {
    ObservationCreated { id: String, session_id: String, timestamp: DateTime<Utc> },
    ObservationSuperseded { old_id: String, new_id: String, timestamp: DateTime<Utc> },
    ObservationTombstoned { id: String, timestamp: DateTime<Utc> },
    SessionEnded { session_id: String, timestamp: DateTime<Utc> },
    SummaryCreated { session_id: String, summary_id: String, timestamp: DateTime<Utc> },
    PendingJobFailed { id: i64, reason: String, timestamp: DateTime<Utc> },
}

/// Wraps a `tokio::sync::broadcast::Sender` so the write path never has to
/// match on the send result. Dropped/lagged receivers are the *receiver's*
/// problem (spec.md §9: "never awaited by the write path"); a lagging
/// subscriber sees [`broadcast::error::RecvError::Lagged`] and the
/// `dropped` counter below is incremented so an operator can observe it,
/// but the writer itself never blocks or errors on a full channel — the
/// channel is a ring buffer, not a bounded mpsc.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MemoryEvent>,
    dropped: std::sync::Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx, dropped: std::sync::Arc::new(AtomicU64::new(0)) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MemoryEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget emission. Per spec.md §7, "any error in event-bus
    /// emission is swallowed" — a send with zero subscribers is not an
    /// error condition either way, it's just a no-op.
    pub fn emit(&self, event: MemoryEvent) {
        if self.tx.send(event).is_err() {
            // No subscribers currently attached; nothing to swallow loudly.
        }
    }

    /// Number of subscribers that have fallen behind and had messages
    /// dropped, observed the next time they poll. Exposed for operational
    /// endpoints (spec.md §7's "operational endpoints expose counts").
    pub fn record_lag(&self, skipped: u64) {
        self.dropped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(MemoryEvent::ObservationCreated {
            id: "o1".into(),
            session_id: "s1".into(),
            timestamp: Utc::now(),
        });
        let event = rx.recv().await.unwrap();
        matches!(event, MemoryEvent::ObservationCreated { .. });
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.emit(MemoryEvent::SessionEnded { session_id: "s1".into(), timestamp: Utc::now() });
    }

    #[tokio::test]
    async fn lagging_subscriber_reports_lag_without_blocking_writer() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.emit(MemoryEvent::ObservationTombstoned { id: format!("o{i}"), timestamp: Utc::now() });
        }
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                bus.record_lag(skipped);
                assert!(bus.dropped_total() > 0);
            }
            other => panic!("expected Lagged, got {other:?}"),
        }
    }
}
