//! Record sinks.
//!
//! The session forwards every decoded record (and every status read) to a
//! [`RecordSink`]. `emit` is called from the notification path and must not
//! block.

use tokio::sync::broadcast;
use tracing::info;

use crate::types::{RecordEnvelope, RecordRange};

/// Something the session hands to its sink.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    /// A decoded notification.
    Record(RecordEnvelope),
    /// The result of a status query.
    Range(RecordRange),
}

impl std::fmt::Display for SinkEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Record(record) => write!(f, "{record}"),
            Self::Range(range) => write!(f, "{range}"),
        }
    }
}

/// Destination for decoded telemetry.
pub trait RecordSink: Send + Sync + 'static {
    /// Accept one event. Must return promptly.
    fn emit(&self, event: SinkEvent);
}

/// Logs each event as a record line under target `hrm::records`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl RecordSink for TracingSink {
    fn emit(&self, event: SinkEvent) {
        info!(target: "hrm::records", "{event}");
    }
}

/// Fans events out to any number of subscribers.
///
/// Slow subscribers lag and lose events rather than stalling the session.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<SinkEvent>,
}

impl BroadcastSink {
    /// Create a sink buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to subsequent events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SinkEvent> {
        self.tx.subscribe()
    }
}

impl RecordSink for BroadcastSink {
    fn emit(&self, event: SinkEvent) {
        info!(target: "hrm::records", "{event}");
        // No subscribers is fine; the record has already been logged.
        let _ = self.tx.send(event);
    }
}
