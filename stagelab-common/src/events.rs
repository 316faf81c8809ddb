//! Event types for the stagelab event system
//!
//! Provides the shared [`IngestEvent`] enum and the broadcast-backed [`EventBus`].
//! Events are serialized as tagged JSON for SSE transmission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::status::ItemStatus;

/// Ingestion pipeline events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IngestEvent {
    /// Session created or resumed for a collection
    SessionStarted {
        session_id: Uuid,
        collection_id: Uuid,
        /// True when an existing pending session was picked up
        resumed: bool,
        timestamp: DateTime<Utc>,
    },

    /// Files accepted by the ingestion stage
    ItemsIngested {
        session_id: Uuid,
        /// Local items created
        count: usize,
        /// Archive entries and files dropped as unsupported or unreadable
        skipped: usize,
        timestamp: DateTime<Utc>,
    },

    /// One item changed status
    ///
    /// Emitted for every accepted transition, including reconciliation merges.
    ItemStatusChanged {
        session_id: Uuid,
        local_id: Uuid,
        remote_id: Option<Uuid>,
        old_status: ItemStatus,
        new_status: ItemStatus,
        timestamp: DateTime<Utc>,
    },

    /// Subject resolver pre-populated a subject name
    SubjectGuessUpdated {
        session_id: Uuid,
        local_id: Uuid,
        subject_name: String,
        confidence: f32,
        timestamp: DateTime<Utc>,
    },

    /// The job dispatcher accepted an analysis trigger
    AnalysisDispatched {
        session_id: Uuid,
        item_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// The job dispatcher rejected an analysis trigger; items were reverted
    AnalysisDispatchFailed {
        session_id: Uuid,
        reverted: usize,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Reconciliation poller exited
    PollingStopped {
        session_id: Uuid,
        /// Number of ticks executed
        ticks: u64,
        timestamp: DateTime<Utc>,
    },

    /// Log records inserted
    CommitCompleted {
        session_id: Option<Uuid>,
        collection_id: Uuid,
        logs_inserted: usize,
        timestamp: DateTime<Utc>,
    },

    /// Log insert failed; items remain `complete`
    CommitFailed {
        session_id: Option<Uuid>,
        collection_id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl IngestEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            IngestEvent::SessionStarted { .. } => "SessionStarted",
            IngestEvent::ItemsIngested { .. } => "ItemsIngested",
            IngestEvent::ItemStatusChanged { .. } => "ItemStatusChanged",
            IngestEvent::SubjectGuessUpdated { .. } => "SubjectGuessUpdated",
            IngestEvent::AnalysisDispatched { .. } => "AnalysisDispatched",
            IngestEvent::AnalysisDispatchFailed { .. } => "AnalysisDispatchFailed",
            IngestEvent::PollingStopped { .. } => "PollingStopped",
            IngestEvent::CommitCompleted { .. } => "CommitCompleted",
            IngestEvent::CommitFailed { .. } => "CommitFailed",
        }
    }

    /// Session the event belongs to, if any
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            IngestEvent::SessionStarted { session_id, .. }
            | IngestEvent::ItemsIngested { session_id, .. }
            | IngestEvent::ItemStatusChanged { session_id, .. }
            | IngestEvent::SubjectGuessUpdated { session_id, .. }
            | IngestEvent::AnalysisDispatched { session_id, .. }
            | IngestEvent::AnalysisDispatchFailed { session_id, .. }
            | IngestEvent::PollingStopped { session_id, .. } => Some(*session_id),
            IngestEvent::CommitCompleted { session_id, .. }
            | IngestEvent::CommitFailed { session_id, .. } => *session_id,
        }
    }
}

// ============================================================================
// EventBus Implementation
// ============================================================================

/// Broadcast bus for [`IngestEvent`]s
///
/// Cloning the bus shares the underlying channel. Slow subscribers lose the
/// oldest events once `capacity` is exceeded (tokio broadcast semantics).
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IngestEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: IngestEvent,
    ) -> Result<usize, broadcast::error::SendError<IngestEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: IngestEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No subscribers for event");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_event(session_id: Uuid) -> IngestEvent {
        IngestEvent::ItemStatusChanged {
            session_id,
            local_id: Uuid::new_v4(),
            remote_id: None,
            old_status: ItemStatus::Pending,
            new_status: ItemStatus::Uploading,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_event_bus_capacity() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_emit_delivers_to_subscriber() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let session_id = Uuid::new_v4();

        let delivered = bus.emit(status_event(session_id)).unwrap();
        assert_eq!(delivered, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "ItemStatusChanged");
        assert_eq!(received.session_id(), Some(session_id));
    }

    #[test]
    fn test_emit_without_subscribers_errors_but_lossy_does_not_panic() {
        let bus = EventBus::new(2);
        assert!(bus.emit(status_event(Uuid::new_v4())).is_err());
        bus.emit_lossy(status_event(Uuid::new_v4()));
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(status_event(Uuid::new_v4())).unwrap();
        assert_eq!(json["type"], "ItemStatusChanged");
        assert_eq!(json["new_status"], "uploading");
    }
}
