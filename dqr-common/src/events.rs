//! Event types for the DQR event system
//!
//! Provides the shared event definitions and EventBus. The store, the
//! mutation coordinator and the change listener publish here; views
//! subscribe to learn when to recompute.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::records::QueueName;

/// DQR event types
///
/// Events are broadcast via EventBus and can be serialized for logging or
/// forwarding to a UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReviewEvent {
    /// A queue's contents were swapped for an authoritative snapshot
    ///
    /// Triggers:
    /// - Filter view: recompute the queue (and any queue listed in `evicted_from`)
    QueueReplaced {
        /// Queue that was replaced
        queue: QueueName,
        /// Number of records now in the queue
        record_count: usize,
        /// Other queues that lost records claimed by this snapshot
        evicted_from: Vec<QueueName>,
        /// When the snapshot was applied
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A single record moved between queues (optimistic move or revert)
    RecordMoved {
        object_id: String,
        from: QueueName,
        to: QueueName,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The remote call behind an optimistic move failed and the move was undone
    MutationReverted {
        mutation_id: Uuid,
        object_id: String,
        /// Failure reported by the remote authority
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A queue fetch failed; the queue keeps its previous contents
    SyncFailed {
        queue: QueueName,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Invalidation signal received from the push channel
    RemoteChanged {
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Push channel connected (or reconnected)
    ListenerConnected {
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Push channel lost; the listener retries after `retry_in_ms`
    ListenerDisconnected {
        reason: String,
        retry_in_ms: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl ReviewEvent {
    pub fn event_type(&self) -> &str {
        match self {
            ReviewEvent::QueueReplaced { .. } => "QueueReplaced",
            ReviewEvent::RecordMoved { .. } => "RecordMoved",
            ReviewEvent::MutationReverted { .. } => "MutationReverted",
            ReviewEvent::SyncFailed { .. } => "SyncFailed",
            ReviewEvent::RemoteChanged { .. } => "RemoteChanged",
            ReviewEvent::ListenerConnected { .. } => "ListenerConnected",
            ReviewEvent::ListenerDisconnected { .. } => "ListenerDisconnected",
        }
    }

    /// Queues whose visible contents may differ after this event
    pub fn affected_queues(&self) -> Vec<QueueName> {
        match self {
            ReviewEvent::QueueReplaced {
                queue, evicted_from, ..
            } => {
                let mut queues = vec![*queue];
                queues.extend(evicted_from.iter().copied());
                queues
            }
            ReviewEvent::RecordMoved { from, to, .. } => vec![*from, *to],
            _ => Vec::new(),
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ReviewEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReviewEvent> {
        self.tx.subscribe()
    }

    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ReviewEvent,
    ) -> Result<usize, broadcast::error::SendError<ReviewEvent>> {
        self.tx.send(event)
    }

    /// Emit without caring whether anyone is listening
    pub fn emit_lossy(&self, event: ReviewEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
