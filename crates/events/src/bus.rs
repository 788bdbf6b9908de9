//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans every [`ReviewEvent`] out to all current subscribers.
//! Share it as `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use slidepin_core::pins::SyncStatus;
use tokio::sync::broadcast;

use crate::event_types;

// ---------------------------------------------------------------------------
// ReviewEvent
// ---------------------------------------------------------------------------

/// Something that happened to a document's review state.
///
/// Built with [`ReviewEvent::new`] plus
/// [`for_document`](ReviewEvent::for_document) and
/// [`with_payload`](ReviewEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEvent {
    /// Dot-separated name, see [`event_types`].
    pub event_type: String,

    /// Document the event concerns, if any.
    pub document_id: Option<String>,

    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl ReviewEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            document_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn for_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// A `storage.failed` event when `status` is unsaved, `None` otherwise.
    pub fn from_sync_status(
        document_id: &str,
        operation: &str,
        status: &SyncStatus,
    ) -> Option<Self> {
        match status {
            SyncStatus::Saved => None,
            SyncStatus::Unsaved { reason } => Some(
                Self::new(event_types::STORAGE_FAILED)
                    .for_document(document_id)
                    .with_payload(serde_json::json!({
                        "operation": operation,
                        "reason": reason,
                    })),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use slidepin_events::bus::{EventBus, ReviewEvent};
///
/// let bus = EventBus::default();
/// let _rx = bus.subscribe();
///
/// bus.publish(ReviewEvent::new("slide.changed").for_document("deck-1"));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<ReviewEvent>,
}

impl EventBus {
    /// When the buffer is full the oldest unread events are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped when nobody listens.
    pub fn publish(&self, event: ReviewEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReviewEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
