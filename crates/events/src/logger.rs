//! Mirrors bus traffic into `tracing`.
//!
//! [`EventLogger`] subscribes to the [`EventBus`](crate::bus::EventBus) and
//! logs every [`ReviewEvent`]. `storage.failed` is logged at `warn`, the
//! rest at `debug`. The loop ends when the bus is dropped.

use tokio::sync::broadcast;

use crate::bus::ReviewEvent;
use crate::event_types;

/// Background subscriber that logs events.
pub struct EventLogger;

impl EventLogger {
    /// Run until the channel closes. Returns the number of events logged.
    pub async fn run(mut receiver: broadcast::Receiver<ReviewEvent>) -> u64 {
        let mut logged = 0u64;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    Self::log(&event);
                    logged += 1;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event logger lagged, some events were not logged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!(logged, "Event bus closed, logger shutting down");
                    break;
                }
            }
        }
        logged
    }

    fn log(event: &ReviewEvent) {
        let document_id = event.document_id.as_deref().unwrap_or("-");
        if event.event_type == event_types::STORAGE_FAILED {
            tracing::warn!(
                event_type = %event.event_type,
                document_id,
                payload = %event.payload,
                "Storage write failed"
            );
        } else {
            tracing::debug!(
                event_type = %event.event_type,
                document_id,
                payload = %event.payload,
                "Review event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    #[tokio::test]
    async fn logger_drains_until_bus_dropped() {
        let bus = EventBus::default();
        let handle = tokio::spawn(EventLogger::run(bus.subscribe()));

        bus.publish(ReviewEvent::new(event_types::SLIDE_CHANGED));
        bus.publish(ReviewEvent::new(event_types::STORAGE_FAILED).for_document("d"));
        drop(bus);

        assert_eq!(handle.await.unwrap(), 2);
    }
}
