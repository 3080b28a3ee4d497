//! Volatile live-notification channel for research events.
//!
//! The bus fans out events the orchestrator has already appended to the store.
//! It is best-effort: publishing never blocks, events are dropped when nobody
//! listens, and slow subscribers lose the oldest events. The store remains the
//! source of truth.

use crate::events::Event;
use tokio::sync::broadcast;
use tracing::trace;

/// In-process event bus backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus whose subscribers can lag by at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to current subscribers, if any.
    pub fn publish(&self, event: &Event) {
        if self.tx.send(event.clone()).is_err() {
            trace!(event_type = event.event_type(), "No live subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
