//! Event bus for coordination events.
//!
//! Pub/sub on a Tokio broadcast channel. Publishing never blocks and never
//! fails the caller: a bus with zero subscribers is a valid configuration.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::CoordinationEvent;

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to an [`EventBus`].
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast-channel event bus.
pub struct EventBus {
    sender: broadcast::Sender<CoordinationEvent>,
}

impl EventBus {
    /// Create a new event bus.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus.
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers.
    ///
    /// A send error means there are no receivers, which is fine — the
    /// event stream is observability, not control flow.
    pub fn publish(&self, event: CoordinationEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "event published"),
            Err(_) => debug!(event_type, "event published (no receivers)"),
        }
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.sender.subscribe()
    }

    /// Number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
