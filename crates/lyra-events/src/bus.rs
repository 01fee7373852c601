use tokio::sync::broadcast;

use crate::Event;

/// Broadcast channel for one streaming session.
///
/// The controller publishes segment progress and lifecycle changes here;
/// the embedding player subscribes to drive its UI. Clones share the same
/// channel. Nothing is buffered for a session nobody listens to.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// A zero `capacity` is bumped to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a [`SegmentEvent`](crate::SegmentEvent) or
    /// [`StreamEvent`](crate::StreamEvent). Never blocks the controller.
    pub fn publish<E: Into<Event>>(&self, event: E) {
        let _ = self.tx.send(event.into());
    }

    /// Events published from now on. A listener that falls more than the
    /// channel capacity behind sees `RecvError::Lagged` and skips ahead.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
