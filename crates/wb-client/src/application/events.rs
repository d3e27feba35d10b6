//! Typed publish/subscribe notifications from the connection manager.
//!
//! Every observable effect of the manager is a [`SessionEvent`] published on
//! one [`EventBus`].  Callers subscribe either to the full stream or to a
//! single kind, in which case the [`Subscription`] yields that kind's payload
//! directly:
//!
//! ```rust
//! use wb_client::application::events::{EventBus, SessionEvent};
//! use wb_core::Envelope;
//!
//! # tokio_test::block_on(async {
//! let bus = EventBus::new();
//! let mut messages = bus.messages();
//! bus.publish(SessionEvent::Message(Envelope::new("lights", serde_json::json!(1))));
//! assert_eq!(messages.recv().await.unwrap().tag, "lights");
//! # });
//! ```
//!
//! Subscriptions only see events published after they were created.  Each
//! subscription has its own unbounded queue, so a slow reader never loses an
//! event and every subscriber sees them in publish order.  The cost is that a
//! subscription nobody reads keeps growing: drop it instead of ignoring it.
//! Dropped subscriptions are pruned on the next publish.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::trace;

use wb_core::Envelope;

/// Something observable happened to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A connection attempt could not be established.
    ConnectionFailed { reason: String },
    /// The socket opened and the authentication request was sent.
    Connected,
    /// The live connection reported an error.  The connection stays up.
    ConnectionError { reason: String },
    /// The live connection closed.
    ConnectionClosed { reason: String },
    /// An inbound message addressed to this applet (or to `"all"`).
    Message(Envelope),
    /// An outbound message was dropped.
    SendError { reason: String },
    /// An inbound text frame was not a valid bridge message and was dropped.
    DecodeError { reason: String },
}

impl SessionEvent {
    /// Short name of the event kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::ConnectionFailed { .. } => "connection_failed",
            SessionEvent::Connected => "connected",
            SessionEvent::ConnectionError { .. } => "connection_error",
            SessionEvent::ConnectionClosed { .. } => "connection_closed",
            SessionEvent::Message(_) => "message",
            SessionEvent::SendError { .. } => "send_error",
            SessionEvent::DecodeError { .. } => "decode_error",
        }
    }
}

/// Offers one event to a subscriber; `false` once the subscriber is gone.
type Deliver = Box<dyn Fn(&SessionEvent) -> bool + Send + Sync>;

/// Fan-out of [`SessionEvent`]s to every live [`Subscription`].
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Deliver>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `event` to every current subscriber whose kind matches.
    ///
    /// With no subscribers the event is simply dropped.
    pub fn publish(&self, event: SessionEvent) {
        let mut subscribers = self.lock();
        subscribers.retain(|deliver| deliver(&event));
        if subscribers.is_empty() {
            trace!("no subscribers for {} event", event.kind());
        }
    }

    /// Subscribes to the events `select` maps to `Some`.
    pub fn subscribe<T: Send + 'static>(
        &self,
        select: fn(&SessionEvent) -> Option<T>,
    ) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(Box::new(move |event| match select(event) {
            Some(value) => tx.send(value).is_ok(),
            None => !tx.is_closed(),
        }));
        Subscription { rx }
    }

    /// Every event, unfiltered.
    pub fn events(&self) -> Subscription<SessionEvent> {
        self.subscribe(|event| Some(event.clone()))
    }

    pub fn messages(&self) -> Subscription<Envelope> {
        self.subscribe(|event| match event {
            SessionEvent::Message(envelope) => Some(envelope.clone()),
            _ => None,
        })
    }

    pub fn connections(&self) -> Subscription<()> {
        self.subscribe(|event| match event {
            SessionEvent::Connected => Some(()),
            _ => None,
        })
    }

    pub fn connection_failures(&self) -> Subscription<String> {
        self.subscribe(|event| match event {
            SessionEvent::ConnectionFailed { reason } => Some(reason.clone()),
            _ => None,
        })
    }

    pub fn connection_errors(&self) -> Subscription<String> {
        self.subscribe(|event| match event {
            SessionEvent::ConnectionError { reason } => Some(reason.clone()),
            _ => None,
        })
    }

    pub fn connection_closes(&self) -> Subscription<String> {
        self.subscribe(|event| match event {
            SessionEvent::ConnectionClosed { reason } => Some(reason.clone()),
            _ => None,
        })
    }

    pub fn send_errors(&self) -> Subscription<String> {
        self.subscribe(|event| match event {
            SessionEvent::SendError { reason } => Some(reason.clone()),
            _ => None,
        })
    }

    pub fn decode_errors(&self) -> Subscription<String> {
        self.subscribe(|event| match event {
            SessionEvent::DecodeError { reason } => Some(reason.clone()),
            _ => None,
        })
    }

    /// Number of live subscriptions as of the last publish.
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Deliver>> {
        // A panicking subscriber filter cannot leave the list half-updated.
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A receiver for one kind of [`SessionEvent`], yielding its payload.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Waits for the next matching event.
    ///
    /// Returns `None` once the bus is gone (the manager was dropped) and
    /// every queued event has been read.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Returns the next matching event that is already queued, if any.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_kind_subscription_skips_other_kinds() {
        // Arrange
        let bus = EventBus::new();
        let mut failures = bus.connection_failures();

        // Act
        bus.publish(SessionEvent::Connected);
        bus.publish(SessionEvent::Message(Envelope::new("x", json!(null))));
        bus.publish(SessionEvent::ConnectionFailed {
            reason: "refused".to_string(),
        });

        // Assert: only the failure's reason comes through
        assert_eq!(failures.recv().await.as_deref(), Some("refused"));
        assert_eq!(failures.try_recv(), None);
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event() {
        let bus = EventBus::new();
        let mut a = bus.events();
        let mut b = bus.events();

        bus.publish(SessionEvent::Connected);

        assert_eq!(a.recv().await, Some(SessionEvent::Connected));
        assert_eq!(b.recv().await, Some(SessionEvent::Connected));
    }

    #[test]
    fn test_publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(SessionEvent::SendError {
            reason: "bridge not connected".to_string(),
        });
    }

    #[tokio::test]
    async fn test_recv_returns_none_once_bus_dropped() {
        let bus = EventBus::new();
        let mut events = bus.events();

        drop(bus);

        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn test_slow_subscriber_receives_every_event_in_order() {
        // Arrange: publish far more than any fixed buffer would hold
        let bus = EventBus::new();
        let mut messages = bus.messages();
        for i in 0..1000 {
            bus.publish(SessionEvent::Message(Envelope::new("lights", json!(i))));
        }

        // Act
        let mut received = Vec::new();
        while let Some(envelope) = messages.try_recv() {
            received.push(envelope.payload);
        }

        // Assert: nothing skipped, nothing reordered
        let expected: Vec<_> = (0..1000).map(|i| json!(i)).collect();
        assert_eq!(received, expected);
    }

    #[test]
    fn test_dropped_subscription_is_pruned_on_publish() {
        let bus = EventBus::new();
        let kept = bus.connections();
        let dropped = bus.messages();
        assert_eq!(bus.subscriber_count(), 2);

        drop(dropped);
        bus.publish(SessionEvent::Connected);

        assert_eq!(bus.subscriber_count(), 1);
        drop(kept);
    }

    #[tokio::test]
    async fn test_queued_events_survive_bus_drop() {
        let bus = EventBus::new();
        let mut closes = bus.connection_closes();
        bus.publish(SessionEvent::ConnectionClosed {
            reason: "bye".to_string(),
        });

        drop(bus);

        assert_eq!(closes.recv().await.as_deref(), Some("bye"));
        assert_eq!(closes.recv().await, None);
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(SessionEvent::Connected.kind(), "connected");
        assert_eq!(
            SessionEvent::DecodeError {
                reason: String::new()
            }
            .kind(),
            "decode_error"
        );
    }
}
