//! Publish/subscribe of lifecycle tags with payloads.
//!
//! A thin wrapper over `tokio::sync::broadcast` so publishers don't need to
//! know who, if anyone, is listening — the trigger service is the only
//! built-in subscriber, but advisory/health reporting can subscribe too
//! without coupling back to the publishers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub tag: String,
    pub payload: serde_json::Value,
}

#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Returns the number of active subscribers it was
    /// delivered to; a publish with zero subscribers is not an error — the
    /// bus does not require anyone to be listening.
    pub fn publish(&self, tag: impl Into<String>, payload: serde_json::Value) -> usize {
        let event = Event {
            tag: tag.into(),
            payload,
        };
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish("contract.created", json!({"id": 1}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.tag, "contract.created");
        assert_eq!(event.payload, json!({"id": 1}));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let bus = EventBus::default();
        let delivered = bus.publish("no.one.listening", json!({}));
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_the_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish("tag", json!(null));

        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }
}
