//! In-process topic bus for lifecycle events.
//!
//! Delivery is "latest value wins": every subscriber owns a single-slot
//! mailbox that each publish overwrites. A subscriber that reads slower than
//! the publish rate sees coalesced updates, never a backlog. Consumers only
//! care about the current state of the broadcast, not a replay of it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

/// Topics published by the stream monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Online/offline transitions. Payload: [`EventPayload::Online`].
    IsOnline,
    /// Identity changes within an episode. Payload: [`EventPayload::StreamInfo`].
    StreamInfo,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IsOnline => "is_online",
            Self::StreamInfo => "stream_info",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message carried by a [`Topic`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Online(bool),
    /// Raw probe payload that produced the new snapshot.
    StreamInfo(Arc<Value>),
}

impl EventPayload {
    /// The topic this payload belongs on.
    pub fn topic(&self) -> Topic {
        match self {
            Self::Online(_) => Topic::IsOnline,
            Self::StreamInfo(_) => Topic::StreamInfo,
        }
    }
}

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

struct Mailbox {
    id: u64,
    name: String,
    slot: Mutex<Option<EventPayload>>,
    notify: Notify,
}

/// A receiving end registered on one or more topics.
///
/// Cloning yields another handle to the same mailbox.
#[derive(Clone)]
pub struct Subscriber {
    inner: Arc<Mailbox>,
}

impl Subscriber {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mailbox {
                id: NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                slot: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Wait up to `timeout` for a message, taking it out of the mailbox.
    ///
    /// Returns `None` on timeout. A message is handed out at most once.
    pub async fn receive(&self, timeout: Duration) -> Option<EventPayload> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.take() {
                debug!(subscriber = %self.inner.name, ?message, "received event");
                return Some(message);
            }
            // A stale permit from an already-consumed publish just loops once more.
            if tokio::time::timeout_at(deadline, self.inner.notify.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    /// Take the pending message without waiting.
    pub fn try_receive(&self) -> Option<EventPayload> {
        self.take()
    }

    fn take(&self) -> Option<EventPayload> {
        self.inner.slot.lock().take()
    }

    fn deliver(&self, message: EventPayload) {
        *self.inner.slot.lock() = Some(message);
        self.inner.notify.notify_one();
    }

    fn same_as(&self, other: &Subscriber) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

/// Topic → subscribers registry.
#[derive(Default)]
pub struct EventBus {
    topics: Mutex<HashMap<Topic, Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber` on `topic`. Registering twice is a no-op.
    pub fn subscribe(&self, subscriber: &Subscriber, topic: Topic) {
        let mut topics = self.topics.lock();
        let subscribers = topics.entry(topic).or_default();
        if !subscribers.iter().any(|s| s.same_as(subscriber)) {
            subscribers.push(subscriber.clone());
        }
    }

    pub fn unsubscribe(&self, subscriber: &Subscriber, topic: Topic) {
        if let Some(subscribers) = self.topics.lock().get_mut(&topic) {
            subscribers.retain(|s| !s.same_as(subscriber));
        }
    }

    /// Deliver `payload` to every subscriber currently registered on `topic`.
    ///
    /// Returns the number of subscribers reached.
    pub fn publish(&self, topic: Topic, payload: EventPayload) -> usize {
        debug!(%topic, ?payload, "publish event");
        let subscribers = match self.topics.lock().get(&topic) {
            Some(subscribers) => subscribers.clone(),
            None => return 0,
        };
        for subscriber in &subscribers {
            subscriber.deliver(payload.clone());
        }
        subscribers.len()
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics.lock().get(&topic).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new();
        let sub = Subscriber::new("test");
        bus.subscribe(&sub, Topic::IsOnline);

        assert_eq!(bus.publish(Topic::IsOnline, EventPayload::Online(true)), 1);
        assert_eq!(sub.receive(SHORT).await, Some(EventPayload::Online(true)));
    }

    #[tokio::test]
    async fn test_second_receive_times_out() {
        let bus = EventBus::new();
        let sub = Subscriber::new("test");
        bus.subscribe(&sub, Topic::StreamInfo);

        let payload = EventPayload::StreamInfo(Arc::new(serde_json::json!({"plugin": "x"})));
        bus.publish(Topic::StreamInfo, payload.clone());

        assert_eq!(sub.receive(SHORT).await, Some(payload));
        assert_eq!(sub.receive(SHORT).await, None);
    }

    #[tokio::test]
    async fn test_slow_subscriber_sees_latest_only() {
        let bus = EventBus::new();
        let sub = Subscriber::new("slow");
        bus.subscribe(&sub, Topic::IsOnline);

        bus.publish(Topic::IsOnline, EventPayload::Online(true));
        bus.publish(Topic::IsOnline, EventPayload::Online(false));

        assert_eq!(sub.receive(SHORT).await, Some(EventPayload::Online(false)));
        assert_eq!(sub.receive(SHORT).await, None);
    }

    #[tokio::test]
    async fn test_receive_wakes_on_later_publish() {
        let bus = Arc::new(EventBus::new());
        let sub = Subscriber::new("waiter");
        bus.subscribe(&sub, Topic::IsOnline);

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(Topic::IsOnline, EventPayload::Online(true));
        });

        let received = sub.receive(Duration::from_secs(5)).await;
        assert_eq!(received, Some(EventPayload::Online(true)));
    }

    #[test]
    fn test_topics_are_independent() {
        let bus = EventBus::new();
        let sub = Subscriber::new("test");
        bus.subscribe(&sub, Topic::IsOnline);

        assert_eq!(bus.publish(Topic::StreamInfo, EventPayload::Online(true)), 0);
        assert!(sub.try_receive().is_none());
    }

    #[test]
    fn test_unsubscribe_and_duplicate_subscribe() {
        let bus = EventBus::new();
        let sub = Subscriber::new("test");
        bus.subscribe(&sub, Topic::IsOnline);
        bus.subscribe(&sub.clone(), Topic::IsOnline);
        assert_eq!(bus.subscriber_count(Topic::IsOnline), 1);

        bus.unsubscribe(&sub, Topic::IsOnline);
        assert_eq!(bus.subscriber_count(Topic::IsOnline), 0);
        assert_eq!(bus.publish(Topic::IsOnline, EventPayload::Online(false)), 0);
        assert!(sub.try_receive().is_none());
    }

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::IsOnline.as_str(), "is_online");
        assert_eq!(Topic::StreamInfo.to_string(), "stream_info");
        assert_eq!(EventPayload::Online(true).topic(), Topic::IsOnline);
    }
}
