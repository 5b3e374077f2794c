//! Per-connection event bus.
//!
//! Subscribers register a [`TopicPattern`] and receive every published [`Event`]
//! whose topic it matches, at most once per frame. Dropping the [`Subscription`]
//! removes it from the bus.
//!
//! Subscriptions opened with [`EventBus::subscribe_owned`] also claim the frames they
//! match: the dispatcher leaves NAK recovery for claimed frames to the owner.

use crate::core::message::Message;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::topic::{Topic, TopicPattern};
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::trace;

/// A frame delivered to a subscriber, tagged with the topic that matched.
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: Topic,
    pub message: Arc<Message>,
}

struct Subscriber {
    pattern: TopicPattern,
    sender: mpsc::UnboundedSender<Event>,
    owned: bool,
}

#[derive(Default)]
struct BusInner {
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
}

/// Cloneable handle to one connection's bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
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

    pub fn subscribe(&self, pattern: TopicPattern) -> Result<Subscription> {
        self.register(pattern, false)
    }

    /// Subscribe and claim correlation for matching frames.
    pub fn subscribe_owned(&self, pattern: TopicPattern) -> Result<Subscription> {
        self.register(pattern, true)
    }

    fn register(&self, pattern: TopicPattern, owned: bool) -> Result<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_BUS_LOCK.to_string()))?;
        subscribers.insert(
            id,
            Subscriber {
                pattern,
                sender,
                owned,
            },
        );
        Ok(Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
            events: UnboundedReceiverStream::new(receiver),
        })
    }

    /// Whether an owned subscription matches `topic`.
    pub fn is_claimed(&self, topic: &Topic) -> bool {
        self.inner.subscribers.read().is_ok_and(|subscribers| {
            subscribers
                .values()
                .any(|s| s.owned && !s.sender.is_closed() && s.pattern.matches(topic))
        })
    }

    /// Deliver `message` to every subscriber matching one of `topics`. Returns the
    /// number of subscribers reached.
    pub fn publish(&self, topics: &[Topic], message: Arc<Message>) -> Result<usize> {
        let subscribers = self
            .inner
            .subscribers
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_BUS_LOCK.to_string()))?;

        let mut delivered = 0;
        for subscriber in subscribers.values() {
            let Some(topic) = topics.iter().find(|t| subscriber.pattern.matches(t)) else {
                continue;
            };
            let event = Event {
                topic: topic.clone(),
                message: Arc::clone(&message),
            };
            if subscriber.sender.send(event).is_ok() {
                delivered += 1;
            }
        }
        trace!(delivered, topics = topics.len(), "Published frame");
        Ok(delivered)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }
}

/// Receiving end of a subscription.
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
    events: UnboundedReceiverStream<Event>,
}

impl Subscription {
    /// Next event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.events.next().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.events.as_mut().try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            if let Ok(mut subscribers) = bus.subscribers.write() {
                subscribers.remove(&self.id);
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::Address;
    use crate::core::message::{Body, MessageId};
    use crate::protocol::topic::EventKind;

    fn topic(name: &'static str) -> Topic {
        Topic {
            address: Some(Address::new([1, 2, 3])),
            group: None,
            name,
            kind: EventKind::Received,
        }
    }

    fn frame() -> Arc<Message> {
        Arc::new(Message::new(Body::Bare(MessageId::UserResetDetected)))
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscribers_once() {
        let bus = EventBus::new();
        let mut all = bus.subscribe(TopicPattern::any()).unwrap();
        let mut ping = bus.subscribe(TopicPattern::any().with_name("ping")).unwrap();

        let delivered = bus.publish(&[topic("ping"), topic("id_request")], frame()).unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(all.recv().await.unwrap().topic.name, "ping");
        assert!(all.try_recv().is_none());
        assert_eq!(ping.recv().await.unwrap().topic.name, "ping");
    }

    #[test]
    fn test_drop_deregisters() {
        let bus = EventBus::new();
        let sub = bus.subscribe_owned(TopicPattern::any()).unwrap();
        assert!(bus.is_claimed(&topic("ping")));
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(!bus.is_claimed(&topic("ping")));
    }

    #[test]
    fn test_plain_subscription_does_not_claim() {
        let bus = EventBus::new();
        let _sub = bus.subscribe(TopicPattern::any()).unwrap();
        assert!(!bus.is_claimed(&topic("ping")));
    }
}
