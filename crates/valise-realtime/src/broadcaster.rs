use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use valise_types::events::ConversationEvent;

/// Per-subscriber queue depth. Events are non-durable hints; a viewer whose
/// queue is full loses events and reconciles by re-fetching.
const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

/// Per-conversation publish/subscribe fan-out.
///
/// Constructed once and passed to components explicitly so tests can
/// substitute their own instance. `publish` never blocks: each subscriber
/// has a bounded queue and a slow one drops events instead of stalling the
/// publisher. Delivery is at-least-once for connected subscribers, with no
/// ordering guarantee beyond per-publisher FIFO.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<BroadcasterInner>,
}

struct BroadcasterInner {
    /// conversation_id -> (subscriber_id -> queue)
    topics: RwLock<HashMap<Uuid, HashMap<u64, mpsc::Sender<ConversationEvent>>>>,
    next_subscriber_id: AtomicU64,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BroadcasterInner {
                topics: RwLock::new(HashMap::new()),
                next_subscriber_id: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to one conversation's events. Dropping the returned handle
    /// unsubscribes.
    pub fn subscribe(&self, conversation_id: Uuid) -> Subscription {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);

        let mut topics = self.inner.topics.write().expect("broadcaster lock poisoned");
        topics.entry(conversation_id).or_default().insert(id, tx);

        Subscription {
            conversation_id,
            id,
            rx,
            broadcaster: self.clone(),
        }
    }

    /// Remove one subscriber. Safe to call repeatedly and for ids that were
    /// already removed.
    pub fn unsubscribe(&self, conversation_id: Uuid, subscriber_id: u64) {
        let mut topics = self.inner.topics.write().expect("broadcaster lock poisoned");
        if let Some(subscribers) = topics.get_mut(&conversation_id) {
            subscribers.remove(&subscriber_id);
            if subscribers.is_empty() {
                topics.remove(&conversation_id);
            }
        }
    }

    /// Fan an event out to every live subscriber of its conversation.
    pub fn publish(&self, event: ConversationEvent) {
        let conversation_id = event.conversation_id();
        let mut closed: Vec<u64> = Vec::new();

        {
            let topics = self.inner.topics.read().expect("broadcaster lock poisoned");
            let Some(subscribers) = topics.get(&conversation_id) else {
                return;
            };

            for (&id, tx) in subscribers.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        // Slow viewer: drop, never block the publisher.
                        warn!(
                            "Dropping event for slow subscriber {} of conversation {}",
                            id, conversation_id
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
                }
            }
        }

        for id in closed {
            debug!("Pruning closed subscriber {} of conversation {}", id, conversation_id);
            self.unsubscribe(conversation_id, id);
        }
    }

    /// Number of live subscribers on a conversation topic.
    pub fn subscriber_count(&self, conversation_id: Uuid) -> usize {
        let topics = self.inner.topics.read().expect("broadcaster lock poisoned");
        topics.get(&conversation_id).map_or(0, |subs| subs.len())
    }
}

/// Handle owned by one subscriber of one conversation topic.
pub struct Subscription {
    conversation_id: Uuid,
    id: u64,
    rx: mpsc::Receiver<ConversationEvent>,
    broadcaster: Broadcaster,
}

impl Subscription {
    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub async fn recv(&mut self) -> Option<ConversationEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ConversationEvent> {
        self.rx.try_recv().ok()
    }

    /// Explicit unsubscribe. Idempotent; dropping the handle has the same
    /// effect.
    pub fn unsubscribe(&mut self) {
        self.broadcaster.unsubscribe(self.conversation_id, self.id);
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.conversation_id, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing_event(conversation_id: Uuid) -> ConversationEvent {
        ConversationEvent::TypingStart {
            conversation_id,
            user_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn events_reach_only_that_conversations_subscribers() {
        let broadcaster = Broadcaster::new();
        let conv_a = Uuid::new_v4();
        let conv_b = Uuid::new_v4();

        let mut sub_a = broadcaster.subscribe(conv_a);
        let mut sub_b = broadcaster.subscribe(conv_b);

        broadcaster.publish(typing_event(conv_a));

        assert!(sub_a.recv().await.is_some());
        assert!(sub_b.try_recv().is_none());
    }

    #[tokio::test]
    async fn per_publisher_order_is_preserved() {
        let broadcaster = Broadcaster::new();
        let conv = Uuid::new_v4();
        let mut sub = broadcaster.subscribe(conv);

        let users: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for &user_id in &users {
            broadcaster.publish(ConversationEvent::TypingStart {
                conversation_id: conv,
                user_id,
            });
        }

        for &expected in &users {
            match sub.recv().await {
                Some(ConversationEvent::TypingStart { user_id, .. }) => {
                    assert_eq!(user_id, expected)
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn slow_subscriber_drops_instead_of_blocking() {
        let broadcaster = Broadcaster::new();
        let conv = Uuid::new_v4();
        let mut sub = broadcaster.subscribe(conv);

        // Overfill the bounded queue; publish must not block or error.
        for _ in 0..(SUBSCRIBER_QUEUE_CAPACITY + 10) {
            broadcaster.publish(typing_event(conv));
        }

        let mut received = 0;
        while sub.try_recv().is_some() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_drop_cleans_up() {
        let broadcaster = Broadcaster::new();
        let conv = Uuid::new_v4();

        let mut sub = broadcaster.subscribe(conv);
        assert_eq!(broadcaster.subscriber_count(conv), 1);

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(broadcaster.subscriber_count(conv), 0);

        // Publishing to an empty topic is a no-op.
        broadcaster.publish(typing_event(conv));
        drop(sub);

        let other = broadcaster.subscribe(conv);
        assert_eq!(broadcaster.subscriber_count(conv), 1);
        drop(other);
        assert_eq!(broadcaster.subscriber_count(conv), 0);
    }
}
