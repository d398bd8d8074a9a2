use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;
use uuid::Uuid;

use crate::Broadcaster;
use valise_types::events::ConversationEvent;

/// How long a typing signal stays live without being refreshed.
pub const TYPING_TTL: Duration = Duration::from_secs(2);

/// How often the sweep loop clears expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Ephemeral "is typing" signals, keyed by (conversation, user).
///
/// Entries expire by TTL rather than explicit clear: a client that crashes
/// mid-keystroke leaves a stale indicator for at most one TTL window. Pure
/// in-memory state; a process restart discards everything with no
/// correctness impact.
#[derive(Clone)]
pub struct TypingTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    entries: Mutex<HashMap<(Uuid, Uuid), Instant>>,
    broadcaster: Broadcaster,
}

impl TypingTracker {
    pub fn new(broadcaster: Broadcaster) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                entries: Mutex::new(HashMap::new()),
                broadcaster,
            }),
        }
    }

    /// Start or refresh (`true`) / clear (`false`) the typing signal and
    /// publish the matching event to the conversation topic.
    pub fn set_typing(&self, conversation_id: Uuid, user_id: Uuid, is_typing: bool) {
        let key = (conversation_id, user_id);
        if is_typing {
            let mut entries = self.inner.entries.lock().expect("typing map poisoned");
            entries.insert(key, Instant::now() + TYPING_TTL);
            drop(entries);

            self.inner.broadcaster.publish(ConversationEvent::TypingStart {
                conversation_id,
                user_id,
            });
        } else {
            let removed = {
                let mut entries = self.inner.entries.lock().expect("typing map poisoned");
                entries.remove(&key).is_some()
            };
            if removed {
                self.inner.broadcaster.publish(ConversationEvent::TypingStop {
                    conversation_id,
                    user_id,
                });
            }
        }
    }

    /// Who is currently typing in a conversation. Expired entries are
    /// treated as stopped even before the sweep removes them.
    pub fn typists(&self, conversation_id: Uuid) -> Vec<Uuid> {
        let now = Instant::now();
        let entries = self.inner.entries.lock().expect("typing map poisoned");
        entries
            .iter()
            .filter(|&(&(conv, _), &expires_at)| conv == conversation_id && expires_at > now)
            .map(|((_, user), _)| *user)
            .collect()
    }

    /// Background task that prunes expired signals and publishes the
    /// TypingStop the client never sent.
    pub async fn run_sweep_loop(self) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            interval.tick().await;

            let now = Instant::now();
            let expired: Vec<(Uuid, Uuid)> = {
                let mut entries = self.inner.entries.lock().expect("typing map poisoned");
                let dead: Vec<(Uuid, Uuid)> = entries
                    .iter()
                    .filter(|&(_, &expires_at)| expires_at <= now)
                    .map(|(&key, _)| key)
                    .collect();
                for key in &dead {
                    entries.remove(key);
                }
                dead
            };

            for (conversation_id, user_id) in expired {
                trace!("Typing signal expired for {} in {}", user_id, conversation_id);
                self.inner.broadcaster.publish(ConversationEvent::TypingStop {
                    conversation_id,
                    user_id,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn typing_signal_expires_after_ttl_without_explicit_stop() {
        let broadcaster = Broadcaster::new();
        let tracker = TypingTracker::new(broadcaster);
        let conv = Uuid::new_v4();
        let user = Uuid::new_v4();

        tracker.set_typing(conv, user, true);
        assert_eq!(tracker.typists(conv), vec![user]);

        tokio::time::advance(TYPING_TTL + Duration::from_millis(10)).await;
        assert!(tracker.typists(conv).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn typists_scopes_to_the_conversation_and_skips_expired_entries() {
        let broadcaster = Broadcaster::new();
        let tracker = TypingTracker::new(broadcaster);
        let conv_a = Uuid::new_v4();
        let conv_b = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        tracker.set_typing(conv_a, alice, true);
        tracker.set_typing(conv_b, bob, true);
        tokio::time::advance(TYPING_TTL + Duration::from_millis(10)).await;
        tracker.set_typing(conv_a, bob, true);

        // Alice's signal in A expired; Bob's live signal in B stays out of A.
        assert_eq!(tracker.typists(conv_a), vec![bob]);
        assert_eq!(tracker.typists(conv_b), Vec::<Uuid>::new());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_extends_the_window() {
        let broadcaster = Broadcaster::new();
        let tracker = TypingTracker::new(broadcaster);
        let conv = Uuid::new_v4();
        let user = Uuid::new_v4();

        tracker.set_typing(conv, user, true);
        tokio::time::advance(Duration::from_millis(1_500)).await;
        tracker.set_typing(conv, user, true);
        tokio::time::advance(Duration::from_millis(1_500)).await;

        // 3s after the first signal, but only 1.5s after the refresh.
        assert_eq!(tracker.typists(conv), vec![user]);
    }

    #[tokio::test]
    async fn start_and_stop_publish_events() {
        let broadcaster = Broadcaster::new();
        let tracker = TypingTracker::new(broadcaster.clone());
        let conv = Uuid::new_v4();
        let user = Uuid::new_v4();
        let mut sub = broadcaster.subscribe(conv);

        tracker.set_typing(conv, user, true);
        tracker.set_typing(conv, user, false);
        // Stop without a live entry publishes nothing.
        tracker.set_typing(conv, user, false);

        assert!(matches!(
            sub.recv().await,
            Some(ConversationEvent::TypingStart { .. })
        ));
        assert!(matches!(
            sub.recv().await,
            Some(ConversationEvent::TypingStop { .. })
        ));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_publishes_the_stop_the_client_never_sent() {
        let broadcaster = Broadcaster::new();
        let tracker = TypingTracker::new(broadcaster.clone());
        let conv = Uuid::new_v4();
        let user = Uuid::new_v4();
        let mut sub = broadcaster.subscribe(conv);

        tracker.set_typing(conv, user, true);
        let _ = sub.recv().await; // TypingStart

        tokio::spawn(tracker.clone().run_sweep_loop());
        tokio::time::advance(TYPING_TTL + SWEEP_INTERVAL).await;

        assert!(matches!(
            sub.recv().await,
            Some(ConversationEvent::TypingStop { conversation_id, user_id })
                if conversation_id == conv && user_id == user
        ));
        assert!(tracker.typists(conv).is_empty());
    }
}
