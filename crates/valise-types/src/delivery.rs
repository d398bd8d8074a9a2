use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

/// Client-visible lifecycle of one submitted message, keyed by the
/// client-generated correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Sent,
    Failed,
}

/// The payload retained for a FAILED send so a resend can re-enter the
/// pipeline without the client re-supplying it.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
}

#[derive(Debug)]
struct Entry {
    state: DeliveryState,
    draft: MessageDraft,
    message_id: Option<Uuid>,
    touched_at: Instant,
}

/// Tracks PENDING/SENT/FAILED per correlation id.
///
/// A retried send is a brand-new message once it succeeds: the storage layer
/// does not deduplicate against the original failed attempt, so a send whose
/// acknowledgment was lost can produce a visible duplicate. Accepted risk.
///
/// Entries do not live forever: settled (SENT/FAILED) entries are dropped by
/// a periodic [`evict_settled`](Self::evict_settled) sweep once they have
/// gone untouched for the retention window, after which the correlation id
/// can carry a fresh send. PENDING entries always survive the sweep.
#[derive(Debug, Default)]
pub struct DeliveryLedger {
    entries: Mutex<HashMap<String, Entry>>,
}

impl DeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a send attempt. Returns false if the correlation id already
    /// has an attempt in flight or already succeeded; a FAILED entry is
    /// re-armed to PENDING.
    pub fn begin(&self, correlation_id: &str, draft: MessageDraft) -> bool {
        let mut entries = self.entries.lock().expect("delivery ledger poisoned");
        match entries.get(correlation_id).map(|e| e.state) {
            Some(DeliveryState::Pending) | Some(DeliveryState::Sent) => false,
            _ => {
                entries.insert(
                    correlation_id.to_string(),
                    Entry {
                        state: DeliveryState::Pending,
                        draft,
                        message_id: None,
                        touched_at: Instant::now(),
                    },
                );
                true
            }
        }
    }

    pub fn mark_sent(&self, correlation_id: &str, message_id: Uuid) {
        let mut entries = self.entries.lock().expect("delivery ledger poisoned");
        if let Some(entry) = entries.get_mut(correlation_id) {
            entry.state = DeliveryState::Sent;
            entry.message_id = Some(message_id);
            entry.touched_at = Instant::now();
        }
    }

    pub fn mark_failed(&self, correlation_id: &str) {
        let mut entries = self.entries.lock().expect("delivery ledger poisoned");
        if let Some(entry) = entries.get_mut(correlation_id) {
            entry.state = DeliveryState::Failed;
            entry.touched_at = Instant::now();
        }
    }

    pub fn state(&self, correlation_id: &str) -> Option<DeliveryState> {
        let entries = self.entries.lock().expect("delivery ledger poisoned");
        entries.get(correlation_id).map(|e| e.state)
    }

    /// Retrieve the draft of a FAILED send for a retry, transitioning it
    /// back to PENDING. Returns None unless the entry is currently FAILED.
    pub fn take_failed(&self, correlation_id: &str) -> Option<MessageDraft> {
        let mut entries = self.entries.lock().expect("delivery ledger poisoned");
        let entry = entries.get_mut(correlation_id)?;
        if entry.state != DeliveryState::Failed {
            return None;
        }
        entry.state = DeliveryState::Pending;
        entry.touched_at = Instant::now();
        Some(entry.draft.clone())
    }

    /// Drop settled (SENT/FAILED) entries untouched for at least `retention`,
    /// freeing their correlation ids. Returns how many were dropped. PENDING
    /// entries are still in flight and never evicted here.
    pub fn evict_settled(&self, retention: Duration) -> usize {
        let mut entries = self.entries.lock().expect("delivery ledger poisoned");
        let before = entries.len();
        entries.retain(|_, entry| {
            entry.state == DeliveryState::Pending || entry.touched_at.elapsed() < retention
        });
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> MessageDraft {
        MessageDraft {
            conversation_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            body: "hello".into(),
        }
    }

    #[test]
    fn send_lifecycle_pending_to_sent() {
        let ledger = DeliveryLedger::new();
        assert!(ledger.begin("c1", draft()));
        assert_eq!(ledger.state("c1"), Some(DeliveryState::Pending));

        ledger.mark_sent("c1", Uuid::new_v4());
        assert_eq!(ledger.state("c1"), Some(DeliveryState::Sent));
    }

    #[test]
    fn duplicate_begin_rejected_while_pending_or_sent() {
        let ledger = DeliveryLedger::new();
        assert!(ledger.begin("c1", draft()));
        assert!(!ledger.begin("c1", draft()));

        ledger.mark_sent("c1", Uuid::new_v4());
        assert!(!ledger.begin("c1", draft()));
    }

    #[test]
    fn failed_send_can_be_taken_for_resend_once() {
        let ledger = DeliveryLedger::new();
        assert!(ledger.begin("c1", draft()));
        ledger.mark_failed("c1");

        let taken = ledger.take_failed("c1");
        assert!(taken.is_some());
        assert_eq!(ledger.state("c1"), Some(DeliveryState::Pending));

        // Already back in flight; a second concurrent resend gets nothing.
        assert!(ledger.take_failed("c1").is_none());
    }

    #[test]
    fn take_failed_refuses_pending_and_sent() {
        let ledger = DeliveryLedger::new();
        assert!(ledger.begin("c1", draft()));
        assert!(ledger.take_failed("c1").is_none());

        ledger.mark_sent("c1", Uuid::new_v4());
        assert!(ledger.take_failed("c1").is_none());
        assert!(ledger.take_failed("unknown").is_none());
    }

    #[test]
    fn sweep_drops_settled_entries_and_frees_their_ids() {
        let ledger = DeliveryLedger::new();
        assert!(ledger.begin("delivered", draft()));
        ledger.mark_sent("delivered", Uuid::new_v4());
        assert!(ledger.begin("dead", draft()));
        ledger.mark_failed("dead");
        assert!(ledger.begin("inflight", draft()));

        // Nothing has aged past a real retention window yet.
        assert_eq!(ledger.evict_settled(Duration::from_secs(600)), 0);
        assert!(!ledger.begin("delivered", draft()));

        // Zero retention settles immediately; the in-flight send survives.
        assert_eq!(ledger.evict_settled(Duration::ZERO), 2);
        assert_eq!(ledger.state("delivered"), None);
        assert_eq!(ledger.state("dead"), None);
        assert_eq!(ledger.state("inflight"), Some(DeliveryState::Pending));

        // A reconciled correlation id can carry a fresh send again.
        assert!(ledger.begin("delivered", draft()));
    }

    #[test]
    fn failed_entry_can_be_rearmed_by_begin() {
        let ledger = DeliveryLedger::new();
        assert!(ledger.begin("c1", draft()));
        ledger.mark_failed("c1");

        // Client chose to submit again with the same id rather than resend.
        assert!(ledger.begin("c1", draft()));
        assert_eq!(ledger.state("c1"), Some(DeliveryState::Pending));
    }
}
