use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use valise_db::Database;
use valise_db::models::{CandidateRow, now_millis};

use crate::error::NotifyError;
use crate::provider::{DispatchReceipt, EmailProvider, OutboundEmail};
use crate::templates;

pub const DEFAULT_BATCH_LIMIT: u32 = 100;

/// Bounded retry policy: after this many transient failures a candidate is
/// marked failed and never rescanned.
pub const MAX_DISPATCH_ATTEMPTS: i64 = 5;

/// Deadline on every provider call. A timeout is a transient failure.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Observability payload returned by one batch run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BatchSummary {
    pub candidates: usize,
    pub sent: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateOutcome {
    Sent,
    Skipped,
}

/// Offer lifecycle events that trigger a deduplicated email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferAction {
    Created,
    Accepted,
    Rejected,
}

impl OfferAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "offer-created",
            Self::Accepted => "offer-accepted",
            Self::Rejected => "offer-rejected",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Sent,
    Skipped,
}

/// Turns notification-worthy events into at-most-once external emails.
///
/// The first-message path cannot commit the message scan and the external
/// dispatch atomically, so it runs a claim/act/confirm-or-rollback protocol
/// against `conversations.first_message_notified_at`; the conditional write
/// is the only lock, which makes concurrent batch workers safe without
/// coordination.
pub struct NotifyEngine<P> {
    db: Arc<Database>,
    provider: P,
}

impl<P: EmailProvider> NotifyEngine<P> {
    pub fn new(db: Arc<Database>, provider: P) -> Self {
        Self { db, provider }
    }

    /// Scan for unsent first messages and drive each through the claim
    /// protocol. Safe to invoke concurrently and repeatedly; one bad
    /// candidate never aborts the batch.
    pub async fn run_first_message_batch(&self, limit: u32) -> anyhow::Result<BatchSummary> {
        let candidates = self.db.first_message_candidates(limit)?;

        let mut summary = BatchSummary {
            candidates: candidates.len(),
            ..Default::default()
        };

        for candidate in &candidates {
            match self.process_candidate(candidate).await {
                Ok(CandidateOutcome::Sent) => summary.sent += 1,
                Ok(CandidateOutcome::Skipped) => summary.skipped += 1,
                // Lost the claim to another worker: expected, not a failure.
                Err(NotifyError::Conflict) => summary.skipped += 1,
                Err(err) => {
                    summary.errors += 1;
                    warn!(
                        "First-message notification for message {} failed: {}",
                        candidate.message.id, err
                    );
                }
            }
        }

        Ok(summary)
    }

    async fn process_candidate(&self, candidate: &CandidateRow) -> Result<CandidateOutcome, NotifyError> {
        let conversation = &candidate.conversation;
        let message = &candidate.message;
        let claimed_at = now_millis();

        // Mutual-exclusion point: at most one worker proceeds per
        // conversation. The claim is reversible until the send confirms.
        if !self
            .db
            .claim_first_message_notification(&conversation.id, claimed_at)?
        {
            return Err(NotifyError::Conflict);
        }

        let email = match self.resolve_first_message_email(candidate)? {
            Some(email) => email,
            // "Decided not to send" is terminal success like "sent": the
            // claim stays so the decision is never revisited.
            None => {
                self.db.mark_notify_skipped(&message.id)?;
                return Ok(CandidateOutcome::Skipped);
            }
        };

        match self.dispatch(&email).await {
            Ok(receipt) => {
                self.db.confirm_first_message_sent(&message.id, now_millis())?;
                info!(
                    "First-message email sent for conversation {} (provider id {:?})",
                    conversation.id, receipt.provider_message_id
                );
                Ok(CandidateOutcome::Sent)
            }
            Err(err) if err.is_transient() => {
                // Roll the claim back so a later run retries, up to the
                // attempt bound.
                self.db
                    .release_first_message_claim(&conversation.id, claimed_at)?;
                let attempts = self.db.bump_notify_attempts(&message.id)?;
                if attempts >= MAX_DISPATCH_ATTEMPTS {
                    self.db.mark_notify_failed(&message.id)?;
                    warn!(
                        "Giving up on first-message email for message {} after {} attempts",
                        message.id, attempts
                    );
                }
                Err(err)
            }
            Err(err) => {
                self.db
                    .release_first_message_claim(&conversation.id, claimed_at)?;
                self.db.mark_notify_failed(&message.id)?;
                Err(err)
            }
        }
    }

    /// Resolve the receiving participant and their preferences. `None`
    /// means sending is impossible or declined — a terminal skip, never an
    /// error.
    fn resolve_first_message_email(
        &self,
        candidate: &CandidateRow,
    ) -> Result<Option<OutboundEmail>, NotifyError> {
        let conversation = &candidate.conversation;
        let message = &candidate.message;

        let Some(recipient_id) = conversation.peer_of(&message.sender_id) else {
            warn!(
                "Message {} sender is not a participant of conversation {}",
                message.id, conversation.id
            );
            return Ok(None);
        };

        let Some(recipient) = self.db.get_user(recipient_id)? else {
            return Ok(None);
        };
        if !recipient.notify_first_message {
            return Ok(None);
        }
        let Some(address) = recipient.email.as_deref() else {
            return Ok(None);
        };

        let sender_name = self
            .db
            .get_user(&message.sender_id)?
            .map(|u| u.display_name)
            .unwrap_or_else(|| "Someone".to_string());

        Ok(Some(templates::first_message_email(
            address,
            &recipient.id,
            &sender_name,
            conversation.source_title.as_deref(),
            &message.body,
            &conversation.id,
            &message.id,
        )))
    }

    /// Offer lifecycle emails reuse the generic dedupe-key gate: the
    /// inserted record *is* the send decision, so there is no rollback step.
    pub async fn send_offer_email(
        &self,
        action: OfferAction,
        offer_id: &str,
        offer_title: &str,
        recipient_id: &str,
    ) -> Result<ActionOutcome, NotifyError> {
        if offer_id.is_empty() {
            return Err(NotifyError::Validation("offer_id is required".into()));
        }

        let recipient = self
            .db
            .get_user(recipient_id)?
            .ok_or_else(|| NotifyError::NotFound(format!("user {recipient_id}")))?;
        if !recipient.notify_offer_activity {
            return Ok(ActionOutcome::Skipped);
        }
        let Some(address) = recipient.email.as_deref() else {
            return Ok(ActionOutcome::Skipped);
        };

        let dedupe_key = format!("{}:{}", action.as_str(), offer_id);
        if !self.db.try_insert_dedupe("offer", &dedupe_key, now_millis())? {
            return Ok(ActionOutcome::Skipped);
        }

        let email = templates::offer_action_email(
            address,
            &recipient.id,
            action.label(),
            offer_title,
            &dedupe_key,
        );
        self.dispatch(&email).await?;
        info!("Offer email {} dispatched to {}", dedupe_key, recipient.id);

        Ok(ActionOutcome::Sent)
    }

    /// Operational smoke test: bypasses candidate scanning entirely and
    /// sends one synthetic email.
    pub async fn send_test_email(&self, to: &str) -> Result<DispatchReceipt, NotifyError> {
        if to.is_empty() {
            return Err(NotifyError::Validation("recipient address is required".into()));
        }
        let email = templates::test_email(to, &format!("test:{}", Uuid::new_v4()));
        self.dispatch(&email).await
    }

    async fn dispatch(&self, email: &OutboundEmail) -> Result<DispatchReceipt, NotifyError> {
        match tokio::time::timeout(DISPATCH_TIMEOUT, self.provider.send(email)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::TransientDispatch(
                "dispatch deadline exceeded".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Controllable provider: fails the next `fail_transient` sends with a
    /// transient error, or everything permanently when `fail_permanent`.
    #[derive(Clone, Default)]
    struct FakeProvider {
        inner: Arc<FakeInner>,
    }

    #[derive(Default)]
    struct FakeInner {
        fail_transient: AtomicUsize,
        fail_permanent: std::sync::atomic::AtomicBool,
        sent: Mutex<Vec<OutboundEmail>>,
    }

    impl FakeProvider {
        fn sent(&self) -> Vec<OutboundEmail> {
            self.inner.sent.lock().unwrap().clone()
        }

        fn fail_next_transient(&self, n: usize) {
            self.inner.fail_transient.store(n, Ordering::SeqCst);
        }

        fn fail_permanently(&self) {
            self.inner.fail_permanent.store(true, Ordering::SeqCst);
        }
    }

    impl EmailProvider for FakeProvider {
        async fn send(&self, email: &OutboundEmail) -> Result<DispatchReceipt, NotifyError> {
            if self.inner.fail_permanent.load(Ordering::SeqCst) {
                return Err(NotifyError::PermanentDispatch("rejected by provider".into()));
            }
            let remaining = self.inner.fail_transient.load(Ordering::SeqCst);
            if remaining > 0 {
                self.inner.fail_transient.store(remaining - 1, Ordering::SeqCst);
                return Err(NotifyError::TransientDispatch("connection reset".into()));
            }
            self.inner.sent.lock().unwrap().push(email.clone());
            Ok(DispatchReceipt {
                provider_message_id: Some(format!("prov-{}", Uuid::new_v4())),
            })
        }
    }

    fn engine_with_fresh_first_message() -> (Arc<Database>, NotifyEngine<FakeProvider>, FakeProvider, String, String)
    {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.upsert_user("alice", "Alice", Some("alice@example.com"), true, true)
            .unwrap();
        db.upsert_user("bob", "Bob", Some("bob@example.com"), true, true)
            .unwrap();

        let conv = db.get_or_create_conversation("alice", "bob", None).unwrap();
        db.insert_message("m1", &conv.id, "alice", "Hi", "first", "pending", 1_000)
            .unwrap();

        let provider = FakeProvider::default();
        let engine = NotifyEngine::new(db.clone(), provider.clone());
        (db, engine, provider, conv.id, "m1".to_string())
    }

    #[tokio::test]
    async fn fresh_first_message_is_emailed_once_then_noop() {
        let (db, engine, provider, conv_id, msg_id) = engine_with_fresh_first_message();

        let summary = engine.run_first_message_batch(100).await.unwrap();
        assert_eq!(summary.candidates, 1);
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.errors, 0);

        let sent = provider.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "bob@example.com");
        assert_eq!(sent[0].dedupe_key, format!("first-message:{conv_id}:{msg_id}"));

        // Gate and confirmation moved together.
        let conv = db.get_conversation(&conv_id).unwrap().unwrap();
        assert!(conv.first_message_notified_at.is_some());
        let messages = db.get_messages(&conv_id, 10, None).unwrap();
        assert!(messages[0].email_notified_at.is_some());

        // Second run over the same data: zero candidates, zero dispatches.
        let again = engine.run_first_message_batch(100).await.unwrap();
        assert_eq!(again.candidates, 0);
        assert_eq!(again.sent, 0);
        assert_eq!(provider.sent().len(), 1);
    }

    #[tokio::test]
    async fn transient_failure_rolls_back_the_claim_and_retries() {
        let (db, engine, provider, conv_id, _) = engine_with_fresh_first_message();
        provider.fail_next_transient(1);

        let summary = engine.run_first_message_batch(100).await.unwrap();
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.sent, 0);

        // Claim was released so a later run can re-claim.
        let conv = db.get_conversation(&conv_id).unwrap().unwrap();
        assert!(conv.first_message_notified_at.is_none());

        let retry = engine.run_first_message_batch(100).await.unwrap();
        assert_eq!(retry.sent, 1);
        assert_eq!(provider.sent().len(), 1);
    }

    #[tokio::test]
    async fn permanent_failure_is_never_retried() {
        let (db, engine, provider, conv_id, _) = engine_with_fresh_first_message();
        provider.fail_permanently();

        let summary = engine.run_first_message_batch(100).await.unwrap();
        assert_eq!(summary.errors, 1);

        // Claim released but the candidate is marked failed, so it never
        // comes back.
        let conv = db.get_conversation(&conv_id).unwrap().unwrap();
        assert!(conv.first_message_notified_at.is_none());
        let again = engine.run_first_message_batch(100).await.unwrap();
        assert_eq!(again.candidates, 0);
        assert!(provider.sent().is_empty());
    }

    #[tokio::test]
    async fn retries_are_bounded_by_max_attempts() {
        let (_db, engine, provider, _, _) = engine_with_fresh_first_message();
        provider.fail_next_transient(usize::MAX);

        for _ in 0..MAX_DISPATCH_ATTEMPTS {
            let summary = engine.run_first_message_batch(100).await.unwrap();
            assert_eq!(summary.errors, 1);
        }

        // Attempt budget exhausted: the candidate is out of the scan.
        let after = engine.run_first_message_batch(100).await.unwrap();
        assert_eq!(after.candidates, 0);
        assert!(provider.sent().is_empty());
    }

    #[tokio::test]
    async fn opted_out_recipient_is_skipped_permanently() {
        let (db, engine, provider, conv_id, _) = engine_with_fresh_first_message();
        db.upsert_user("bob", "Bob", Some("bob@example.com"), false, true)
            .unwrap();

        let summary = engine.run_first_message_batch(100).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors, 0);
        assert!(provider.sent().is_empty());

        // The skip is terminal: the claim stays and no retry ever happens.
        let conv = db.get_conversation(&conv_id).unwrap().unwrap();
        assert!(conv.first_message_notified_at.is_some());
        let again = engine.run_first_message_batch(100).await.unwrap();
        assert_eq!(again.candidates, 0);
    }

    #[tokio::test]
    async fn recipient_without_address_is_skipped() {
        let (db, engine, provider, _, _) = engine_with_fresh_first_message();
        db.upsert_user("bob", "Bob", None, true, true).unwrap();

        let summary = engine.run_first_message_batch(100).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(provider.sent().is_empty());
    }

    #[tokio::test]
    async fn concurrent_batch_runs_send_exactly_once() {
        let (_db, engine, provider, _, _) = engine_with_fresh_first_message();
        let engine = Arc::new(engine);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.run_first_message_batch(100).await.unwrap()
            }));
        }

        let mut total_sent = 0;
        for handle in handles {
            total_sent += handle.await.unwrap().sent;
        }

        assert_eq!(total_sent, 1);
        assert_eq!(provider.sent().len(), 1);
    }

    #[tokio::test]
    async fn offer_emails_are_deduplicated_per_action_and_entity() {
        let (db, engine, provider, _, _) = engine_with_fresh_first_message();
        db.upsert_user("carol", "Carol", Some("carol@example.com"), true, true)
            .unwrap();

        let first = engine
            .send_offer_email(OfferAction::Accepted, "offer-1", "Tokyo run", "carol")
            .await
            .unwrap();
        assert_eq!(first, ActionOutcome::Sent);

        let second = engine
            .send_offer_email(OfferAction::Accepted, "offer-1", "Tokyo run", "carol")
            .await
            .unwrap();
        assert_eq!(second, ActionOutcome::Skipped);

        // A different lifecycle action on the same offer is a new key.
        let rejected = engine
            .send_offer_email(OfferAction::Rejected, "offer-1", "Tokyo run", "carol")
            .await
            .unwrap();
        assert_eq!(rejected, ActionOutcome::Sent);

        assert_eq!(provider.sent().len(), 2);
    }

    #[tokio::test]
    async fn offer_email_respects_preferences_and_missing_users() {
        let (db, engine, provider, _, _) = engine_with_fresh_first_message();
        db.upsert_user("dave", "Dave", Some("dave@example.com"), true, false)
            .unwrap();

        let skipped = engine
            .send_offer_email(OfferAction::Created, "offer-2", "Seoul run", "dave")
            .await
            .unwrap();
        assert_eq!(skipped, ActionOutcome::Skipped);
        assert!(provider.sent().is_empty());

        let missing = engine
            .send_offer_email(OfferAction::Created, "offer-2", "Seoul run", "nobody")
            .await;
        assert!(matches!(missing, Err(NotifyError::NotFound(_))));
    }

    #[tokio::test]
    async fn force_test_email_bypasses_scanning() {
        let (_db, engine, provider, _, _) = engine_with_fresh_first_message();

        let receipt = engine.send_test_email("ops@example.com").await.unwrap();
        assert!(receipt.provider_message_id.is_some());
        assert_eq!(provider.sent().len(), 1);
        assert_eq!(provider.sent()[0].category, "ops-test");

        assert!(matches!(
            engine.send_test_email("").await,
            Err(NotifyError::Validation(_))
        ));
    }
}
