//! Entry point for originating surfaces

use payflow_metrics::MetricsCollector;
use payflow_queue::TaskQueue;
use payflow_store::{PaymentStore, StateTransition, StoreError};
use payflow_types::{
    Clock, FailureReason, IntentId, IntentStatus, NewPaymentIntent, PaymentIntent, TaskMessage,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{IntakeError, PipelineContext};

/// Creates, cancels and reports on payment intents
#[derive(Clone)]
pub struct PaymentIntake {
    store: Arc<dyn PaymentStore>,
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
}

impl PaymentIntake {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        queue: Arc<dyn TaskQueue>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            queue,
            clock,
            metrics,
        }
    }

    pub fn from_context(ctx: &PipelineContext) -> Self {
        Self::new(
            ctx.store.clone(),
            ctx.queue.clone(),
            ctx.clock.clone(),
            ctx.metrics.clone(),
        )
    }

    /// Record a `Pending` intent and enqueue its task.
    ///
    /// A reused idempotency key returns [`IntakeError::DuplicateIntent`]
    /// carrying the id of the intent created the first time. If that intent
    /// is still `Pending` its task is enqueued again, which the queue
    /// deduplicates.
    pub async fn create_payment_intent(
        &self,
        request: NewPaymentIntent,
    ) -> Result<IntentId, IntakeError> {
        validate_request(&request)?;

        let now = self.clock.now();
        let intent = match self.store.create(request, now).await {
            Ok(intent) => intent,
            Err(StoreError::DuplicateIntent {
                idempotency_key,
                existing_id,
            }) => {
                self.metrics.record_duplicate_intent();
                info!(
                    intent_id = %existing_id,
                    idempotency_key = %idempotency_key,
                    "Duplicate payment request"
                );
                if let Ok(Some(existing)) = self.store.get(&existing_id).await {
                    if existing.status == IntentStatus::Pending {
                        self.enqueue(&existing.id, now).await;
                    }
                }
                return Err(IntakeError::DuplicateIntent { existing_id });
            }
            Err(e) => return Err(e.into()),
        };

        self.metrics.record_intent_created();
        self.metrics.record_transition(IntentStatus::Pending);
        info!(
            intent_id = %intent.id,
            origin = %intent.origin,
            amount = %intent.requested_amount,
            token = %intent.token,
            "Payment intent created"
        );

        self.enqueue(&intent.id, now).await;
        Ok(intent.id)
    }

    /// Fail an intent on behalf of its owner.
    ///
    /// Refused with [`IntakeError::TooLateToCancel`] once submission may
    /// have started. The worker holding a `Claimed` intent notices on its
    /// next transition and drops the task.
    pub async fn cancel(&self, id: &str, reason: &str) -> Result<PaymentIntent, IntakeError> {
        let intent = self.store.cancel(id, reason, self.clock.now()).await?;

        self.metrics.record_transition(IntentStatus::Failed);
        self.metrics
            .record_failure(&FailureReason::Cancelled(reason.to_string()));
        info!(intent_id = %id, reason, "Payment intent cancelled");
        Ok(intent)
    }

    pub async fn status(&self, id: &str) -> Result<PaymentIntent, IntakeError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| IntakeError::NotFound(id.to_string()))
    }

    pub async fn history(&self, id: &str) -> Result<Vec<StateTransition>, IntakeError> {
        Ok(self.store.get_history(id).await?)
    }

    async fn enqueue(&self, id: &str, now: u64) {
        // The reaper re-enqueues stale Pending intents, so a lost enqueue only delays
        if let Err(e) = self.queue.enqueue(TaskMessage::new(id, now)).await {
            warn!(intent_id = %id, error = %e, "Failed to enqueue payment task");
        }
    }
}

fn validate_request(request: &NewPaymentIntent) -> Result<(), IntakeError> {
    let invalid = |msg: &str| Err(IntakeError::InvalidRequest(msg.to_string()));

    if request.idempotency_key.trim().is_empty() {
        return invalid("idempotency key is required");
    }
    if request.origin.trim().is_empty() {
        return invalid("origin is required");
    }
    if request.source_account.trim().is_empty() || request.destination_account.trim().is_empty()
    {
        return invalid("source and destination accounts are required");
    }
    if request.source_account == request.destination_account {
        return invalid("source and destination accounts must differ");
    }
    if request.token.trim().is_empty() {
        return invalid("token is required");
    }
    if request.requested_amount <= Decimal::ZERO {
        return invalid("requested amount must be positive");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use payflow_queue::InMemoryQueue;
    use payflow_store::InMemoryStore;
    use payflow_types::ManualClock;
    use rust_decimal_macros::dec;

    fn intake() -> (PaymentIntake, Arc<InMemoryStore>, Arc<InMemoryQueue>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new(clock.clone(), 5));
        let intake = PaymentIntake::new(
            store.clone(),
            queue.clone(),
            clock,
            Arc::new(MetricsCollector::new()),
        );
        (intake, store, queue)
    }

    fn request(key: &str) -> NewPaymentIntent {
        NewPaymentIntent::new(key, "chat:7", "acct-a", "acct-b", dec!(100), "APT")
    }

    #[tokio::test]
    async fn test_create_enqueues_task() {
        let (intake, store, queue) = intake();

        let id = intake.create_payment_intent(request("k1")).await.unwrap();

        let intent = store.get(&id).await.unwrap().unwrap();
        assert_eq!(intent.status, IntentStatus::Pending);
        assert_eq!(queue.pending_intents().await, vec![id]);
    }

    #[tokio::test]
    async fn test_duplicate_key_returns_existing_id() {
        let (intake, _store, queue) = intake();

        let id = intake.create_payment_intent(request("k1")).await.unwrap();
        let err = intake.create_payment_intent(request("k1")).await.unwrap_err();

        match err {
            IntakeError::DuplicateIntent { existing_id } => assert_eq!(existing_id, id),
            other => panic!("expected DuplicateIntent, got {other:?}"),
        }
        assert_eq!(queue.pending_intents().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_requests_rejected() {
        let (intake, _store, _queue) = intake();

        let mut zero = request("k1");
        zero.requested_amount = dec!(0);
        assert!(matches!(
            intake.create_payment_intent(zero).await,
            Err(IntakeError::InvalidRequest(_))
        ));

        let mut self_transfer = request("k2");
        self_transfer.destination_account = "acct-a".to_string();
        assert!(matches!(
            intake.create_payment_intent(self_transfer).await,
            Err(IntakeError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_pending_and_too_late() {
        let (intake, store, _queue) = intake();
        let now = 1_700_000_000;

        let id = intake.create_payment_intent(request("k1")).await.unwrap();
        let cancelled = intake.cancel(&id, "user request").await.unwrap();
        assert_eq!(cancelled.status, IntentStatus::Failed);
        assert_eq!(cancelled.last_error.as_deref(), Some("Cancelled: user request"));

        let id = intake.create_payment_intent(request("k2")).await.unwrap();
        store.claim(&id, "w1", 60, now).await.unwrap();
        store
            .transition(
                &id,
                payflow_store::Transition::new(IntentStatus::Claimed, IntentStatus::Submitting)
                    .by("w1"),
                now,
            )
            .await
            .unwrap();

        assert!(matches!(
            intake.cancel(&id, "user request").await,
            Err(IntakeError::TooLateToCancel {
                status: IntentStatus::Submitting
            })
        ));
    }

    #[tokio::test]
    async fn test_cancel_refused_after_unknown_submit_outcome() {
        let (intake, store, _queue) = intake();
        let now = 1_700_000_000;

        let id = intake.create_payment_intent(request("k1")).await.unwrap();
        store.claim(&id, "w1", 60, now).await.unwrap();
        // Back to Pending for a deferred retry; the ledger may hold the transfer
        store
            .transition(
                &id,
                payflow_store::Transition::new(IntentStatus::Claimed, IntentStatus::Pending)
                    .by("w1")
                    .with_submission_key(format!("{id}:0"))
                    .with_attempt_count(1),
                now,
            )
            .await
            .unwrap();

        assert!(matches!(
            intake.cancel(&id, "user request").await,
            Err(IntakeError::TooLateToCancel {
                status: IntentStatus::Pending
            })
        ));
        let intent = store.get(&id).await.unwrap().unwrap();
        assert_eq!(intent.status, IntentStatus::Pending);
        assert!(intent.submission_key.is_some());
    }

    #[tokio::test]
    async fn test_status_of_unknown_intent() {
        let (intake, _store, _queue) = intake();
        assert!(matches!(
            intake.status("missing").await,
            Err(IntakeError::NotFound(_))
        ));
    }
}
