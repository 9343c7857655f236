//! Periodic safety net over the store.
//!
//! Claim expiry itself is decided inside `claim`; the reaper only makes sure
//! that intents whose task went missing get a task again:
//!
//! - claimed intents whose lease ran out are re-enqueued
//! - `Pending` intents untouched for a while are re-enqueued, or expired
//!   once past their time-to-live; an intent handed back after an unknown
//!   submit outcome is never expired here, its worker asks the ledger first
//! - terminal intents whose outcome was never delivered are notified

use payflow_store::{StoreError, Transition};
use payflow_types::{FailureReason, IntentStatus, TaskMessage};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::notify::deliver_outcome;
use crate::worker::wait_for_shutdown;
use crate::PipelineContext;

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub interval: Duration,
    pub batch_size: usize,
    /// Pending intents untouched this long get a fresh task
    pub stale_pending_secs: u64,
    /// Pending intents older than this expire
    pub intent_ttl_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            batch_size: 100,
            stale_pending_secs: 120,
            intent_ttl_secs: 86_400,
        }
    }
}

/// Counts of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub reclaimable: usize,
    pub requeued_pending: usize,
    pub expired: usize,
    pub notified: usize,
}

pub struct Reaper {
    ctx: PipelineContext,
    config: ReaperConfig,
}

impl Reaper {
    pub fn new(ctx: PipelineContext, config: ReaperConfig) -> Self {
        Self { ctx, config }
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval = ?self.config.interval, "Reaper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wait_for_shutdown(shutdown.clone()) => break,
            }

            match self.sweep().await {
                Ok(report) if report != SweepReport::default() => {
                    info!(?report, "Reaper sweep");
                }
                Ok(_) => debug!("Reaper sweep found nothing"),
                Err(e) => warn!(error = %e, "Reaper sweep failed"),
            }
        }

        info!("Reaper stopped");
    }

    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let now = self.ctx.now();
        let mut report = SweepReport::default();

        for intent in self
            .ctx
            .store
            .list_due_for_reclaim(now, self.config.batch_size)
            .await?
        {
            if self.enqueue(&intent.id, now).await {
                report.reclaimable += 1;
            }
        }

        let updated_before = now.saturating_sub(self.config.stale_pending_secs);
        for intent in self
            .ctx
            .store
            .list_stale_pending(updated_before, self.config.batch_size)
            .await?
        {
            if intent.may_be_broadcast()
                || now.saturating_sub(intent.created_at) < self.config.intent_ttl_secs
            {
                if self.enqueue(&intent.id, now).await {
                    report.requeued_pending += 1;
                }
                continue;
            }

            let expired = match self
                .ctx
                .store
                .transition(
                    &intent.id,
                    Transition::new(IntentStatus::Pending, IntentStatus::Expired)
                        .with_failure(&FailureReason::Expired),
                    now,
                )
                .await
            {
                Ok(expired) => expired,
                // Claimed or cancelled since it was listed
                Err(StoreError::StaleTransition { .. }) => continue,
                // Handed back with an unresolved submission; requeued next sweep
                Err(StoreError::InvalidTransition { .. }) => continue,
                Err(e) => return Err(e),
            };
            self.ctx.metrics.record_transition(IntentStatus::Expired);
            self.ctx.metrics.record_failure(&FailureReason::Expired);
            info!(intent_id = %expired.id, created_at = expired.created_at, "Payment intent expired");
            report.expired += 1;

            if deliver_outcome(&self.ctx, &expired).await {
                report.notified += 1;
            }
        }

        for intent in self
            .ctx
            .store
            .list_unnotified(self.config.batch_size)
            .await?
        {
            if deliver_outcome(&self.ctx, &intent).await {
                report.notified += 1;
            }
        }

        match self.ctx.queue.depth().await {
            Ok(depth) => {
                self.ctx
                    .metrics
                    .set_queue_depth(depth.visible, depth.in_flight, depth.dead)
            }
            Err(e) => warn!(error = %e, "Failed to read queue depth"),
        }

        Ok(report)
    }

    /// `true` if a new task was queued; live duplicates are ignored by the queue
    async fn enqueue(&self, id: &str, now: u64) -> bool {
        match self.ctx.queue.enqueue(TaskMessage::new(id, now)).await {
            Ok(queued) => queued,
            Err(e) => {
                warn!(intent_id = %id, error = %e, "Failed to re-enqueue intent");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{Harness, T0};
    use payflow_queue::TaskQueue;
    use payflow_store::PaymentStore;
    use payflow_types::{NewPaymentIntent, TerminalStatus};
    use rust_decimal_macros::dec;

    fn reaper(h: &Harness) -> Reaper {
        Reaper::new(
            h.ctx.clone(),
            ReaperConfig {
                interval: Duration::from_millis(10),
                batch_size: 10,
                stale_pending_secs: 120,
                intent_ttl_secs: 3_600,
            },
        )
    }

    #[tokio::test]
    async fn test_requeues_pending_intent_without_task() {
        let h = Harness::new().await;
        // Created but the enqueue never happened
        let intent = h
            .store
            .create(
                NewPaymentIntent::new("k1", "chat:1", "acct-a", "acct-b", dec!(100), "APT"),
                T0,
            )
            .await
            .unwrap();

        assert_eq!(reaper(&h).sweep().await.unwrap().requeued_pending, 0);

        h.clock.advance(121);
        let report = reaper(&h).sweep().await.unwrap();
        assert_eq!(report.requeued_pending, 1);
        assert_eq!(h.queue.pending_intents().await, vec![intent.id]);
    }

    #[tokio::test]
    async fn test_requeues_abandoned_claim_once() {
        let h = Harness::new().await;
        let intent = h.create("k1", dec!(100)).await;
        let delivery = h.next_delivery("w1").await;
        h.store.claim(&intent.id, "w1", 60, T0).await.unwrap();
        // The worker died after taking the task; the task was lost with it
        h.queue.ack(&delivery).await.unwrap();

        h.clock.advance(61);
        let r = reaper(&h);
        assert_eq!(r.sweep().await.unwrap().reclaimable, 1);
        // Already queued: nothing new
        assert_eq!(r.sweep().await.unwrap().reclaimable, 0);
    }

    #[tokio::test]
    async fn test_expires_old_pending_intents() {
        let h = Harness::new().await;
        let intent = h.create("k1", dec!(100)).await;

        h.clock.advance(3_601);
        let report = reaper(&h).sweep().await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.notified, 1);

        let intent = h.store.get(&intent.id).await.unwrap().unwrap();
        assert_eq!(intent.status, IntentStatus::Expired);
        assert_eq!(intent.last_error.as_deref(), Some("Expired"));

        let events = h.notifier.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, TerminalStatus::Failed);
        assert_eq!(events[0].reason.as_deref(), Some("Expired"));
    }

    #[tokio::test]
    async fn test_unresolved_submission_is_requeued_not_expired() {
        let h = Harness::new().await;
        let intent = h.create("k1", dec!(100)).await;
        let delivery = h.next_delivery("w1").await;
        h.queue.ack(&delivery).await.unwrap();

        // Handed back after an unknown submit outcome, key kept
        h.store.claim(&intent.id, "w1", 60, T0).await.unwrap();
        h.store
            .transition(
                &intent.id,
                Transition::new(IntentStatus::Claimed, IntentStatus::Pending)
                    .by("w1")
                    .with_submission_key(format!("{}:0", intent.id))
                    .with_attempt_count(1),
                T0,
            )
            .await
            .unwrap();

        h.clock.advance(3_601);
        let report = reaper(&h).sweep().await.unwrap();
        assert_eq!(report.expired, 0);
        assert_eq!(report.requeued_pending, 1);

        let stored = h.store.get(&intent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, IntentStatus::Pending);
        assert!(h.notifier.events().is_empty());
        assert_eq!(h.queue.pending_intents().await, vec![intent.id]);
    }

    #[tokio::test]
    async fn test_redelivers_failed_notifications() {
        let h = Harness::new().await;
        let intent = h.create("k1", dec!(100)).await;
        h.notifier.fail_next(1);

        let delivery = h.next_delivery("w1").await;
        h.worker("w1").process(&delivery).await;
        assert!(h.notifier.events().is_empty());
        assert!(h
            .store
            .get(&intent.id)
            .await
            .unwrap()
            .unwrap()
            .notified_at
            .is_none());

        let report = reaper(&h).sweep().await.unwrap();
        assert_eq!(report.notified, 1);
        assert_eq!(h.notifier.events().len(), 1);

        // Delivered once recorded
        assert_eq!(reaper(&h).sweep().await.unwrap().notified, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = Harness::new().await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(reaper(&h).run(rx));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
