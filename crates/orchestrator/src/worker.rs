//! Consumer worker: drives one intent at a time through its lifecycle.
//!
//! A worker owns nothing between tasks. Every step starts from the record in
//! the store and ends with a compare-and-swap on it, so whichever worker
//! holds the claim can pick up where a crashed one stopped:
//!
//! - `Claimed` with a `submission_key` means an earlier submission may have
//!   reached the ledger; the ledger is asked before anything is resubmitted.
//! - `Submitting` found after a restart is rolled back to `Claimed` and
//!   handled the same way.
//! - `Submitted` / `Confirming` only ever poll the recorded `chain_tx_ref`.

use payflow_calculator::{CalcError, Calculator, PricingError};
use payflow_ledger::{LedgerStatus, LedgerTransaction, SubmitError};
use payflow_metrics::{IntentSpan, SubmissionOutcome};
use payflow_queue::Delivery;
use payflow_store::{StoreError, Transition};
use payflow_types::{FailureReason, FeeBreakdown, IntentStatus, PaymentIntent};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

use crate::backoff::{delay_secs, ExponentialBackoff};
use crate::notify::deliver_outcome;
use crate::{PipelineContext, WorkerError};

/// Tuning of a worker; built from the `worker`, `queue`, `confirmation`
/// and `pricing` configuration sections
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub lease_secs: u64,
    pub visibility_timeout_secs: u64,
    pub max_submission_attempts: u32,
    pub retry_backoff_initial: Duration,
    pub retry_backoff_max: Duration,
    /// Bound on every ledger call
    pub ledger_timeout: Duration,
    pub confirmation_poll_interval: Duration,
    pub confirmation_max_poll_interval: Duration,
    /// Measured from `submitted_at`
    pub confirmation_deadline_secs: u64,
    pub freshness_window_secs: u64,
    pub max_pricing_refetches: u32,
    /// Wait on an empty queue before polling again
    pub idle_poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lease_secs: 60,
            visibility_timeout_secs: 90,
            max_submission_attempts: 5,
            retry_backoff_initial: Duration::from_millis(500),
            retry_backoff_max: Duration::from_secs(30),
            ledger_timeout: Duration::from_secs(10),
            confirmation_poll_interval: Duration::from_secs(1),
            confirmation_max_poll_interval: Duration::from_secs(15),
            confirmation_deadline_secs: 600,
            freshness_window_secs: 60,
            max_pricing_refetches: 2,
            idle_poll_interval: Duration::from_millis(500),
        }
    }
}

/// What happened to a delivered task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The intent is terminal and the task was acknowledged
    Finished(IntentStatus),
    /// The task was released to be delivered again later
    Deferred { delay_secs: u64 },
    /// Another holder took over; the task is left to its visibility timeout
    Abandoned,
    /// Shutdown interrupted processing; claim and task were handed back
    Interrupted,
    /// The task referenced no known intent and was acknowledged
    Dropped,
}

enum Step {
    Next(PaymentIntent),
    Deferred(u64),
    Interrupted(PaymentIntent),
}

enum Fees {
    Computed(FeeBreakdown),
    Rejected(FailureReason),
}

pub struct Worker {
    id: String,
    ctx: PipelineContext,
    config: WorkerConfig,
    calculator: Calculator,
    retry_backoff: ExponentialBackoff,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        ctx: PipelineContext,
        config: WorkerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let calculator = Calculator::new(config.freshness_window_secs);
        let retry_backoff =
            ExponentialBackoff::new(config.retry_backoff_initial, config.retry_backoff_max);
        Self {
            id: id.into(),
            ctx,
            config,
            calculator,
            retry_backoff,
            shutdown,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Pull loop; returns once shutdown is signalled
    pub async fn run(self) {
        self.ctx.metrics.worker_started();
        info!(worker_id = %self.id, "Worker started");

        while !*self.shutdown.borrow() {
            match self
                .ctx
                .queue
                .claim(&self.id, self.config.visibility_timeout_secs)
                .await
            {
                Ok(Some(delivery)) => {
                    let span = IntentSpan::new(delivery.message.intent_id.clone(), self.id.clone());
                    let outcome = self.process(&delivery).instrument(span.span()).await;
                    debug!(worker_id = %self.id, ?outcome, "Task processed");
                }
                Ok(None) => {
                    tokio::select! {
                        _ = self.ctx.queue.wait_for_work(self.config.idle_poll_interval) => {}
                        _ = wait_for_shutdown(self.shutdown.clone()) => {}
                    }
                }
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "Failed to claim from queue");
                    if self.pause(self.config.idle_poll_interval).await {
                        break;
                    }
                }
            }
        }

        self.ctx.metrics.worker_stopped();
        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Handle one delivery, turning errors into queue actions
    pub async fn process(&self, delivery: &Delivery) -> TaskOutcome {
        match self.handle_task(delivery).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_claim_lost() => {
                info!(
                    intent_id = %delivery.message.intent_id,
                    error = %e,
                    "Intent moved on without this worker"
                );
                TaskOutcome::Abandoned
            }
            Err(e) => {
                let delay = delay_secs(
                    self.retry_backoff
                        .delay_for(delivery.message.redelivery_count),
                );
                if e.is_transient() {
                    warn!(
                        intent_id = %delivery.message.intent_id,
                        error = %e,
                        delay_secs = delay,
                        "Transient failure, task will be retried"
                    );
                } else {
                    error!(
                        intent_id = %delivery.message.intent_id,
                        error = %e,
                        delay_secs = delay,
                        "Task failed, releasing for retry"
                    );
                }
                self.release(delivery, delay).await;
                TaskOutcome::Deferred { delay_secs: delay }
            }
        }
    }

    pub async fn handle_task(&self, delivery: &Delivery) -> Result<TaskOutcome, WorkerError> {
        let id = delivery.message.intent_id.as_str();

        let Some(current) = self.ctx.store.get(id).await? else {
            warn!(intent_id = %id, "Task references an unknown intent");
            self.ack(delivery).await;
            return Ok(TaskOutcome::Dropped);
        };

        if current.status.is_terminal() {
            return Ok(self.finish(&current, delivery).await);
        }

        let now = self.ctx.now();
        let mut intent = match self
            .ctx
            .store
            .claim(id, &self.id, self.config.lease_secs, now)
            .await
        {
            Ok(intent) => intent,
            Err(StoreError::ClaimConflict {
                owner, expires_at, ..
            }) => {
                self.ctx.metrics.record_claim_conflict();
                let delay = expires_at.saturating_sub(now).max(1);
                debug!(intent_id = %id, owner = %owner, delay_secs = delay, "Intent is held elsewhere");
                self.release(delivery, delay).await;
                return Ok(TaskOutcome::Deferred { delay_secs: delay });
            }
            Err(StoreError::AlreadyFinal { .. }) => {
                let Some(latest) = self.ctx.store.get(id).await? else {
                    self.ack(delivery).await;
                    return Ok(TaskOutcome::Dropped);
                };
                return Ok(self.finish(&latest, delivery).await);
            }
            Err(e) => return Err(e.into()),
        };

        if current.status == IntentStatus::Pending {
            self.ctx.metrics.record_transition(IntentStatus::Claimed);
        } else if current.is_claim_abandoned(now)
            && current.claim_owner.as_deref() != Some(self.id.as_str())
        {
            self.ctx.metrics.record_reclaim(current.status.is_broadcast());
            info!(
                intent_id = %id,
                previous_owner = ?current.claim_owner,
                status = %current.status,
                resumed_as = %intent.status,
                "Took over abandoned intent"
            );
        }

        loop {
            let step = match intent.status {
                IntentStatus::Claimed => self.advance_claimed(intent, delivery).await?,
                IntentStatus::Submitting => {
                    // Our own earlier run stopped mid-submission
                    Step::Next(
                        self.transition(
                            &intent,
                            Transition::new(IntentStatus::Submitting, IntentStatus::Claimed)
                                .by(&self.id)
                                .with_details("resuming interrupted submission"),
                        )
                        .await?,
                    )
                }
                IntentStatus::Submitted => Step::Next(
                    self.transition(
                        &intent,
                        Transition::new(IntentStatus::Submitted, IntentStatus::Confirming)
                            .by(&self.id),
                    )
                    .await?,
                ),
                IntentStatus::Confirming => self.advance_confirming(intent, delivery).await?,
                IntentStatus::Pending => {
                    // Claim was handed back between our claim and this step
                    return Ok(TaskOutcome::Abandoned);
                }
                IntentStatus::Confirmed | IntentStatus::Failed | IntentStatus::Expired => {
                    return Ok(self.finish(&intent, delivery).await);
                }
            };

            intent = match step {
                Step::Next(next) => next,
                Step::Deferred(delay) => {
                    self.release(delivery, delay).await;
                    return Ok(TaskOutcome::Deferred { delay_secs: delay });
                }
                Step::Interrupted(held) => {
                    self.hand_back(&held).await;
                    self.release(delivery, 0).await;
                    return Ok(TaskOutcome::Interrupted);
                }
            };
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SUBMISSION
    // ═══════════════════════════════════════════════════════════════════════

    async fn advance_claimed(
        &self,
        intent: PaymentIntent,
        delivery: &Delivery,
    ) -> Result<Step, WorkerError> {
        // An earlier attempt may have been broadcast without us hearing back
        if let Some(key) = intent.submission_key.as_deref() {
            if let Some(tx_ref) = self.lookup_submission(&intent, key).await? {
                return self.record_recovered(&intent, tx_ref).await.map(Step::Next);
            }
        }

        if intent.attempt_count >= self.config.max_submission_attempts {
            return self
                .fail(&intent, FailureReason::RetriesExhausted)
                .await
                .map(Step::Next);
        }

        // A kept key is resubmitted with the amounts it was first sent with
        let fees = match (intent.submission_key.is_some(), intent.fees) {
            (true, Some(fees)) => fees,
            _ => match self.compute_fees(&intent).await? {
                Fees::Computed(fees) => fees,
                Fees::Rejected(reason) => {
                    return self.fail(&intent, reason).await.map(Step::Next);
                }
            },
        };

        let key = intent
            .submission_key
            .clone()
            .unwrap_or_else(|| format!("{}:{}", intent.id, intent.attempt_count));
        let now = self.ctx.now();
        let submitting = self
            .transition(
                &intent,
                Transition::new(IntentStatus::Claimed, IntentStatus::Submitting)
                    .by(&self.id)
                    .with_fees(fees)
                    .with_submission_key(&key)
                    .extending_claim_to(now.saturating_add(self.config.lease_secs)),
            )
            .await?;
        self.extend(delivery).await;

        let tx = LedgerTransaction::for_intent(&submitting, &fees, &key);
        let started = Instant::now();
        let result =
            match tokio::time::timeout(self.config.ledger_timeout, self.ctx.ledger.submit(&tx))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(SubmitError::Unknown(format!(
                    "no answer within {:?}",
                    self.config.ledger_timeout
                ))),
            };
        let latency = started.elapsed();

        match result {
            Ok(tx_ref) => {
                self.ctx
                    .metrics
                    .record_submission(SubmissionOutcome::Accepted, latency);
                info!(
                    intent_id = %submitting.id,
                    tx_ref = %tx_ref,
                    transfer_amount = %fees.transfer_amount,
                    "Transaction broadcast"
                );
                self.transition(
                    &submitting,
                    Transition::new(IntentStatus::Submitting, IntentStatus::Submitted)
                        .by(&self.id)
                        .with_tx_ref(tx_ref),
                )
                .await
                .map(Step::Next)
            }
            Err(SubmitError::Terminal(detail)) => {
                self.ctx
                    .metrics
                    .record_submission(SubmissionOutcome::Rejected, latency);
                self.fail(&submitting, FailureReason::LedgerRejected(detail))
                    .await
                    .map(Step::Next)
            }
            Err(SubmitError::Retryable(detail)) => {
                self.ctx
                    .metrics
                    .record_submission(SubmissionOutcome::Retryable, latency);
                let attempts = submitting.attempt_count.saturating_add(1);
                warn!(
                    intent_id = %submitting.id,
                    attempt = attempts,
                    error = %detail,
                    "Submission failed before reaching the ledger"
                );
                let claimed = self
                    .transition(
                        &submitting,
                        Transition::new(IntentStatus::Submitting, IntentStatus::Claimed)
                            .by(&self.id)
                            .with_attempt_count(attempts)
                            .clearing_submission_key()
                            .with_error(detail),
                    )
                    .await?;
                self.wait_before_retry(claimed, delivery).await
            }
            Err(SubmitError::Unknown(detail)) => {
                self.ctx
                    .metrics
                    .record_submission(SubmissionOutcome::Unknown, latency);
                let attempts = submitting.attempt_count.saturating_add(1);
                warn!(
                    intent_id = %submitting.id,
                    attempt = attempts,
                    submission_key = %key,
                    error = %detail,
                    "Submission outcome unknown, ledger will be checked before retrying"
                );
                // Keep the key so the next pass looks it up first
                let claimed = self
                    .transition(
                        &submitting,
                        Transition::new(IntentStatus::Submitting, IntentStatus::Claimed)
                            .by(&self.id)
                            .with_attempt_count(attempts)
                            .with_error(detail),
                    )
                    .await?;
                self.wait_before_retry(claimed, delivery).await
            }
        }
    }

    async fn lookup_submission(
        &self,
        intent: &PaymentIntent,
        key: &str,
    ) -> Result<Option<String>, WorkerError> {
        let started = Instant::now();
        let found = tokio::time::timeout(
            self.config.ledger_timeout,
            self.ctx
                .ledger
                .find_by_client_ref(&intent.source_account, key),
        )
        .await
        .map_err(|_| {
            payflow_ledger::LedgerError::Timeout(format!("lookup of submission {key}"))
        })??;
        self.ctx.metrics.record_status_poll(started.elapsed());
        Ok(found)
    }

    async fn record_recovered(
        &self,
        intent: &PaymentIntent,
        tx_ref: String,
    ) -> Result<PaymentIntent, WorkerError> {
        self.ctx
            .metrics
            .record_submission(SubmissionOutcome::Recovered, Duration::ZERO);
        info!(
            intent_id = %intent.id,
            tx_ref = %tx_ref,
            "Earlier submission found on the ledger, not resubmitting"
        );

        let submitting = self
            .transition(
                intent,
                Transition::new(IntentStatus::Claimed, IntentStatus::Submitting)
                    .by(&self.id)
                    .with_details("earlier submission found on the ledger"),
            )
            .await?;
        self.transition(
            &submitting,
            Transition::new(IntentStatus::Submitting, IntentStatus::Submitted)
                .by(&self.id)
                .with_tx_ref(tx_ref),
        )
        .await
    }

    /// Back off before the next submission attempt while keeping the claim.
    ///
    /// Delays too long to sit out under the lease hand the intent back to
    /// `Pending` and release the task with that delay instead.
    async fn wait_before_retry(
        &self,
        claimed: PaymentIntent,
        delivery: &Delivery,
    ) -> Result<Step, WorkerError> {
        if claimed.attempt_count >= self.config.max_submission_attempts {
            return Ok(Step::Next(claimed));
        }

        let delay = self
            .retry_backoff
            .delay_for(claimed.attempt_count.saturating_sub(1));

        if delay.as_secs() >= self.config.lease_secs / 2 {
            self.transition(
                &claimed,
                Transition::new(IntentStatus::Claimed, IntentStatus::Pending)
                    .by(&self.id)
                    .with_details("retry deferred"),
            )
            .await?;
            return Ok(Step::Deferred(delay_secs(delay)));
        }

        let renewed = self
            .ctx
            .store
            .renew(&claimed.id, &self.id, self.config.lease_secs, self.ctx.now())
            .await?;
        self.extend(delivery).await;

        if self.pause(delay).await {
            return Ok(Step::Interrupted(renewed));
        }
        Ok(Step::Next(renewed))
    }

    async fn compute_fees(&self, intent: &PaymentIntent) -> Result<Fees, WorkerError> {
        let mut refetches = 0;
        loop {
            let snapshot = match self.ctx.pricing.snapshot(&intent.token).await {
                Ok(snapshot) => snapshot,
                Err(PricingError::UnknownToken(token)) => {
                    return Ok(Fees::Rejected(FailureReason::UnsupportedToken(token)));
                }
                Err(e) => return Err(WorkerError::Pricing(e)),
            };

            match self.calculator.compute(intent, &snapshot, self.ctx.now()) {
                Ok(fees) => return Ok(Fees::Computed(fees)),
                Err(e) if e.needs_refetch() && refetches < self.config.max_pricing_refetches => {
                    refetches += 1;
                    debug!(intent_id = %intent.id, error = %e, refetches, "Fetching fresh pricing");
                }
                Err(e) => {
                    warn!(intent_id = %intent.id, error = %e, "Fee calculation rejected payment");
                    let reason = match e {
                        CalcError::StalePricing { .. } => FailureReason::StalePricing,
                        CalcError::InsufficientAmount { .. } | CalcError::NonPositiveAmount(_) => {
                            FailureReason::InsufficientAmount
                        }
                        CalcError::AmountOutOfRange(_) => FailureReason::AmountOutOfRange,
                        CalcError::TokenMismatch { .. } => {
                            FailureReason::UnsupportedToken(intent.token.clone())
                        }
                    };
                    return Ok(Fees::Rejected(reason));
                }
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // CONFIRMATION
    // ═══════════════════════════════════════════════════════════════════════

    async fn advance_confirming(
        &self,
        intent: PaymentIntent,
        delivery: &Delivery,
    ) -> Result<Step, WorkerError> {
        let tx_ref = intent
            .chain_tx_ref
            .clone()
            .ok_or_else(|| WorkerError::MissingTxRef(intent.id.clone()))?;
        let mut backoff = ExponentialBackoff::new(
            self.config.confirmation_poll_interval,
            self.config.confirmation_max_poll_interval,
        );
        let mut current = intent;

        loop {
            let started = Instant::now();
            let status = match tokio::time::timeout(
                self.config.ledger_timeout,
                self.ctx.ledger.poll_status(&tx_ref),
            )
            .await
            {
                Ok(Ok(status)) => Some(status),
                Ok(Err(e)) => {
                    warn!(intent_id = %current.id, tx_ref = %tx_ref, error = %e, "Status poll failed");
                    None
                }
                Err(_) => {
                    warn!(intent_id = %current.id, tx_ref = %tx_ref, "Status poll timed out");
                    None
                }
            };
            self.ctx.metrics.record_status_poll(started.elapsed());
            let now = self.ctx.now();

            match status {
                Some(LedgerStatus::Confirmed) => {
                    let confirmed = self
                        .transition(
                            &current,
                            Transition::new(IntentStatus::Confirming, IntentStatus::Confirmed)
                                .by(&self.id),
                        )
                        .await?;
                    if let Some(submitted_at) = confirmed.submitted_at {
                        self.ctx
                            .metrics
                            .record_confirmation_latency(now.saturating_sub(submitted_at));
                    }
                    info!(intent_id = %confirmed.id, tx_ref = %tx_ref, "Payment confirmed");
                    return Ok(Step::Next(confirmed));
                }
                Some(LedgerStatus::Rejected(detail)) => {
                    return self
                        .fail(&current, FailureReason::LedgerRejected(detail))
                        .await
                        .map(Step::Next);
                }
                Some(LedgerStatus::Pending) | None => {}
            }

            let submitted_at = current.submitted_at.unwrap_or(current.updated_at);
            if now.saturating_sub(submitted_at) >= self.config.confirmation_deadline_secs {
                return self
                    .fail(&current, FailureReason::ConfirmationDeadline)
                    .await
                    .map(Step::Next);
            }

            current = self
                .transition(
                    &current,
                    Transition::new(IntentStatus::Confirming, IntentStatus::Confirming)
                        .by(&self.id)
                        .extending_claim_to(now.saturating_add(self.config.lease_secs)),
                )
                .await?;
            self.extend(delivery).await;

            if self.pause(backoff.next_delay()).await {
                return Ok(Step::Interrupted(current));
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // HELPERS
    // ═══════════════════════════════════════════════════════════════════════

    async fn transition(
        &self,
        intent: &PaymentIntent,
        transition: Transition,
    ) -> Result<PaymentIntent, WorkerError> {
        let changes_status = transition.expected != transition.next;
        let next = transition.next;
        let updated = self
            .ctx
            .store
            .transition(&intent.id, transition, self.ctx.now())
            .await?;
        if changes_status {
            self.ctx.metrics.record_transition(next);
            debug!(intent_id = %intent.id, from = %intent.status, to = %next, "Transition applied");
        }
        Ok(updated)
    }

    async fn fail(
        &self,
        intent: &PaymentIntent,
        reason: FailureReason,
    ) -> Result<PaymentIntent, WorkerError> {
        let failed = self
            .transition(
                intent,
                Transition::new(intent.status, IntentStatus::Failed)
                    .by(&self.id)
                    .with_failure(&reason),
            )
            .await?;
        self.ctx.metrics.record_failure(&reason);

        if reason.needs_operator() {
            error!(
                intent_id = %failed.id,
                reason = %reason,
                attempts = failed.attempt_count,
                chain_tx_ref = ?failed.chain_tx_ref,
                "Payment failed and needs operator attention"
            );
        } else {
            warn!(intent_id = %failed.id, reason = %reason, "Payment failed");
        }
        Ok(failed)
    }

    async fn finish(&self, intent: &PaymentIntent, delivery: &Delivery) -> TaskOutcome {
        deliver_outcome(&self.ctx, intent).await;
        self.ack(delivery).await;
        TaskOutcome::Finished(intent.status)
    }

    /// Give up a claim on shutdown so the next worker does not wait for the lease
    async fn hand_back(&self, intent: &PaymentIntent) {
        let now = self.ctx.now();
        let result = if intent.status == IntentStatus::Claimed {
            self.ctx
                .store
                .transition(
                    &intent.id,
                    Transition::new(IntentStatus::Claimed, IntentStatus::Pending)
                        .by(&self.id)
                        .with_details("worker shutting down"),
                    now,
                )
                .await
        } else {
            // Broadcast intents never go back to Pending; let the lease lapse now
            self.ctx.store.renew(&intent.id, &self.id, 0, now).await
        };

        if let Err(e) = result {
            warn!(intent_id = %intent.id, error = %e, "Failed to hand back claim");
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.ctx.queue.ack(delivery).await {
            warn!(intent_id = %delivery.message.intent_id, error = %e, "Failed to acknowledge task");
        }
    }

    async fn release(&self, delivery: &Delivery, delay_secs: u64) {
        if let Err(e) = self.ctx.queue.release(delivery, delay_secs).await {
            warn!(intent_id = %delivery.message.intent_id, error = %e, "Failed to release task");
        }
    }

    async fn extend(&self, delivery: &Delivery) {
        if let Err(e) = self
            .ctx
            .queue
            .extend(delivery, self.config.visibility_timeout_secs)
            .await
        {
            warn!(intent_id = %delivery.message.intent_id, error = %e, "Failed to extend task visibility");
        }
    }

    /// Sleep for `delay`; returns `true` if shutdown was signalled instead
    async fn pause(&self, delay: Duration) -> bool {
        if *self.shutdown.borrow() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = wait_for_shutdown(self.shutdown.clone()) => true,
        }
    }
}

/// Resolves once `true` is sent; never resolves if the sender is gone
pub(crate) async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
