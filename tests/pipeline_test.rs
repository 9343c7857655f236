use payflow::calculator::{StaticPricing, TokenFees};
use payflow::ledger::{LedgerClient, LedgerTransaction, SimulatedLedger, SubmitOutcome};
use payflow::metrics::MetricsCollector;
use payflow::orchestrator::{
    IntakeError, PaymentIntake, PipelineContext, RecordingNotifier, Scheduler, SchedulerConfig,
    TaskOutcome, Worker, WorkerConfig, WorkerPool,
};
use payflow::queue::{InMemoryQueue, SqliteQueue, TaskQueue};
use payflow::store::{DefinitionStore, InMemoryStore, PaymentStore, SqliteStore, Transition};
use payflow::types::{
    AmountSpec, Cadence, FeeBreakdown, IntentStatus, ManualClock, NewPaymentIntent,
    RecurringDefinition, TerminalStatus,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const T0: u64 = 1_700_000_000;

// ═══════════════════════════════════════════════════════════════════════════
// PIPELINE FIXTURE
// ═══════════════════════════════════════════════════════════════════════════

struct Pipeline {
    clock: Arc<ManualClock>,
    store: Arc<dyn PaymentStore>,
    queue: Arc<dyn TaskQueue>,
    ledger: Arc<SimulatedLedger>,
    notifier: Arc<RecordingNotifier>,
    ctx: PipelineContext,
    intake: PaymentIntake,
}

impl Pipeline {
    fn in_memory(ledger: SimulatedLedger) -> Self {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new(clock.clone(), 5));
        Self::assemble(clock, store, queue, ledger)
    }

    async fn sqlite(dir: &tempfile::TempDir, ledger: SimulatedLedger) -> Self {
        let clock = Arc::new(ManualClock::new(T0));
        let store = SqliteStore::new(dir.path().join("payflow.db")).await.unwrap();
        let queue = SqliteQueue::new(store.pool().clone(), clock.clone(), 5)
            .await
            .unwrap();
        Self::assemble(clock, Arc::new(store), Arc::new(queue), ledger)
    }

    fn assemble(
        clock: Arc<ManualClock>,
        store: Arc<dyn PaymentStore>,
        queue: Arc<dyn TaskQueue>,
        ledger: SimulatedLedger,
    ) -> Self {
        let ledger = Arc::new(ledger);
        let notifier = Arc::new(RecordingNotifier::new());
        let pricing = StaticPricing::new(clock.clone()).with_token(
            "APT",
            TokenFees {
                network_fee: dec!(2),
                platform_fee_bps: 0,
                min_transfer_unit: dec!(0.01),
                decimals: 8,
            },
        );

        let ctx = PipelineContext {
            store: store.clone(),
            queue: queue.clone(),
            ledger: ledger.clone(),
            pricing: Arc::new(pricing),
            notifier: notifier.clone(),
            clock: clock.clone(),
            metrics: Arc::new(MetricsCollector::new()),
        };
        let intake = PaymentIntake::from_context(&ctx);

        Self {
            clock,
            store,
            queue,
            ledger,
            notifier,
            ctx,
            intake,
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig {
            max_submission_attempts: 3,
            retry_backoff_initial: Duration::from_millis(1),
            retry_backoff_max: Duration::from_millis(4),
            ledger_timeout: Duration::from_secs(1),
            confirmation_poll_interval: Duration::from_millis(1),
            confirmation_max_poll_interval: Duration::from_millis(2),
            idle_poll_interval: Duration::from_millis(5),
            ..WorkerConfig::default()
        }
    }

    fn worker(&self, id: &str) -> Worker {
        let (_tx, rx) = watch::channel(false);
        Worker::new(id, self.ctx.clone(), Self::config(), rx)
    }

    async fn pay(&self, key: &str, amount: rust_decimal::Decimal) -> String {
        self.intake
            .create_payment_intent(NewPaymentIntent::new(
                key, "chat:42", "acct-a", "acct-b", amount, "APT",
            ))
            .await
            .unwrap()
    }

    async fn run_next(&self, worker_id: &str) -> TaskOutcome {
        let delivery = self
            .queue
            .claim(worker_id, Self::config().visibility_timeout_secs)
            .await
            .unwrap()
            .expect("a visible task");
        self.worker(worker_id).process(&delivery).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// END-TO-END
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_hundred_requested_ninety_eight_delivered() {
    let p = Pipeline::in_memory(SimulatedLedger::new().with_pending_polls(3));
    let id = p.pay("invoice-1", dec!(100)).await;

    let (tx, rx) = watch::channel(false);
    let pool = WorkerPool::new(p.ctx.clone(), Pipeline::config(), 2, "node").spawn(rx);

    let settled = async {
        loop {
            let intent = p.store.get(&id).await.unwrap().unwrap();
            if intent.status.is_terminal() && intent.notified_at.is_some() {
                return intent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    let intent = tokio::time::timeout(Duration::from_secs(10), settled)
        .await
        .expect("intent did not settle");
    tx.send(true).unwrap();
    pool.join().await;

    assert_eq!(intent.status, IntentStatus::Confirmed);
    assert_eq!(intent.fees.unwrap().transfer_amount, dec!(98));
    assert!(intent.chain_tx_ref.is_some());

    let events = p.notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].intent_id, id);
    assert_eq!(events[0].status, TerminalStatus::Confirmed);
    assert_eq!(events[0].chain_tx_ref, intent.chain_tx_ref);
}

#[tokio::test]
async fn test_duplicate_request_returns_first_intent() {
    let p = Pipeline::in_memory(SimulatedLedger::new());
    let id = p.pay("invoice-1", dec!(100)).await;

    let again = p
        .intake
        .create_payment_intent(NewPaymentIntent::new(
            "invoice-1", "chat:42", "acct-a", "acct-b", dec!(100), "APT",
        ))
        .await;
    match again {
        Err(IntakeError::DuplicateIntent { existing_id }) => assert_eq!(existing_id, id),
        other => panic!("expected DuplicateIntent, got {other:?}"),
    }

    assert_eq!(
        p.store
            .list_by_status(IntentStatus::Pending, 10)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_retryable_failures_exhaust_attempts() {
    let p = Pipeline::in_memory(SimulatedLedger::new());
    p.ledger
        .script_submits((0..3).map(|_| SubmitOutcome::Retryable("503".to_string())))
        .await;
    let id = p.pay("invoice-1", dec!(100)).await;

    assert_eq!(
        p.run_next("w1").await,
        TaskOutcome::Finished(IntentStatus::Failed)
    );

    let intent = p.store.get(&id).await.unwrap().unwrap();
    assert_eq!(intent.last_error.as_deref(), Some("RetriesExhausted"));
    assert!(intent.chain_tx_ref.is_none());
    assert_eq!(p.ledger.broadcast_count().await, 0);
    assert_eq!(p.notifier.events()[0].status, TerminalStatus::Failed);
}

// ═══════════════════════════════════════════════════════════════════════════
// CRASH RECOVERY (durable backends)
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_worker_crash_after_broadcast_resumes_by_polling() {
    let dir = tempfile::tempdir().unwrap();
    let p = Pipeline::sqlite(&dir, SimulatedLedger::new().with_pending_polls(1)).await;
    let id = p.pay("invoice-1", dec!(100)).await;

    // First worker takes the task, broadcasts, then dies before polling
    let lost = p.queue.claim("w1", 90).await.unwrap().unwrap();
    assert_eq!(lost.message.intent_id, id);
    p.store.claim(&id, "w1", 60, T0).await.unwrap();
    let fees = FeeBreakdown {
        transfer_amount: dec!(98),
        network_fee: dec!(2),
        platform_fee: dec!(0),
    };
    let key = format!("{id}:0");
    let submitting = p
        .store
        .transition(
            &id,
            Transition::new(IntentStatus::Claimed, IntentStatus::Submitting)
                .by("w1")
                .with_fees(fees)
                .with_submission_key(&key),
            T0,
        )
        .await
        .unwrap();
    let tx_ref = p
        .ledger
        .submit(&LedgerTransaction::for_intent(&submitting, &fees, &key))
        .await
        .unwrap();
    p.store
        .transition(
            &id,
            Transition::new(IntentStatus::Submitting, IntentStatus::Submitted)
                .by("w1")
                .with_tx_ref(&tx_ref),
            T0,
        )
        .await
        .unwrap();

    // Both the claim and the task's visibility run out
    p.clock.advance(91);

    let delivery = p.queue.claim("w2", 90).await.unwrap().unwrap();
    assert!(delivery.message.is_redelivery());
    assert_eq!(
        p.worker("w2").process(&delivery).await,
        TaskOutcome::Finished(IntentStatus::Confirmed)
    );

    let intent = p.store.get(&id).await.unwrap().unwrap();
    assert_eq!(intent.chain_tx_ref.as_deref(), Some(tx_ref.as_str()));
    assert_eq!(p.ledger.submit_calls().await, 1);
    assert_eq!(p.notifier.events().len(), 1);
    assert_eq!(p.queue.depth().await.unwrap().in_flight, 0);
}

#[tokio::test]
async fn test_sqlite_pipeline_confirms() {
    let dir = tempfile::tempdir().unwrap();
    let p = Pipeline::sqlite(&dir, SimulatedLedger::new()).await;
    let id = p.pay("invoice-1", dec!(50)).await;

    assert_eq!(
        p.run_next("w1").await,
        TaskOutcome::Finished(IntentStatus::Confirmed)
    );
    let history = p.store.get_history(&id).await.unwrap();
    let created = history.first().unwrap();
    assert_eq!(created.from_status, IntentStatus::Pending);
    assert_eq!(created.to_status, IntentStatus::Pending);
    assert_eq!(created.details.as_deref(), Some("created"));
    assert_eq!(history.last().unwrap().to_status, IntentStatus::Confirmed);
}

// ═══════════════════════════════════════════════════════════════════════════
// RECURRING PAYMENTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_recurring_payment_is_settled_by_workers() {
    let dir = tempfile::tempdir().unwrap();
    let p = Pipeline::sqlite(&dir, SimulatedLedger::new()).await;
    let definitions = Arc::new(
        SqliteStore::new(dir.path().join("payflow.db"))
            .await
            .unwrap(),
    );
    let scheduler = Scheduler::new(
        definitions.clone(),
        p.queue.clone(),
        p.clock.clone(),
        Arc::new(MetricsCollector::new()),
        SchedulerConfig::default(),
    );

    let due = T0 + 60;
    scheduler
        .register_definition(RecurringDefinition::new(
            "rent",
            "chat:42",
            "acct-a",
            "acct-b",
            "APT",
            AmountSpec::Fixed { amount: dec!(100) },
            Cadence::every(300),
            due,
            T0,
        ))
        .await
        .unwrap();

    p.clock.set(due + 1);
    assert_eq!(scheduler.tick().await.unwrap().fired, 1);
    let definition = definitions.get_definition("rent").await.unwrap().unwrap();
    assert_eq!(definition.next_due_at, due + 300);

    assert_eq!(
        p.run_next("w1").await,
        TaskOutcome::Finished(IntentStatus::Confirmed)
    );
    let intent_id = definition.last_intent_id.unwrap();
    let intent = p.store.get(&intent_id).await.unwrap().unwrap();
    assert_eq!(intent.definition_id.as_deref(), Some("rent"));
    assert_eq!(intent.status, IntentStatus::Confirmed);

    // Twenty minutes of downtime: one payment, not a burst of catch-ups
    p.clock.set(due + 20 * 60);
    let report = scheduler.tick().await.unwrap();
    assert_eq!(report.fired, 1);
    // Boundaries at +10, +15 and +20 minutes pass without a payment
    assert_eq!(report.missed, 3);
    let definition = definitions.get_definition("rent").await.unwrap().unwrap();
    assert_eq!(definition.next_due_at, due + 25 * 60);
    assert_eq!(definition.run_count, 2);
}
