use payflow_calculator::{MockPricing, PricingSnapshot};
use payflow_ledger::{LedgerTransaction, SimulatedLedger};
use payflow_metrics::MetricsCollector;
use payflow_queue::{Delivery, InMemoryQueue, TaskQueue};
use payflow_store::{InMemoryStore, PaymentStore, Transition};
use payflow_types::{
    Clock, FeeBreakdown, IntentStatus, ManualClock, NewPaymentIntent, PaymentIntent, TaskMessage,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::{PipelineContext, RecordingNotifier, Worker, WorkerConfig};

pub const T0: u64 = 1_700_000_000;

/// In-memory pipeline with a manual clock
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryStore>,
    pub queue: Arc<InMemoryQueue>,
    pub ledger: Arc<SimulatedLedger>,
    pub pricing: Arc<MockPricing>,
    pub notifier: Arc<RecordingNotifier>,
    pub ctx: PipelineContext,
    pub config: WorkerConfig,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_ledger(SimulatedLedger::new()).await
    }

    pub async fn with_ledger(ledger: SimulatedLedger) -> Self {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(InMemoryQueue::new(clock.clone(), 5));
        let ledger = Arc::new(ledger);
        let pricing = Arc::new(MockPricing::new());
        pricing.set_snapshot(Self::snapshot(T0)).await;
        let notifier = Arc::new(RecordingNotifier::new());

        let ctx = PipelineContext {
            store: store.clone(),
            queue: queue.clone(),
            ledger: ledger.clone(),
            pricing: pricing.clone(),
            notifier: notifier.clone(),
            clock: clock.clone(),
            metrics: Arc::new(MetricsCollector::new()),
        };

        Self {
            clock,
            store,
            queue,
            ledger,
            pricing,
            notifier,
            ctx,
            config: Self::worker_config(),
        }
    }

    /// Flat fee of 2 APT, no platform fee
    pub fn snapshot(captured_at: u64) -> PricingSnapshot {
        PricingSnapshot {
            token: "APT".to_string(),
            captured_at,
            network_fee: dec!(2),
            platform_fee_bps: 0,
            min_transfer_unit: dec!(0.01),
            decimals: 8,
        }
    }

    pub fn worker_config() -> WorkerConfig {
        WorkerConfig {
            lease_secs: 60,
            visibility_timeout_secs: 90,
            max_submission_attempts: 3,
            retry_backoff_initial: Duration::from_millis(1),
            retry_backoff_max: Duration::from_millis(4),
            ledger_timeout: Duration::from_secs(1),
            confirmation_poll_interval: Duration::from_millis(1),
            confirmation_max_poll_interval: Duration::from_millis(2),
            confirmation_deadline_secs: 600,
            freshness_window_secs: 60,
            max_pricing_refetches: 2,
            idle_poll_interval: Duration::from_millis(10),
        }
    }

    pub async fn create(&self, key: &str, amount: Decimal) -> PaymentIntent {
        self.create_with_token(key, amount, "APT").await
    }

    pub async fn create_with_token(&self, key: &str, amount: Decimal, token: &str) -> PaymentIntent {
        let now = self.clock.now();
        let intent = self
            .store
            .create(
                NewPaymentIntent::new(key, "chat:1", "acct-a", "acct-b", amount, token),
                now,
            )
            .await
            .unwrap();
        self.queue
            .enqueue(TaskMessage::new(&intent.id, now))
            .await
            .unwrap();
        intent
    }

    /// Worker that is never asked to stop
    pub fn worker(&self, id: &str) -> Worker {
        let (_tx, rx) = watch::channel(false);
        Worker::new(id, self.ctx.clone(), self.config.clone(), rx)
    }

    pub async fn next_delivery(&self, consumer: &str) -> Delivery {
        self.queue
            .claim(consumer, self.config.visibility_timeout_secs)
            .await
            .unwrap()
            .expect("a visible task")
    }

    /// Drive an intent to `Submitted` as `worker_id` would before crashing
    pub async fn broadcast_as(&self, intent: &PaymentIntent, worker_id: &str) -> String {
        let now = self.clock.now();
        let key = format!("{}:0", intent.id);
        let fees = FeeBreakdown {
            transfer_amount: intent.requested_amount - dec!(2),
            network_fee: dec!(2),
            platform_fee: dec!(0),
        };

        self.store
            .claim(&intent.id, worker_id, self.config.lease_secs, now)
            .await
            .unwrap();
        let submitting = self
            .store
            .transition(
                &intent.id,
                Transition::new(IntentStatus::Claimed, IntentStatus::Submitting)
                    .by(worker_id)
                    .with_fees(fees)
                    .with_submission_key(&key),
                now,
            )
            .await
            .unwrap();
        let tx_ref = self
            .ledger
            .seed_transaction(&LedgerTransaction::for_intent(&submitting, &fees, &key))
            .await;
        self.store
            .transition(
                &intent.id,
                Transition::new(IntentStatus::Submitting, IntentStatus::Submitted)
                    .by(worker_id)
                    .with_tx_ref(&tx_ref),
                now,
            )
            .await
            .unwrap();
        tx_ref
    }
}
