//! Asynchronous payment settlement pipeline.
//!
//! Originating surfaces record payment intents through
//! [`PaymentIntake`]; a [`WorkerPool`] drives each intent to a terminal
//! state against a [`LedgerClient`]; the [`Scheduler`] turns recurring
//! definitions into new intents. All coordination goes through the
//! [`PaymentStore`] and [`TaskQueue`].

pub use payflow_calculator as calculator;
pub use payflow_config as config;
pub use payflow_ledger as ledger;
pub use payflow_metrics as metrics;
pub use payflow_orchestrator as orchestrator;
pub use payflow_queue as queue;
pub use payflow_store as store;
pub use payflow_types as types;

pub use payflow_calculator::{PricingSource, StaticPricing, TokenFees};
pub use payflow_ledger::{LedgerClient, SimulatedLedger};
pub use payflow_orchestrator::{
    PaymentIntake, PipelineContext, Reaper, ReaperConfig, Scheduler, SchedulerConfig, WorkerConfig,
    WorkerPool,
};
pub use payflow_queue::TaskQueue;
pub use payflow_store::{DefinitionStore, PaymentStore};

use payflow_config::PipelineConfig;
use payflow_types::Clock;
use std::sync::Arc;
use std::time::Duration;

/// Worker settings from the `worker`, `queue`, `confirmation` and `pricing` sections
pub fn worker_config(config: &PipelineConfig) -> WorkerConfig {
    WorkerConfig {
        lease_secs: config.worker.lease_secs,
        visibility_timeout_secs: config.queue.visibility_timeout_secs,
        max_submission_attempts: config.worker.max_submission_attempts,
        retry_backoff_initial: config.worker.retry_backoff_initial(),
        retry_backoff_max: config.worker.retry_backoff_max(),
        ledger_timeout: config.worker.ledger_timeout(),
        confirmation_poll_interval: config.confirmation.poll_interval(),
        confirmation_max_poll_interval: config.confirmation.max_poll_interval(),
        confirmation_deadline_secs: config.confirmation.deadline_secs,
        freshness_window_secs: config.pricing.freshness_window_secs,
        max_pricing_refetches: config.pricing.max_refetches,
        idle_poll_interval: config.queue.poll_interval(),
    }
}

pub fn reaper_config(config: &PipelineConfig) -> ReaperConfig {
    ReaperConfig {
        interval: Duration::from_secs(config.store.reaper_interval_secs),
        batch_size: config.store.reaper_batch_size,
        stale_pending_secs: config.store.stale_pending_secs,
        intent_ttl_secs: config.store.intent_ttl_secs,
    }
}

pub fn scheduler_config(config: &PipelineConfig) -> SchedulerConfig {
    SchedulerConfig {
        tick_interval: Duration::from_secs(config.scheduler.tick_interval_secs),
        batch_size: config.scheduler.batch_size,
        max_active_per_origin: config.scheduler.max_active_per_origin,
        backfill_missed_cycles: config.scheduler.backfill_missed_cycles,
        max_backfill_cycles: config.scheduler.max_backfill_cycles,
    }
}

/// Fee table built from the configured tokens
pub fn static_pricing(config: &PipelineConfig, clock: Arc<dyn Clock>) -> StaticPricing {
    config
        .pricing
        .tokens
        .iter()
        .fold(StaticPricing::new(clock), |pricing, token| {
            pricing.with_token(
                token.symbol.clone(),
                TokenFees {
                    network_fee: token.network_fee,
                    platform_fee_bps: token.platform_fee_bps,
                    min_transfer_unit: token.min_transfer_unit,
                    decimals: token.decimals,
                },
            )
        })
}
