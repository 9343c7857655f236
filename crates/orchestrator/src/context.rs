use payflow_calculator::PricingSource;
use payflow_ledger::LedgerClient;
use payflow_metrics::MetricsCollector;
use payflow_queue::TaskQueue;
use payflow_store::PaymentStore;
use payflow_types::Clock;
use std::sync::Arc;

use crate::Notifier;

/// Shared handles every worker, the reaper and the intake operate on.
///
/// Cloning is cheap; all members are reference counted.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn PaymentStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub ledger: Arc<dyn LedgerClient>,
    pub pricing: Arc<dyn PricingSource>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<MetricsCollector>,
}

impl PipelineContext {
    pub fn now(&self) -> u64 {
        self.clock.now()
    }
}
