use payflow_calculator::PricingError;
use payflow_ledger::LedgerError;
use payflow_queue::QueueError;
use payflow_store::StoreError;
use payflow_types::{CadenceError, IntentStatus};
use thiserror::Error;

/// Failure while a worker processes one task
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("pricing error: {0}")]
    Pricing(PricingError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("intent {0} is broadcast but has no transaction reference")]
    MissingTxRef(String),
}

impl WorkerError {
    /// The task should be retried later without touching the intent
    pub fn is_transient(&self) -> bool {
        match self {
            WorkerError::Store(e) => e.is_transient(),
            WorkerError::Queue(e) => e.is_transient(),
            WorkerError::Pricing(e) => matches!(e, PricingError::Unavailable(_)),
            WorkerError::Ledger(e) => {
                matches!(e, LedgerError::Unavailable(_) | LedgerError::Timeout(_))
            }
            WorkerError::MissingTxRef(_) => false,
        }
    }

    /// Another worker or an external cancel moved the intent underneath us
    pub fn is_claim_lost(&self) -> bool {
        matches!(self, WorkerError::Store(e) if e.is_conflict())
    }
}

/// Rejection of a payment request at the pipeline boundary
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("invalid payment request: {0}")]
    InvalidRequest(String),

    #[error("duplicate payment request (intent {existing_id})")]
    DuplicateIntent { existing_id: String },

    #[error("payment is already {status}; it can no longer be cancelled")]
    TooLateToCancel { status: IntentStatus },

    #[error("payment not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for IntakeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateIntent { existing_id, .. } => {
                IntakeError::DuplicateIntent { existing_id }
            }
            StoreError::TooLateToCancel { status, .. }
            | StoreError::AlreadyFinal { status, .. } => IntakeError::TooLateToCancel { status },
            StoreError::NotFound(id) => IntakeError::NotFound(id),
            other => IntakeError::Store(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cadence: {0}")]
    InvalidCadence(#[from] CadenceError),

    #[error("invalid recurring definition: {0}")]
    InvalidDefinition(String),

    #[error("origin {origin} already has {limit} active recurring definitions")]
    TooManyDefinitions { origin: String, limit: usize },

    #[error("no amount available for formula {reference}")]
    UnresolvedAmount { reference: String },

    #[error("recurring definition not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}
