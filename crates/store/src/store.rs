use async_trait::async_trait;
use payflow_types::{
    FailureReason, FeeBreakdown, IntentStatus, NewPaymentIntent, PaymentIntent,
    RecurringDefinition,
};
use serde::{Deserialize, Serialize};

use crate::StoreError;

// ═══════════════════════════════════════════════════════════════════════════
// CORE TYPES
// ═══════════════════════════════════════════════════════════════════════════

/// Audit record of one status change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateTransition {
    pub from_status: IntentStatus,
    pub to_status: IntentStatus,
    pub timestamp: u64,
    pub details: Option<String>,
    pub tx_ref: Option<String>,
}

impl StateTransition {
    pub fn new(from_status: IntentStatus, to_status: IntentStatus, timestamp: u64) -> Self {
        Self {
            from_status,
            to_status,
            timestamp,
            details: None,
            tx_ref: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_tx_ref(mut self, tx_ref: impl Into<String>) -> Self {
        self.tx_ref = Some(tx_ref.into());
        self
    }
}

/// Compare-and-swap request on an intent's status.
///
/// Applied only if the intent is still in `expected` and, when `owner` is
/// set, the claim still belongs to that worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub expected: IntentStatus,
    pub next: IntentStatus,
    pub owner: Option<String>,
    pub chain_tx_ref: Option<String>,
    pub submission_key: Option<String>,
    pub clear_submission_key: bool,
    pub attempt_count: Option<u32>,
    pub last_error: Option<String>,
    pub fees: Option<FeeBreakdown>,
    pub claim_expires_at: Option<u64>,
    pub details: Option<String>,
}

impl Transition {
    pub fn new(expected: IntentStatus, next: IntentStatus) -> Self {
        Self {
            expected,
            next,
            owner: None,
            chain_tx_ref: None,
            submission_key: None,
            clear_submission_key: false,
            attempt_count: None,
            last_error: None,
            fees: None,
            claim_expires_at: None,
            details: None,
        }
    }

    /// Require the claim to be held by `worker_id`
    pub fn by(mut self, worker_id: impl Into<String>) -> Self {
        self.owner = Some(worker_id.into());
        self
    }

    pub fn with_tx_ref(mut self, tx_ref: impl Into<String>) -> Self {
        self.chain_tx_ref = Some(tx_ref.into());
        self
    }

    pub fn with_submission_key(mut self, key: impl Into<String>) -> Self {
        self.submission_key = Some(key.into());
        self
    }

    pub fn clearing_submission_key(mut self) -> Self {
        self.clear_submission_key = true;
        self
    }

    pub fn with_attempt_count(mut self, attempt_count: u32) -> Self {
        self.attempt_count = Some(attempt_count);
        self
    }

    pub fn with_failure(mut self, reason: &FailureReason) -> Self {
        self.last_error = Some(reason.to_string());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    pub fn with_fees(mut self, fees: FeeBreakdown) -> Self {
        self.fees = Some(fees);
        self
    }

    /// Extend the claim in the same step
    pub fn extending_claim_to(mut self, expires_at: u64) -> Self {
        self.claim_expires_at = Some(expires_at);
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// One scheduler firing of a recurring definition, applied atomically:
/// the intents are created and the definition advanced, or nothing happens.
#[derive(Debug, Clone, PartialEq)]
pub struct Firing {
    pub definition_id: String,

    /// `next_due_at` observed by the scheduler when it decided to fire
    pub expected_due_at: u64,

    /// New `next_due_at`; `None` disables the definition
    pub next_due_at: Option<u64>,

    pub intents: Vec<NewPaymentIntent>,
}

// ═══════════════════════════════════════════════════════════════════════════
// STORE TRAITS
// ═══════════════════════════════════════════════════════════════════════════

/// Payment intent storage; the only owner of intent mutations
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Create a `Pending` intent, rejecting a reused idempotency key
    async fn create(&self, new: NewPaymentIntent, now: u64) -> Result<PaymentIntent, StoreError>;

    /// Take the claim on an intent.
    ///
    /// Succeeds when the intent is `Pending`, when the existing claim has
    /// expired, or when `worker_id` already holds it (the lease is renewed).
    /// An expired claim in `Claimed`/`Submitting` restarts from `Claimed`;
    /// in `Submitted`/`Confirming` the status is kept so the new holder
    /// resumes polling.
    async fn claim(
        &self,
        id: &str,
        worker_id: &str,
        lease_secs: u64,
        now: u64,
    ) -> Result<PaymentIntent, StoreError>;

    /// Extend a claim held by `worker_id`
    async fn renew(
        &self,
        id: &str,
        worker_id: &str,
        lease_secs: u64,
        now: u64,
    ) -> Result<PaymentIntent, StoreError>;

    /// Compare-and-swap on status
    async fn transition(
        &self,
        id: &str,
        transition: Transition,
        now: u64,
    ) -> Result<PaymentIntent, StoreError>;

    /// Fail an intent on external request while nothing can have been broadcast
    async fn cancel(&self, id: &str, reason: &str, now: u64) -> Result<PaymentIntent, StoreError>;

    /// Record delivery of the terminal event; `false` if it was already recorded
    async fn mark_notified(&self, id: &str, now: u64) -> Result<bool, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<PaymentIntent>, StoreError>;

    async fn get_by_idempotency_key(&self, key: &str)
        -> Result<Option<PaymentIntent>, StoreError>;

    async fn list_by_status(
        &self,
        status: IntentStatus,
        limit: usize,
    ) -> Result<Vec<PaymentIntent>, StoreError>;

    /// Claimed intents whose claim expired at or before `now`
    async fn list_due_for_reclaim(
        &self,
        now: u64,
        limit: usize,
    ) -> Result<Vec<PaymentIntent>, StoreError>;

    /// `Pending` intents untouched since `updated_before`
    async fn list_stale_pending(
        &self,
        updated_before: u64,
        limit: usize,
    ) -> Result<Vec<PaymentIntent>, StoreError>;

    /// Terminal intents whose outcome was never delivered
    async fn list_unnotified(&self, limit: usize) -> Result<Vec<PaymentIntent>, StoreError>;

    async fn get_history(&self, id: &str) -> Result<Vec<StateTransition>, StoreError>;
}

/// Recurring definition storage
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn create_definition(&self, definition: &RecurringDefinition)
        -> Result<(), StoreError>;

    /// Replace a definition's editable fields
    async fn update_definition(&self, definition: &RecurringDefinition)
        -> Result<(), StoreError>;

    async fn get_definition(&self, id: &str) -> Result<Option<RecurringDefinition>, StoreError>;

    async fn list_definitions_by_origin(
        &self,
        origin: &str,
    ) -> Result<Vec<RecurringDefinition>, StoreError>;

    async fn count_active_by_origin(&self, origin: &str) -> Result<usize, StoreError>;

    /// Enabled definitions with `next_due_at <= now`, earliest first
    async fn list_due_definitions(
        &self,
        now: u64,
        limit: usize,
    ) -> Result<Vec<RecurringDefinition>, StoreError>;

    /// Disabled definitions are kept for audit
    async fn set_definition_enabled(
        &self,
        id: &str,
        enabled: bool,
        now: u64,
    ) -> Result<RecurringDefinition, StoreError>;

    /// Create the firing's intents and advance the definition in one step
    async fn fire_definition(
        &self,
        firing: Firing,
        now: u64,
    ) -> Result<Vec<PaymentIntent>, StoreError>;
}
