use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::{FeeBreakdown, IntentId};

/// Lifecycle status of a payment intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentStatus {
    Pending,
    Claimed,
    Submitting,
    Submitted,
    Confirming,
    Confirmed,
    Failed,
    Expired,
}

impl IntentStatus {
    pub const ALL: [IntentStatus; 8] = [
        IntentStatus::Pending,
        IntentStatus::Claimed,
        IntentStatus::Submitting,
        IntentStatus::Submitted,
        IntentStatus::Confirming,
        IntentStatus::Confirmed,
        IntentStatus::Failed,
        IntentStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "Pending",
            IntentStatus::Claimed => "Claimed",
            IntentStatus::Submitting => "Submitting",
            IntentStatus::Submitted => "Submitted",
            IntentStatus::Confirming => "Confirming",
            IntentStatus::Confirmed => "Confirmed",
            IntentStatus::Failed => "Failed",
            IntentStatus::Expired => "Expired",
        }
    }

    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntentStatus::Confirmed | IntentStatus::Failed | IntentStatus::Expired
        )
    }

    /// A transaction may already have been broadcast for this intent
    pub fn is_broadcast(&self) -> bool {
        matches!(self, IntentStatus::Submitted | IntentStatus::Confirming)
    }

    /// Statuses in which a worker holds a claim on the intent
    pub fn is_claimed(&self) -> bool {
        matches!(
            self,
            IntentStatus::Claimed
                | IntentStatus::Submitting
                | IntentStatus::Submitted
                | IntentStatus::Confirming
        )
    }

    /// Whether an external cancellation is still allowed
    pub fn is_cancellable(&self) -> bool {
        matches!(self, IntentStatus::Pending | IntentStatus::Claimed)
    }

    /// Edges of the intent state machine.
    ///
    /// `Claimed`/`Submitting` may fall back to `Pending` when their claim
    /// expires before anything was broadcast. `Submitted`/`Confirming` never
    /// go backwards.
    pub fn can_transition_to(&self, next: IntentStatus) -> bool {
        use IntentStatus::*;

        matches!(
            (self, next),
            (Pending, Claimed)
                | (Pending, Failed)
                | (Pending, Expired)
                | (Claimed, Submitting)
                | (Claimed, Failed)
                | (Claimed, Pending)
                | (Submitting, Submitted)
                | (Submitting, Claimed)
                | (Submitting, Failed)
                | (Submitting, Pending)
                | (Submitted, Confirming)
                | (Confirming, Confirming)
                | (Confirming, Confirmed)
                | (Confirming, Failed)
        )
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown intent status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for IntentStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IntentStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// Why an intent ended in `Failed` or `Expired`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    InsufficientAmount,
    /// Fee arithmetic on the requested amount overflowed
    AmountOutOfRange,
    StalePricing,
    /// No pricing exists for the intent's token
    UnsupportedToken(String),
    LedgerRejected(String),
    RetriesExhausted,
    ConfirmationDeadline,
    Cancelled(String),
    Expired,
}

impl FailureReason {
    /// Failures caused by the request itself rather than by the ledger
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            FailureReason::InsufficientAmount
                | FailureReason::AmountOutOfRange
                | FailureReason::StalePricing
                | FailureReason::UnsupportedToken(_)
        )
    }

    /// Failures that need operator follow-up
    pub fn needs_operator(&self) -> bool {
        matches!(
            self,
            FailureReason::RetriesExhausted | FailureReason::ConfirmationDeadline
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::InsufficientAmount => f.write_str("InsufficientAmount"),
            FailureReason::AmountOutOfRange => f.write_str("AmountOutOfRange"),
            FailureReason::StalePricing => f.write_str("StalePricing"),
            FailureReason::UnsupportedToken(token) => write!(f, "UnsupportedToken: {token}"),
            FailureReason::LedgerRejected(detail) => write!(f, "LedgerRejected: {detail}"),
            FailureReason::RetriesExhausted => f.write_str("RetriesExhausted"),
            FailureReason::ConfirmationDeadline => f.write_str("ConfirmationDeadline"),
            FailureReason::Cancelled(detail) => write!(f, "Cancelled: {detail}"),
            FailureReason::Expired => f.write_str("Expired"),
        }
    }
}

/// Request to create a payment intent, as supplied by an originating surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPaymentIntent {
    /// Caller-chosen key; a second create with the same key is rejected
    pub idempotency_key: String,
    pub origin: String,
    pub source_account: String,
    pub destination_account: String,
    pub requested_amount: Decimal,
    pub token: String,
    /// Recurring definition that produced this intent, if any
    pub definition_id: Option<String>,
}

impl NewPaymentIntent {
    pub fn new(
        idempotency_key: impl Into<String>,
        origin: impl Into<String>,
        source_account: impl Into<String>,
        destination_account: impl Into<String>,
        requested_amount: Decimal,
        token: impl Into<String>,
    ) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            origin: origin.into(),
            source_account: source_account.into(),
            destination_account: destination_account.into(),
            requested_amount,
            token: token.into(),
            definition_id: None,
        }
    }

    pub fn with_definition(mut self, definition_id: impl Into<String>) -> Self {
        self.definition_id = Some(definition_id.into());
        self
    }

    /// Materialize the intent record in `Pending`
    pub fn into_intent(self, id: IntentId, now: u64) -> PaymentIntent {
        PaymentIntent {
            id,
            idempotency_key: self.idempotency_key,
            origin: self.origin,
            source_account: self.source_account,
            destination_account: self.destination_account,
            requested_amount: self.requested_amount,
            token: self.token,
            status: IntentStatus::Pending,
            claim_owner: None,
            claim_expires_at: None,
            chain_tx_ref: None,
            submission_key: None,
            attempt_count: 0,
            last_error: None,
            fees: None,
            definition_id: self.definition_id,
            submitted_at: None,
            notified_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Durable record of a payment intent and its lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    // ═══════════════════════════════════════════════════════════════════════════
    // IDENTIFICATION
    // ═══════════════════════════════════════════════════════════════════════════
    pub id: IntentId,
    pub idempotency_key: String,

    /// Opaque routing reference for the originating surface
    pub origin: String,

    // ═══════════════════════════════════════════════════════════════════════════
    // TRANSFER
    // ═══════════════════════════════════════════════════════════════════════════
    pub source_account: String,
    pub destination_account: String,
    pub requested_amount: Decimal,
    pub token: String,

    // ═══════════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════════
    pub status: IntentStatus,
    pub claim_owner: Option<String>,
    pub claim_expires_at: Option<u64>,

    /// Set once a transaction has been broadcast; never replaced afterwards
    pub chain_tx_ref: Option<String>,

    /// Client reference of the submission in flight or with unknown outcome
    pub submission_key: Option<String>,

    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub fees: Option<FeeBreakdown>,
    pub definition_id: Option<String>,

    // ═══════════════════════════════════════════════════════════════════════════
    // TIMESTAMPS (unix seconds)
    // ═══════════════════════════════════════════════════════════════════════════
    pub submitted_at: Option<u64>,
    pub notified_at: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl PaymentIntent {
    /// A claim exists and has not yet expired at `now`
    pub fn has_live_claim(&self, now: u64) -> bool {
        self.claim_owner.is_some() && self.claim_expires_at.is_some_and(|exp| exp > now)
    }

    /// Claimed at some point but the holder let the lease lapse
    pub fn is_claim_abandoned(&self, now: u64) -> bool {
        self.status.is_claimed() && !self.has_live_claim(now)
    }

    pub fn is_held_by(&self, worker_id: &str, now: u64) -> bool {
        self.has_live_claim(now) && self.claim_owner.as_deref() == Some(worker_id)
    }

    /// A submission was attempted and its outcome is unresolved; only a ledger
    /// lookup by `submission_key` can tell whether funds moved
    pub fn may_be_broadcast(&self) -> bool {
        !self.status.is_terminal()
            && (self.submission_key.is_some() || !self.status.is_cancellable())
    }

    /// Terminal outcome has not been delivered to the originating surface yet
    pub fn needs_notification(&self) -> bool {
        self.status.is_terminal() && self.notified_at.is_none()
    }
}
