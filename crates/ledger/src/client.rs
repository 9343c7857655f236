use async_trait::async_trait;
use payflow_types::{FeeBreakdown, PaymentIntent};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a submission did not produce a transaction reference
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// Nothing reached the ledger (connection refused, node overloaded)
    #[error("retryable submission error: {0}")]
    Retryable(String),

    /// The ledger refused the transaction (insufficient balance, bad sequence)
    #[error("ledger rejected transaction: {0}")]
    Terminal(String),

    /// The request may or may not have been broadcast; check before resubmitting
    #[error("submission outcome unknown: {0}")]
    Unknown(String),
}

impl SubmitError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmitError::Retryable(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmitError::Terminal(_))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("ledger request timed out: {0}")]
    Timeout(String),

    #[error("unknown transaction: {0}")]
    UnknownTransaction(String),
}

/// Status of a broadcast transaction as reported by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerStatus {
    Pending,
    Confirmed,
    Rejected(String),
}

impl LedgerStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, LedgerStatus::Pending)
    }
}

/// Transfer handed to the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub intent_id: String,

    /// Deterministic reference; resubmitting the same reference must not
    /// create a second transfer
    pub client_ref: String,

    pub source_account: String,
    pub destination_account: String,
    pub token: String,
    pub amount: Decimal,
    pub network_fee: Decimal,
}

impl LedgerTransaction {
    pub fn for_intent(
        intent: &PaymentIntent,
        fees: &FeeBreakdown,
        client_ref: impl Into<String>,
    ) -> Self {
        Self {
            intent_id: intent.id.clone(),
            client_ref: client_ref.into(),
            source_account: intent.source_account.clone(),
            destination_account: intent.destination_account.clone(),
            token: intent.token.clone(),
            amount: fees.transfer_amount,
            network_fee: fees.network_fee,
        }
    }
}

/// Blockchain node boundary; implementations hold no pipeline state
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Broadcast a transfer and return its transaction reference
    async fn submit(&self, tx: &LedgerTransaction) -> Result<String, SubmitError>;

    async fn poll_status(&self, tx_ref: &str) -> Result<LedgerStatus, LedgerError>;

    /// Transaction reference of an earlier submission from `account` with
    /// `client_ref`, if the ledger has seen one
    async fn find_by_client_ref(
        &self,
        account: &str,
        client_ref: &str,
    ) -> Result<Option<String>, LedgerError>;
}
