use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{LedgerClient, LedgerError, LedgerStatus, LedgerTransaction, SubmitError};

/// Scripted result of one `submit` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accept,
    Retryable(String),
    Reject(String),
    /// The caller sees an unknown outcome; `broadcast` decides whether the
    /// ledger actually recorded the transaction
    Unknown { broadcast: bool },
}

/// How a broadcast transaction eventually settles
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Confirm,
    Reject(String),
    /// Stays pending forever
    Never,
}

#[derive(Debug)]
struct SimTx {
    polls: u32,
    settlement: Settlement,
}

#[derive(Debug, Default)]
struct Inner {
    submit_script: VecDeque<SubmitOutcome>,
    settlement_script: VecDeque<Settlement>,
    txs: HashMap<String, SimTx>,
    by_client_ref: HashMap<(String, String), String>,
    submit_calls: u64,
    poll_calls: u64,
}

/// In-process ledger with scripted behaviour.
///
/// Submissions are idempotent on `(source_account, client_ref)`, like an
/// account sequence number: resubmitting returns the original reference.
pub struct SimulatedLedger {
    inner: Mutex<Inner>,
    pending_polls: u32,
    latency: Duration,
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            pending_polls: 0,
            latency: Duration::ZERO,
        }
    }

    /// Report `Pending` this many times before a transaction settles
    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue outcomes for the next `submit` calls; afterwards submissions are accepted
    pub async fn script_submits(&self, outcomes: impl IntoIterator<Item = SubmitOutcome>) {
        self.inner.lock().await.submit_script.extend(outcomes);
    }

    /// Queue settlements for the next broadcasts; afterwards they confirm
    pub async fn script_settlements(&self, settlements: impl IntoIterator<Item = Settlement>) {
        self.inner.lock().await.settlement_script.extend(settlements);
    }

    /// Record a transaction as if another process had broadcast it
    pub async fn seed_transaction(&self, tx: &LedgerTransaction) -> String {
        let mut inner = self.inner.lock().await;
        Self::record(&mut inner, tx)
    }

    pub async fn submit_calls(&self) -> u64 {
        self.inner.lock().await.submit_calls
    }

    pub async fn poll_calls(&self) -> u64 {
        self.inner.lock().await.poll_calls
    }

    /// Distinct transactions the ledger holds
    pub async fn broadcast_count(&self) -> usize {
        self.inner.lock().await.txs.len()
    }

    pub fn tx_ref_for(account: &str, client_ref: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(account.as_bytes());
        hasher.update(b":");
        hasher.update(client_ref.as_bytes());
        format!("0x{}", hex::encode(hasher.finalize()))
    }

    fn record(inner: &mut Inner, tx: &LedgerTransaction) -> String {
        let key = (tx.source_account.clone(), tx.client_ref.clone());
        if let Some(existing) = inner.by_client_ref.get(&key) {
            return existing.clone();
        }

        let tx_ref = Self::tx_ref_for(&tx.source_account, &tx.client_ref);
        let settlement = inner
            .settlement_script
            .pop_front()
            .unwrap_or(Settlement::Confirm);
        inner.txs.insert(
            tx_ref.clone(),
            SimTx {
                polls: 0,
                settlement,
            },
        );
        inner.by_client_ref.insert(key, tx_ref.clone());
        tx_ref
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn submit(&self, tx: &LedgerTransaction) -> Result<String, SubmitError> {
        self.simulate_latency().await;

        let mut inner = self.inner.lock().await;
        inner.submit_calls += 1;

        let outcome = inner
            .submit_script
            .pop_front()
            .unwrap_or(SubmitOutcome::Accept);
        debug!(intent_id = %tx.intent_id, client_ref = %tx.client_ref, ?outcome, "Simulated submit");

        match outcome {
            SubmitOutcome::Accept => Ok(Self::record(&mut inner, tx)),
            SubmitOutcome::Retryable(reason) => Err(SubmitError::Retryable(reason)),
            SubmitOutcome::Reject(reason) => Err(SubmitError::Terminal(reason)),
            SubmitOutcome::Unknown { broadcast } => {
                if broadcast {
                    Self::record(&mut inner, tx);
                }
                Err(SubmitError::Unknown("connection reset after send".to_string()))
            }
        }
    }

    async fn poll_status(&self, tx_ref: &str) -> Result<LedgerStatus, LedgerError> {
        self.simulate_latency().await;

        let mut inner = self.inner.lock().await;
        inner.poll_calls += 1;

        let pending_polls = self.pending_polls;
        let tx = inner
            .txs
            .get_mut(tx_ref)
            .ok_or_else(|| LedgerError::UnknownTransaction(tx_ref.to_string()))?;

        if tx.polls < pending_polls {
            tx.polls += 1;
            return Ok(LedgerStatus::Pending);
        }
        tx.polls += 1;

        Ok(match &tx.settlement {
            Settlement::Confirm => LedgerStatus::Confirmed,
            Settlement::Reject(reason) => LedgerStatus::Rejected(reason.clone()),
            Settlement::Never => LedgerStatus::Pending,
        })
    }

    async fn find_by_client_ref(
        &self,
        account: &str,
        client_ref: &str,
    ) -> Result<Option<String>, LedgerError> {
        self.simulate_latency().await;

        Ok(self
            .inner
            .lock()
            .await
            .by_client_ref
            .get(&(account.to_string(), client_ref.to_string()))
            .cloned())
    }
}
