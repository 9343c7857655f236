use payflow_types::IntentStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("intent not found: {0}")]
    NotFound(String),

    #[error("duplicate idempotency key {idempotency_key} (intent {existing_id})")]
    DuplicateIntent {
        idempotency_key: String,
        existing_id: String,
    },

    #[error("intent {id} is claimed by {owner} until {expires_at}")]
    ClaimConflict {
        id: String,
        owner: String,
        expires_at: u64,
    },

    #[error("worker {worker_id} no longer holds the claim on intent {id}")]
    ClaimLost { id: String, worker_id: String },

    #[error("stale transition on intent {id}: expected {expected}, found {actual}")]
    StaleTransition {
        id: String,
        expected: IntentStatus,
        actual: IntentStatus,
    },

    #[error("transition {from} -> {to} is not allowed for intent {id}")]
    InvalidTransition {
        id: String,
        from: IntentStatus,
        to: IntentStatus,
    },

    #[error("intent {id} already carries transaction {existing}")]
    TxRefConflict { id: String, existing: String },

    #[error("intent {id} is {status}; a transaction may already be broadcast")]
    TooLateToCancel { id: String, status: IntentStatus },

    #[error("intent {id} is already final ({status})")]
    AlreadyFinal { id: String, status: IntentStatus },

    #[error("recurring definition not found: {0}")]
    DefinitionNotFound(String),

    #[error("duplicate recurring definition: {0}")]
    DuplicateDefinition(String),

    #[error("recurring definition {id} moved on: expected due {expected_due_at}, found {actual_due_at}")]
    StaleDefinition {
        id: String,
        expected_due_at: u64,
        actual_due_at: u64,
    },

    #[error("recurring definition {0} is disabled")]
    DefinitionDisabled(String),

    #[error("concurrent update on {0}, gave up after retries")]
    Contention(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("connection error: {0}")]
    Connection(String),
}

impl StoreError {
    /// Worth retrying the same operation after a backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Contention(_) | StoreError::Database(_) | StoreError::Connection(_)
        )
    }

    /// Lost a race with another worker; re-read state before acting again
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::ClaimConflict { .. }
                | StoreError::ClaimLost { .. }
                | StoreError::StaleTransition { .. }
                | StoreError::StaleDefinition { .. }
        )
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Connection(err.to_string())
            }
            // SQLITE_BUSY, SQLITE_LOCKED, SQLITE_BUSY_SNAPSHOT
            sqlx::Error::Database(ref db_err)
                if matches!(db_err.code().as_deref(), Some("5" | "6" | "517")) =>
            {
                StoreError::Contention(err.to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
