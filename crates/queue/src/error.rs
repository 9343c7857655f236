use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The message was redelivered or acknowledged since this receipt was issued
    #[error("stale receipt: {0}")]
    StaleReceipt(String),

    #[error("queue backend error: {0}")]
    Backend(String),

    #[error("queue connection error: {0}")]
    Connection(String),
}

impl QueueError {
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Backend(_) | QueueError::Connection(_))
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                QueueError::Connection(err.to_string())
            }
            other => QueueError::Backend(other.to_string()),
        }
    }
}
