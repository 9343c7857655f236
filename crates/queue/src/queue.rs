use async_trait::async_trait;
use payflow_types::TaskMessage;
use std::time::Duration;

use crate::QueueError;

/// A claimed message and the receipt needed to acknowledge or release it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub receipt: String,
    pub message: TaskMessage,
}

/// Message counts by state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    pub visible: u64,
    pub in_flight: u64,
    pub dead: u64,
}

/// Shared broker abstraction used by every worker
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Add a message; returns `false` when a live message for the same
    /// intent is already queued or in flight.
    async fn enqueue(&self, message: TaskMessage) -> Result<bool, QueueError>;

    /// Take the next visible message and hide it for `visibility_secs`.
    ///
    /// Messages redelivered more than the configured ceiling are moved to
    /// the dead-letter set instead of being returned.
    async fn claim(
        &self,
        consumer: &str,
        visibility_secs: u64,
    ) -> Result<Option<Delivery>, QueueError>;

    /// Remove a delivered message for good
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Make a delivered message visible again after `delay_secs`
    async fn release(&self, delivery: &Delivery, delay_secs: u64) -> Result<(), QueueError>;

    /// Push the visibility timeout of a delivery `visibility_secs` past now
    async fn extend(&self, delivery: &Delivery, visibility_secs: u64) -> Result<(), QueueError>;

    async fn depth(&self) -> Result<QueueDepth, QueueError>;

    async fn dead_letters(&self, limit: usize) -> Result<Vec<TaskMessage>, QueueError>;

    /// Wait until new work may be available, or at most `max_wait`
    async fn wait_for_work(&self, max_wait: Duration) {
        tokio::time::sleep(max_wait).await;
    }
}
