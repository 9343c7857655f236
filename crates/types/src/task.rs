use serde::{Deserialize, Serialize};

use crate::IntentId;

/// Queue message referencing an intent to be processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub intent_id: IntentId,
    pub enqueued_at: u64,
    /// Number of times this message was handed out before the current delivery
    pub redelivery_count: u32,
}

impl TaskMessage {
    pub fn new(intent_id: impl Into<IntentId>, enqueued_at: u64) -> Self {
        Self {
            intent_id: intent_id.into(),
            enqueued_at,
            redelivery_count: 0,
        }
    }

    pub fn is_redelivery(&self) -> bool {
        self.redelivery_count > 0
    }
}
