use serde::{Deserialize, Serialize};

use crate::{IntentId, IntentStatus, PaymentIntent};

/// Terminal status reported to the originating surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalStatus {
    Confirmed,
    Failed,
}

/// Outcome event delivered at-least-once to the originating surface.
///
/// Receivers must deduplicate on `intent_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalEvent {
    pub intent_id: IntentId,
    pub origin: String,
    pub status: TerminalStatus,
    pub chain_tx_ref: Option<String>,
    pub reason: Option<String>,
}

impl TerminalEvent {
    /// Build the event for a terminal intent; `None` while still in flight
    pub fn from_intent(intent: &PaymentIntent) -> Option<Self> {
        let (status, reason) = match intent.status {
            IntentStatus::Confirmed => (TerminalStatus::Confirmed, None),
            IntentStatus::Failed => (TerminalStatus::Failed, intent.last_error.clone()),
            IntentStatus::Expired => (
                TerminalStatus::Failed,
                intent
                    .last_error
                    .clone()
                    .or_else(|| Some("Expired".to_string())),
            ),
            _ => return None,
        };

        Some(Self {
            intent_id: intent.id.clone(),
            origin: intent.origin.clone(),
            status,
            chain_tx_ref: intent.chain_tx_ref.clone(),
            reason,
        })
    }
}
