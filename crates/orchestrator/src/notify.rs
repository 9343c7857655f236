//! Delivery of terminal outcomes to the originating surface
//!
//! Delivery is at-least-once: an outcome is marked delivered in the store
//! only after the notifier accepted it, and the reaper retries anything
//! left unmarked. Receivers deduplicate on `intent_id`.

use async_trait::async_trait;
use payflow_types::{PaymentIntent, TerminalEvent};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::PipelineContext;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),

    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Boundary to chat / UI surfaces
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &TerminalEvent) -> Result<(), NotifyError>;
}

/// Forwards events to an in-process receiver
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<TerminalEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TerminalEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, event: &TerminalEvent) -> Result<(), NotifyError> {
        self.tx
            .send(event.clone())
            .map_err(|_| NotifyError::Unavailable("receiver dropped".to_string()))
    }
}

/// Writes events to the log; used when no surface is attached
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: &TerminalEvent) -> Result<(), NotifyError> {
        info!(
            intent_id = %event.intent_id,
            origin = %event.origin,
            status = ?event.status,
            chain_tx_ref = ?event.chain_tx_ref,
            reason = ?event.reason,
            "Payment outcome"
        );
        Ok(())
    }
}

/// Keeps every delivered event (for testing)
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<TerminalEvent>>,
    failures_left: AtomicU32,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TerminalEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Refuse the next `n` deliveries
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &TerminalEvent) -> Result<(), NotifyError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(NotifyError::Unavailable("scripted failure".to_string()));
        }

        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}

/// Deliver the outcome of a terminal intent unless that already happened.
///
/// Returns whether an event was delivered by this call. Failures are logged
/// and left for the reaper.
pub(crate) async fn deliver_outcome(ctx: &PipelineContext, intent: &PaymentIntent) -> bool {
    if !intent.needs_notification() {
        return false;
    }
    let Some(event) = TerminalEvent::from_intent(intent) else {
        return false;
    };

    if let Err(e) = ctx.notifier.notify(&event).await {
        ctx.metrics.record_notification_failure();
        warn!(intent_id = %intent.id, error = %e, "Failed to deliver payment outcome");
        return false;
    }

    match ctx.store.mark_notified(&intent.id, ctx.now()).await {
        Ok(true) => {
            ctx.metrics.record_notification(event.status);
            true
        }
        Ok(false) => {
            debug!(intent_id = %intent.id, "Outcome was already marked delivered");
            false
        }
        Err(e) => {
            // The event went out; a redelivery is harmless
            warn!(intent_id = %intent.id, error = %e, "Failed to record outcome delivery");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payflow_types::TerminalStatus;

    fn event() -> TerminalEvent {
        TerminalEvent {
            intent_id: "intent-1".to_string(),
            origin: "chat:1".to_string(),
            status: TerminalStatus::Confirmed,
            chain_tx_ref: Some("0xabc".to_string()),
            reason: None,
        }
    }

    #[tokio::test]
    async fn test_channel_notifier_forwards() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify(&event()).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.intent_id, "intent-1");
    }

    #[tokio::test]
    async fn test_channel_notifier_closed_receiver() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        assert!(matches!(
            notifier.notify(&event()).await,
            Err(NotifyError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_recording_notifier_scripted_failures() {
        let notifier = RecordingNotifier::new();
        notifier.fail_next(1);

        assert!(notifier.notify(&event()).await.is_err());
        assert!(notifier.notify(&event()).await.is_ok());
        assert_eq!(notifier.events().len(), 1);
    }
}
