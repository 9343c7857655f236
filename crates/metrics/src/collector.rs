use std::time::Duration;

use payflow_types::{FailureReason, IntentStatus, TerminalStatus};
use prometheus::{Encoder, TextEncoder};

use crate::metrics::*;

/// Metrics collector for the payment pipeline.
///
/// Metrics live in the default prometheus registry; the collector is the
/// typed front door handed to every component.
#[derive(Debug, Clone, Copy)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INTENT METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_intent_created(&self) {
        INTENTS_CREATED.inc();
    }

    pub fn record_duplicate_intent(&self) {
        DUPLICATE_INTENTS.inc();
    }

    /// Record an applied status transition
    pub fn record_transition(&self, status: IntentStatus) {
        INTENT_TRANSITIONS
            .with_label_values(&[status_label(status)])
            .inc();
    }

    /// Record why an intent failed
    pub fn record_failure(&self, reason: &FailureReason) {
        let reason_str = match reason {
            FailureReason::InsufficientAmount => "insufficient_amount",
            FailureReason::AmountOutOfRange => "amount_out_of_range",
            FailureReason::StalePricing => "stale_pricing",
            FailureReason::UnsupportedToken(_) => "unsupported_token",
            FailureReason::LedgerRejected(_) => "ledger_rejected",
            FailureReason::RetriesExhausted => "retries_exhausted",
            FailureReason::ConfirmationDeadline => "confirmation_deadline",
            FailureReason::Cancelled(_) => "cancelled",
            FailureReason::Expired => "expired",
        };

        INTENT_FAILURES.with_label_values(&[reason_str]).inc();

        if matches!(reason, FailureReason::RetriesExhausted) {
            RETRIES_EXHAUSTED.inc();
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // WORKER METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_claim_conflict(&self) {
        CLAIM_CONFLICTS.inc();
    }

    /// Record a takeover of an abandoned claim
    pub fn record_reclaim(&self, broadcast: bool) {
        let phase = if broadcast { "broadcast" } else { "pre_broadcast" };
        RECLAIMS.with_label_values(&[phase]).inc();
    }

    pub fn worker_started(&self) {
        ACTIVE_WORKERS.inc();
    }

    pub fn worker_stopped(&self) {
        ACTIVE_WORKERS.dec();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LEDGER METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_submission(&self, outcome: SubmissionOutcome, latency: Duration) {
        let outcome_str = match outcome {
            SubmissionOutcome::Accepted => "accepted",
            SubmissionOutcome::Retryable => "retryable",
            SubmissionOutcome::Rejected => "rejected",
            SubmissionOutcome::Unknown => "unknown",
            SubmissionOutcome::Recovered => "recovered",
        };

        SUBMISSIONS.with_label_values(&[outcome_str]).inc();
        LEDGER_LATENCY
            .with_label_values(&["submit"])
            .observe(latency.as_millis() as f64);
    }

    pub fn record_status_poll(&self, latency: Duration) {
        LEDGER_LATENCY
            .with_label_values(&["poll_status"])
            .observe(latency.as_millis() as f64);
    }

    /// Record time between broadcast and finality
    pub fn record_confirmation_latency(&self, secs: u64) {
        CONFIRMATION_LATENCY.observe(secs as f64);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SCHEDULER METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_scheduler_fires(&self, intents: u64) {
        SCHEDULER_FIRES.inc_by(intents);
    }

    pub fn record_missed_cycles(&self, cycles: u64) {
        MISSED_CYCLES.inc_by(cycles);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUEUE METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn set_queue_depth(&self, visible: u64, in_flight: u64, dead: u64) {
        QUEUE_DEPTH.with_label_values(&["visible"]).set(visible as i64);
        QUEUE_DEPTH
            .with_label_values(&["in_flight"])
            .set(in_flight as i64);
        QUEUE_DEPTH.with_label_values(&["dead"]).set(dead as i64);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // NOTIFICATION METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_notification(&self, status: TerminalStatus) {
        let status_str = match status {
            TerminalStatus::Confirmed => "confirmed",
            TerminalStatus::Failed => "failed",
        };
        NOTIFICATIONS.with_label_values(&[status_str]).inc();
    }

    pub fn record_notification_failure(&self) {
        NOTIFICATION_FAILURES.inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPORT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Export metrics in Prometheus text format
    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingError(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingError(e.to_string()))
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn status_label(status: IntentStatus) -> &'static str {
    match status {
        IntentStatus::Pending => "pending",
        IntentStatus::Claimed => "claimed",
        IntentStatus::Submitting => "submitting",
        IntentStatus::Submitted => "submitted",
        IntentStatus::Confirming => "confirming",
        IntentStatus::Confirmed => "confirmed",
        IntentStatus::Failed => "failed",
        IntentStatus::Expired => "expired",
    }
}

/// Result of one ledger submission as seen by a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Accepted,
    Retryable,
    Rejected,
    Unknown,
    /// An earlier broadcast was found by its client reference
    Recovered,
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("encoding error: {0}")]
    EncodingError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new();
        assert!(collector.export_metrics().is_ok());
    }

    #[test]
    fn test_record_intent_metrics() {
        let collector = MetricsCollector::new();

        collector.record_intent_created();
        collector.record_duplicate_intent();
        collector.record_transition(IntentStatus::Claimed);
        collector.record_transition(IntentStatus::Confirmed);

        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("payflow_intents_created_total"));
        assert!(metrics.contains("payflow_duplicate_intents_total"));
        assert!(metrics.contains("payflow_intent_transitions_total"));
        assert!(metrics.contains("status=\"confirmed\""));
    }

    #[test]
    fn test_retries_exhausted_is_counted_separately() {
        let collector = MetricsCollector::new();
        let before = RETRIES_EXHAUSTED.get();

        collector.record_failure(&FailureReason::RetriesExhausted);
        collector.record_failure(&FailureReason::LedgerRejected("bad sequence".to_string()));

        assert_eq!(RETRIES_EXHAUSTED.get(), before + 1);
        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("reason=\"retries_exhausted\""));
        assert!(metrics.contains("reason=\"ledger_rejected\""));
    }

    #[test]
    fn test_record_ledger_metrics() {
        let collector = MetricsCollector::new();

        collector.record_submission(SubmissionOutcome::Accepted, Duration::from_millis(120));
        collector.record_submission(SubmissionOutcome::Recovered, Duration::from_millis(40));
        collector.record_status_poll(Duration::from_millis(30));
        collector.record_confirmation_latency(12);

        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("payflow_submissions_total"));
        assert!(metrics.contains("outcome=\"recovered\""));
        assert!(metrics.contains("payflow_ledger_latency_ms"));
        assert!(metrics.contains("payflow_confirmation_latency_secs"));
    }

    #[test]
    fn test_scheduler_and_queue_metrics() {
        let collector = MetricsCollector::new();
        let missed_before = MISSED_CYCLES.get();

        collector.record_scheduler_fires(1);
        collector.record_missed_cycles(3);
        collector.set_queue_depth(4, 2, 1);

        assert_eq!(MISSED_CYCLES.get(), missed_before + 3);
        assert_eq!(QUEUE_DEPTH.with_label_values(&["dead"]).get(), 1);

        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("payflow_scheduler_fires_total"));
        assert!(metrics.contains("payflow_queue_depth"));
    }
}
