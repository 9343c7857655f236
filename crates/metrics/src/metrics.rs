use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Histogram, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec,
};

lazy_static! {
    // ═══════════════════════════════════════════════════════════════════════════
    // INTENT METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Total number of payment intents accepted
    pub static ref INTENTS_CREATED: IntCounter = register_int_counter!(
        "payflow_intents_created_total",
        "Total number of payment intents created"
    )
    .unwrap();

    /// Creates rejected because the idempotency key was already used
    pub static ref DUPLICATE_INTENTS: IntCounter = register_int_counter!(
        "payflow_duplicate_intents_total",
        "Total number of create requests rejected as duplicates"
    )
    .unwrap();

    /// Status transitions applied, by target status
    pub static ref INTENT_TRANSITIONS: IntCounterVec = register_int_counter_vec!(
        "payflow_intent_transitions_total",
        "Total intent status transitions by target status",
        &["status"]
    )
    .unwrap();

    /// Intents that ended in Failed or Expired, by reason
    pub static ref INTENT_FAILURES: IntCounterVec = register_int_counter_vec!(
        "payflow_intent_failures_total",
        "Total failed intents by reason",
        &["reason"]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // WORKER METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Claims refused because another worker holds a live claim
    pub static ref CLAIM_CONFLICTS: IntCounter = register_int_counter!(
        "payflow_claim_conflicts_total",
        "Total claim attempts refused by a live claim"
    )
    .unwrap();

    /// Abandoned claims taken over by another worker
    pub static ref RECLAIMS: IntCounterVec = register_int_counter_vec!(
        "payflow_reclaims_total",
        "Total abandoned claims taken over, by phase",
        &["phase"]
    )
    .unwrap();

    /// Workers currently running
    pub static ref ACTIVE_WORKERS: IntGauge = register_int_gauge!(
        "payflow_workers_active",
        "Number of running worker loops"
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // LEDGER METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Submission attempts by outcome
    pub static ref SUBMISSIONS: IntCounterVec = register_int_counter_vec!(
        "payflow_submissions_total",
        "Total ledger submissions by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Intents failed after the submission attempt ceiling
    pub static ref RETRIES_EXHAUSTED: IntCounter = register_int_counter!(
        "payflow_retries_exhausted_total",
        "Total intents failed with RetriesExhausted"
    )
    .unwrap();

    /// Ledger call latency (in milliseconds)
    pub static ref LEDGER_LATENCY: HistogramVec = register_histogram_vec!(
        "payflow_ledger_latency_ms",
        "Ledger call latency in milliseconds",
        &["operation"],
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap();

    /// Time from broadcast to confirmation (in seconds)
    pub static ref CONFIRMATION_LATENCY: Histogram = register_histogram!(
        "payflow_confirmation_latency_secs",
        "Time from broadcast to ledger finality in seconds",
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 900.0]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // SCHEDULER METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Intents produced by recurring definitions
    pub static ref SCHEDULER_FIRES: IntCounter = register_int_counter!(
        "payflow_scheduler_fires_total",
        "Total intents created by the scheduler"
    )
    .unwrap();

    /// Cadence boundaries skipped while the scheduler was behind
    pub static ref MISSED_CYCLES: IntCounter = register_int_counter!(
        "payflow_scheduler_missed_cycles_total",
        "Total recurring cycles skipped"
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // QUEUE METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Messages by queue state (visible, in_flight, dead)
    pub static ref QUEUE_DEPTH: IntGaugeVec = register_int_gauge_vec!(
        "payflow_queue_depth",
        "Task queue messages by state",
        &["state"]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // NOTIFICATION METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Terminal events delivered, by status
    pub static ref NOTIFICATIONS: IntCounterVec = register_int_counter_vec!(
        "payflow_notifications_total",
        "Total terminal events delivered by status",
        &["status"]
    )
    .unwrap();

    pub static ref NOTIFICATION_FAILURES: IntCounter = register_int_counter!(
        "payflow_notification_failures_total",
        "Total terminal events that could not be delivered"
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // LOGGING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Warn and error log events, by level
    pub static ref LOG_EVENTS: IntCounterVec = register_int_counter_vec!(
        "payflow_log_events_total",
        "Total warn and error log events",
        &["level"]
    )
    .unwrap();
}
