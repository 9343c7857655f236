//! Core configuration structures for the payflow pipeline

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Process-wide settings
    pub service: ServiceConfig,

    /// Payment state store
    pub store: StoreConfig,

    /// Task queue
    pub queue: QueueConfig,

    /// Consumer workers
    pub worker: WorkerConfig,

    /// Confirmation polling
    pub confirmation: ConfirmationConfig,

    /// Fee inputs
    pub pricing: PricingConfig,

    /// Recurring definitions
    pub scheduler: SchedulerConfig,
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Staging,
    Production,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub environment: Environment,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable output
    pub json_logs: bool,

    pub metrics_enabled: bool,
    pub metrics_port: u16,

    /// Worker ids are `<prefix>-<n>`; must be unique per process
    pub worker_id_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file shared by the store and the queue
    pub database_path: String,

    /// Pending intents older than this are expired
    pub intent_ttl_secs: u64,

    /// Pending intents untouched this long are re-enqueued
    pub stale_pending_secs: u64,

    pub reaper_interval_secs: u64,
    pub reaper_batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// How long a claimed task stays hidden from other consumers
    pub visibility_timeout_secs: u64,

    /// Deliveries beyond this move the task to the dead-letter set
    pub max_redeliveries: u32,

    /// Idle wait between empty queue polls
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker loops per process
    pub concurrency: usize,

    /// Claim lease on an intent
    pub lease_secs: u64,

    /// Submission attempts before failing with RetriesExhausted
    pub max_submission_attempts: u32,

    pub retry_backoff_initial_ms: u64,
    pub retry_backoff_max_ms: u64,

    /// Bound on a single ledger call
    pub ledger_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub poll_interval_ms: u64,
    pub max_poll_interval_ms: u64,

    /// Measured from the broadcast; afterwards the intent fails
    pub deadline_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Snapshots older than this are stale
    pub freshness_window_secs: u64,

    /// Fresh snapshots fetched after a stale one before giving up
    pub max_refetches: u32,

    pub tokens: Vec<TokenPricingConfig>,
}

/// Fee table entry for one token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPricingConfig {
    pub symbol: String,
    pub network_fee: Decimal,
    #[serde(default)]
    pub platform_fee_bps: u32,
    pub min_transfer_unit: Decimal,
    #[serde(default = "default_decimals")]
    pub decimals: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tick_interval_secs: u64,

    /// Due definitions handled per tick
    pub batch_size: usize,

    /// Cap on enabled definitions per origin
    pub max_active_per_origin: usize,

    /// Fire one intent per missed boundary instead of skipping ahead
    pub backfill_missed_cycles: bool,
    pub max_backfill_cycles: u32,
}

// Default value functions
fn default_decimals() -> u32 {
    8
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Local,
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_port: 9090,
            worker_id_prefix: "worker".to_string(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: "payflow.db".to_string(),
            intent_ttl_secs: 86_400, // 1 day
            stale_pending_secs: 120,
            reaper_interval_secs: 15,
            reaper_batch_size: 100,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: 90,
            max_redeliveries: 20,
            poll_interval_ms: 500,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            lease_secs: 60,
            max_submission_attempts: 5,
            retry_backoff_initial_ms: 500,
            retry_backoff_max_ms: 30_000,
            ledger_timeout_ms: 10_000,
        }
    }
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            max_poll_interval_ms: 15_000,
            deadline_secs: 600, // 10 minutes
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: 60,
            max_refetches: 2,
            tokens: Vec::new(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_secs: 30,
            batch_size: 100,
            max_active_per_origin: 50,
            backfill_missed_cycles: false,
            max_backfill_cycles: 12,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl WorkerConfig {
    pub fn retry_backoff_initial(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_initial_ms)
    }

    pub fn retry_backoff_max(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_max_ms)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }
}

impl ConfirmationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }
}

impl PricingConfig {
    pub fn token(&self, symbol: &str) -> Option<&TokenPricingConfig> {
        self.tokens.iter().find(|t| t.symbol == symbol)
    }
}
