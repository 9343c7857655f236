//! Configuration validation

use crate::{ConfigError, PipelineConfig, Result, TokenPricingConfig};
use rust_decimal::Decimal;
use std::collections::HashSet;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the entire pipeline configuration, reporting every violation
pub fn validate_config(config: &PipelineConfig) -> Result<()> {
    let mut errors = Vec::new();
    let mut positive = |field: &str, value: u64| {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    };

    positive("store.intent_ttl_secs", config.store.intent_ttl_secs);
    positive("store.stale_pending_secs", config.store.stale_pending_secs);
    positive("store.reaper_interval_secs", config.store.reaper_interval_secs);
    positive("store.reaper_batch_size", config.store.reaper_batch_size as u64);
    positive(
        "queue.visibility_timeout_secs",
        config.queue.visibility_timeout_secs,
    );
    positive("queue.poll_interval_ms", config.queue.poll_interval_ms);
    positive("worker.concurrency", config.worker.concurrency as u64);
    positive("worker.lease_secs", config.worker.lease_secs);
    positive(
        "worker.max_submission_attempts",
        u64::from(config.worker.max_submission_attempts),
    );
    positive(
        "worker.retry_backoff_initial_ms",
        config.worker.retry_backoff_initial_ms,
    );
    positive("worker.ledger_timeout_ms", config.worker.ledger_timeout_ms);
    positive(
        "confirmation.poll_interval_ms",
        config.confirmation.poll_interval_ms,
    );
    positive("confirmation.deadline_secs", config.confirmation.deadline_secs);
    positive(
        "pricing.freshness_window_secs",
        config.pricing.freshness_window_secs,
    );
    positive(
        "scheduler.tick_interval_secs",
        config.scheduler.tick_interval_secs,
    );
    positive("scheduler.batch_size", config.scheduler.batch_size as u64);
    positive(
        "scheduler.max_active_per_origin",
        config.scheduler.max_active_per_origin as u64,
    );

    // Service
    if let Err(e) = validate_log_level(&config.service.log_level) {
        errors.push(e);
    }

    if config.service.metrics_enabled && config.service.metrics_port == 0 {
        errors.push(ValidationError::new(
            "service.metrics_port",
            "metrics port must be greater than 0",
        ));
    }

    if config.service.worker_id_prefix.trim().is_empty() {
        errors.push(ValidationError::new(
            "service.worker_id_prefix",
            "worker id prefix is required",
        ));
    }

    if config.store.database_path.trim().is_empty() {
        errors.push(ValidationError::new(
            "store.database_path",
            "database path is required",
        ));
    }

    // A task must stay hidden for as long as its intent can be held
    if config.queue.visibility_timeout_secs < config.worker.lease_secs {
        errors.push(ValidationError::new(
            "queue.visibility_timeout_secs",
            format!(
                "must be >= worker.lease_secs ({})",
                config.worker.lease_secs
            ),
        ));
    }

    // A single ledger call has to finish inside the lease
    if config.worker.ledger_timeout_ms >= config.worker.lease_secs.saturating_mul(1_000) {
        errors.push(ValidationError::new(
            "worker.ledger_timeout_ms",
            "must be shorter than worker.lease_secs",
        ));
    }

    if config.worker.retry_backoff_max_ms < config.worker.retry_backoff_initial_ms {
        errors.push(ValidationError::new(
            "worker.retry_backoff_max_ms",
            "must be >= worker.retry_backoff_initial_ms",
        ));
    }

    if config.confirmation.max_poll_interval_ms < config.confirmation.poll_interval_ms {
        errors.push(ValidationError::new(
            "confirmation.max_poll_interval_ms",
            "must be >= confirmation.poll_interval_ms",
        ));
    }

    if config.store.intent_ttl_secs <= config.store.stale_pending_secs {
        errors.push(ValidationError::new(
            "store.intent_ttl_secs",
            "must be greater than store.stale_pending_secs",
        ));
    }

    // Pricing
    let mut symbols = HashSet::new();
    for (idx, token) in config.pricing.tokens.iter().enumerate() {
        if !symbols.insert(token.symbol.as_str()) {
            errors.push(ValidationError::new(
                format!("pricing.tokens[{idx}].symbol"),
                format!("duplicate token '{}'", token.symbol),
            ));
        }
        if let Err(e) = validate_token(token) {
            errors.push(ValidationError::new(format!("pricing.tokens[{idx}]"), e));
        }
    }

    if config.scheduler.backfill_missed_cycles && config.scheduler.max_backfill_cycles == 0 {
        errors.push(ValidationError::new(
            "scheduler.max_backfill_cycles",
            "must be greater than 0 when backfill is enabled",
        ));
    }

    if !errors.is_empty() {
        let error_msg = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ConfigError::ValidationError(error_msg));
    }

    Ok(())
}

/// Validate a token fee table entry
pub fn validate_token(token: &TokenPricingConfig) -> std::result::Result<(), String> {
    if token.symbol.trim().is_empty() {
        return Err("symbol is required".to_string());
    }

    if token.network_fee < Decimal::ZERO {
        return Err("network_fee cannot be negative".to_string());
    }

    if token.platform_fee_bps > 10_000 {
        return Err("platform_fee_bps must be <= 10000 (100%)".to_string());
    }

    if token.min_transfer_unit <= Decimal::ZERO {
        return Err("min_transfer_unit must be greater than 0".to_string());
    }

    if token.decimals > 28 {
        return Err("decimals must be <= 28".to_string());
    }

    Ok(())
}

fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new(
            "service.log_level",
            format!(
                "invalid log level '{level}', must be one of: trace, debug, info, warn, error"
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn apt() -> TokenPricingConfig {
        TokenPricingConfig {
            symbol: "APT".to_string(),
            network_fee: dec!(2),
            platform_fee_bps: 0,
            min_transfer_unit: dec!(0.01),
            decimals: 8,
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&PipelineConfig::default()).is_ok());
    }

    #[test]
    fn test_visibility_must_cover_lease() {
        let mut config = PipelineConfig::default();
        config.worker.lease_secs = 120;
        config.queue.visibility_timeout_secs = 60;

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("queue.visibility_timeout_secs"));
    }

    #[test]
    fn test_all_violations_are_reported() {
        let mut config = PipelineConfig::default();
        config.service.log_level = "verbose".to_string();
        config.worker.max_submission_attempts = 0;
        config.scheduler.tick_interval_secs = 0;

        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("service.log_level"));
        assert!(err.contains("worker.max_submission_attempts"));
        assert!(err.contains("scheduler.tick_interval_secs"));
    }

    #[test]
    fn test_token_validation() {
        assert!(validate_token(&apt()).is_ok());

        let mut bad = apt();
        bad.platform_fee_bps = 20_000;
        assert!(validate_token(&bad).is_err());

        let mut config = PipelineConfig::default();
        config.pricing.tokens = vec![apt(), apt()];
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("duplicate token 'APT'"));
    }
}
