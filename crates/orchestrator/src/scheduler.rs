//! Recurring payments and scheduled prompts.
//!
//! The scheduler only ever produces new `Pending` intents. Each firing is a
//! single store operation that creates the cycle's intents and advances
//! `next_due_at`, so a crash can neither lose a cycle nor fire it twice; the
//! cycle's idempotency key (`recurring:<id>:<due_at>`) backs that up.

use async_trait::async_trait;
use payflow_metrics::MetricsCollector;
use payflow_queue::TaskQueue;
use payflow_store::{DefinitionStore, Firing, StoreError};
use payflow_types::{
    AmountSpec, Clock, DefinitionKind, IntentStatus, NewPaymentIntent, RecurringDefinition,
    TaskMessage,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::worker::wait_for_shutdown;
use crate::SchedulerError;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// Due definitions handled per tick
    pub batch_size: usize,
    pub max_active_per_origin: usize,
    /// Fire one intent per missed boundary instead of skipping ahead
    pub backfill_missed_cycles: bool,
    pub max_backfill_cycles: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            batch_size: 100,
            max_active_per_origin: 50,
            backfill_missed_cycles: false,
            max_backfill_cycles: 12,
        }
    }
}

/// Resolves `AmountSpec::Formula` amounts at fire time
#[async_trait]
pub trait AmountResolver: Send + Sync {
    async fn resolve(
        &self,
        definition: &RecurringDefinition,
        due_at: u64,
    ) -> Result<Decimal, SchedulerError>;
}

/// Fixed amount per formula reference
#[derive(Debug, Default, Clone)]
pub struct FormulaTable {
    amounts: HashMap<String, Decimal>,
}

impl FormulaTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_formula(mut self, reference: impl Into<String>, amount: Decimal) -> Self {
        self.amounts.insert(reference.into(), amount);
        self
    }
}

#[async_trait]
impl AmountResolver for FormulaTable {
    async fn resolve(
        &self,
        definition: &RecurringDefinition,
        _due_at: u64,
    ) -> Result<Decimal, SchedulerError> {
        match &definition.amount_spec {
            AmountSpec::Fixed { amount } => Ok(*amount),
            AmountSpec::Formula { reference } => self
                .amounts
                .get(reference)
                .copied()
                .ok_or_else(|| SchedulerError::UnresolvedAmount {
                    reference: reference.clone(),
                }),
        }
    }
}

/// Counts of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Intents created
    pub fired: usize,
    /// Cadence boundaries skipped over
    pub missed: u64,
    /// Definitions another scheduler advanced or disabled first
    pub skipped: usize,
    pub failed: usize,
}

pub struct Scheduler {
    definitions: Arc<dyn DefinitionStore>,
    queue: Arc<dyn TaskQueue>,
    resolver: Arc<dyn AmountResolver>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        queue: Arc<dyn TaskQueue>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            definitions,
            queue,
            resolver: Arc::new(FormulaTable::new()),
            clock,
            metrics,
            config,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn AmountResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(tick_interval = ?self.config.tick_interval, "Scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wait_for_shutdown(shutdown.clone()) => break,
            }

            match self.tick().await {
                Ok(report) if report != TickReport::default() => info!(?report, "Scheduler tick"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Scheduler tick failed"),
            }
        }

        info!("Scheduler stopped");
    }

    /// Fire every definition that is due now
    pub async fn tick(&self) -> Result<TickReport, SchedulerError> {
        let now = self.clock.now();
        let due = self
            .definitions
            .list_due_definitions(now, self.config.batch_size)
            .await?;
        let mut report = TickReport::default();

        for definition in due {
            match self.fire(&definition, now).await {
                Ok((fired, missed)) => {
                    report.fired += fired;
                    report.missed += missed;
                }
                Err(SchedulerError::Store(
                    e @ (StoreError::StaleDefinition { .. } | StoreError::DefinitionDisabled(_)),
                )) => {
                    debug!(definition_id = %definition.id, error = %e, "Definition changed before firing");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(definition_id = %definition.id, error = %e, "Failed to fire recurring definition");
                    report.failed += 1;
                }
            }
        }

        if report.fired > 0 {
            self.metrics.record_scheduler_fires(report.fired as u64);
        }
        Ok(report)
    }

    /// Returns intents created and boundaries skipped.
    ///
    /// Intents are enqueued only after the firing has committed. A failed
    /// enqueue leaves a `Pending` intent with no task; the reaper's stale
    /// `Pending` sweep enqueues it once `stale_pending_secs` have passed.
    async fn fire(
        &self,
        definition: &RecurringDefinition,
        now: u64,
    ) -> Result<(usize, u64), SchedulerError> {
        let cadence = &definition.cadence;
        let due_at = definition.next_due_at;
        let missed = cadence.missed_between(due_at, now);

        let mut boundaries = vec![due_at];
        if self.config.backfill_missed_cycles {
            let mut cursor = due_at;
            for _ in 0..missed.min(u64::from(self.config.max_backfill_cycles)) {
                match cadence.following(cursor) {
                    Some(next) if next <= now => {
                        boundaries.push(next);
                        cursor = next;
                    }
                    _ => break,
                }
            }
        }
        let skipped = missed.saturating_sub(boundaries.len() as u64 - 1);
        let next_due_at = cadence.next_after(due_at, now);

        let mut intents = Vec::with_capacity(boundaries.len());
        for boundary in boundaries {
            let amount = self.resolver.resolve(definition, boundary).await?;
            if amount <= Decimal::ZERO {
                info!(
                    definition_id = %definition.id,
                    due_at = boundary,
                    amount = %amount,
                    "Nothing to charge for this cycle"
                );
                continue;
            }
            intents.push(
                NewPaymentIntent::new(
                    definition.idempotency_key(boundary),
                    definition.origin.clone(),
                    definition.source_account.clone(),
                    definition.destination_account.clone(),
                    amount,
                    definition.token.clone(),
                )
                .with_definition(definition.id.clone()),
            );
        }

        let created = self
            .definitions
            .fire_definition(
                Firing {
                    definition_id: definition.id.clone(),
                    expected_due_at: due_at,
                    next_due_at,
                    intents,
                },
                now,
            )
            .await?;

        for intent in &created {
            self.metrics.record_intent_created();
            self.metrics.record_transition(IntentStatus::Pending);
            // The reaper re-enqueues stale Pending intents
            if let Err(e) = self.queue.enqueue(TaskMessage::new(&intent.id, now)).await {
                warn!(intent_id = %intent.id, error = %e, "Failed to enqueue scheduled payment");
            }
        }

        if skipped > 0 {
            self.metrics.record_missed_cycles(skipped);
            warn!(
                definition_id = %definition.id,
                origin = %definition.origin,
                missed = skipped,
                due_at,
                next_due_at = ?next_due_at,
                "MissedCycle: recurring cycles skipped"
            );
        }

        info!(
            definition_id = %definition.id,
            intents = created.len(),
            next_due_at = ?next_due_at,
            "Recurring definition fired"
        );
        Ok((created.len(), skipped))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MANAGEMENT
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn register_definition(
        &self,
        definition: RecurringDefinition,
    ) -> Result<RecurringDefinition, SchedulerError> {
        validate_definition(&definition)?;
        if definition.enabled {
            self.check_origin_cap(&definition.origin).await?;
        }

        self.definitions.create_definition(&definition).await?;
        info!(
            definition_id = %definition.id,
            origin = %definition.origin,
            cadence = %definition.cadence,
            next_due_at = definition.next_due_at,
            "Recurring definition registered"
        );
        Ok(definition)
    }

    /// Replace the editable fields of a definition
    pub async fn update_definition(
        &self,
        definition: RecurringDefinition,
    ) -> Result<RecurringDefinition, SchedulerError> {
        validate_definition(&definition)?;
        let existing = self.get(&definition.id).await?;
        if definition.enabled && !existing.enabled {
            self.check_origin_cap(&definition.origin).await?;
        }

        let mut updated = definition;
        updated.updated_at = self.clock.now();
        self.definitions.update_definition(&updated).await?;
        self.get(&updated.id).await
    }

    /// Stop firing; the definition is kept for audit
    pub async fn disable_definition(&self, id: &str) -> Result<RecurringDefinition, SchedulerError> {
        let disabled = self
            .definitions
            .set_definition_enabled(id, false, self.clock.now())
            .await
            .map_err(not_found)?;
        info!(definition_id = %id, "Recurring definition disabled");
        Ok(disabled)
    }

    pub async fn enable_definition(&self, id: &str) -> Result<RecurringDefinition, SchedulerError> {
        let existing = self.get(id).await?;
        if existing.enabled {
            return Ok(existing);
        }
        self.check_origin_cap(&existing.origin).await?;

        let enabled = self
            .definitions
            .set_definition_enabled(id, true, self.clock.now())
            .await
            .map_err(not_found)?;
        info!(definition_id = %id, "Recurring definition enabled");
        Ok(enabled)
    }

    pub async fn list_definitions(
        &self,
        origin: &str,
    ) -> Result<Vec<RecurringDefinition>, SchedulerError> {
        Ok(self.definitions.list_definitions_by_origin(origin).await?)
    }

    async fn get(&self, id: &str) -> Result<RecurringDefinition, SchedulerError> {
        self.definitions
            .get_definition(id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }

    async fn check_origin_cap(&self, origin: &str) -> Result<(), SchedulerError> {
        let active = self.definitions.count_active_by_origin(origin).await?;
        if active >= self.config.max_active_per_origin {
            return Err(SchedulerError::TooManyDefinitions {
                origin: origin.to_string(),
                limit: self.config.max_active_per_origin,
            });
        }
        Ok(())
    }
}

fn not_found(err: StoreError) -> SchedulerError {
    match err {
        StoreError::DefinitionNotFound(id) => SchedulerError::NotFound(id),
        other => SchedulerError::Store(other),
    }
}

fn validate_definition(definition: &RecurringDefinition) -> Result<(), SchedulerError> {
    let invalid = |msg: &str| Err(SchedulerError::InvalidDefinition(msg.to_string()));

    definition.cadence.validate()?;

    if definition.id.trim().is_empty() || definition.origin.trim().is_empty() {
        return invalid("id and origin are required");
    }
    if definition.source_account.trim().is_empty()
        || definition.destination_account.trim().is_empty()
    {
        return invalid("source and destination accounts are required");
    }
    if definition.source_account == definition.destination_account {
        return invalid("source and destination accounts must differ");
    }
    if definition.token.trim().is_empty() {
        return invalid("token is required");
    }
    match &definition.amount_spec {
        AmountSpec::Fixed { amount } if *amount <= Decimal::ZERO => {
            return invalid("fixed amount must be positive");
        }
        AmountSpec::Formula { reference } if reference.trim().is_empty() => {
            return invalid("formula reference is required");
        }
        _ => {}
    }
    if let DefinitionKind::Prompt { prompt } = &definition.kind {
        if prompt.trim().is_empty() {
            return invalid("scheduled prompt text is required");
        }
    }
    Ok(())
}
