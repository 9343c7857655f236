use async_trait::async_trait;
use payflow_types::{
    FeeBreakdown, IntentStatus, NewPaymentIntent, PaymentIntent, RecurringDefinition,
};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::lifecycle::{self, Planned};
use crate::{DefinitionStore, Firing, PaymentStore, StateTransition, StoreError, Transition};

const MIGRATIONS: [&str; 3] = [
    include_str!("../migrations/001_create_payment_intents.sql"),
    include_str!("../migrations/002_create_intent_transitions.sql"),
    include_str!("../migrations/003_create_recurring_definitions.sql"),
];

/// Attempts at a versioned update before reporting contention
const MAX_CAS_RETRIES: usize = 5;

const CLAIMED_STATUSES: &str = "('Claimed', 'Submitting', 'Submitted', 'Confirming')";
const TERMINAL_STATUSES: &str = "('Confirmed', 'Failed', 'Expired')";

// ═══════════════════════════════════════════════════════════════════════════
// SQLITE STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════

/// Durable store shared by worker processes through one database file.
///
/// Every mutation reads the row, plans the change with the lifecycle rules
/// and writes it back guarded by the row version, all inside a transaction.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path`
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Self::with_pool(pool).await
    }

    /// Create an in-memory SQLite database (for testing)
    pub async fn in_memory() -> Result<Self, StoreError> {
        // Each connection would get its own private database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Connection pool, for components sharing the same database
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        for migration in MIGRATIONS {
            for statement in migration
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
            {
                sqlx::query(statement).execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    async fn mutate<F>(&self, id: &str, plan: F) -> Result<PaymentIntent, StoreError>
    where
        F: Fn(&PaymentIntent) -> Result<Planned, StoreError> + Send + Sync,
    {
        for attempt in 0..MAX_CAS_RETRIES {
            match self.try_mutate(id, &plan).await {
                Ok(Some(intent)) => return Ok(intent),
                Ok(None) | Err(StoreError::Contention(_)) => {
                    debug!(intent_id = %id, attempt, "intent changed during update, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::Contention(id.to_string()))
    }

    /// `Ok(None)` when another writer got in between read and write
    async fn try_mutate<F>(&self, id: &str, plan: &F) -> Result<Option<PaymentIntent>, StoreError>
    where
        F: Fn(&PaymentIntent) -> Result<Planned, StoreError> + Send + Sync,
    {
        let mut tx = self.pool.begin().await?;
        let (current, version) = fetch_intent(&mut tx, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let planned = plan(&current)?;
        if !write_intent(&mut tx, &planned.intent, version).await? {
            return Ok(None);
        }
        for transition in &planned.history {
            insert_transition(&mut tx, id, transition).await?;
        }
        tx.commit().await?;

        Ok(Some(planned.intent))
    }

    async fn fetch_many(
        &self,
        sql: &str,
        bound: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        let mut query = sqlx::query(sql);
        if let Some(value) = bound {
            query = query.bind(value);
        }
        let rows = query
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_intent).collect()
    }
}

#[async_trait]
impl PaymentStore for SqliteStore {
    async fn create(&self, new: NewPaymentIntent, now: u64) -> Result<PaymentIntent, StoreError> {
        let intent = new.into_intent(lifecycle::new_intent_id(), now);
        let mut tx = self.pool.begin().await?;

        match insert_intent(&mut tx, &intent).await {
            Ok(()) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(duplicate_of(&mut tx, &intent.idempotency_key).await);
            }
            Err(e) => return Err(e.into()),
        }
        insert_transition(&mut tx, &intent.id, &lifecycle::creation_record(&intent)).await?;
        tx.commit().await?;
        Ok(intent)
    }

    async fn claim(
        &self,
        id: &str,
        worker_id: &str,
        lease_secs: u64,
        now: u64,
    ) -> Result<PaymentIntent, StoreError> {
        self.mutate(id, |current| {
            lifecycle::plan_claim(current, worker_id, lease_secs, now)
        })
        .await
    }

    async fn renew(
        &self,
        id: &str,
        worker_id: &str,
        lease_secs: u64,
        now: u64,
    ) -> Result<PaymentIntent, StoreError> {
        self.mutate(id, |current| {
            Ok(Planned {
                intent: lifecycle::plan_renew(current, worker_id, lease_secs, now)?,
                history: Vec::new(),
            })
        })
        .await
    }

    async fn transition(
        &self,
        id: &str,
        transition: Transition,
        now: u64,
    ) -> Result<PaymentIntent, StoreError> {
        self.mutate(id, |current| {
            lifecycle::plan_transition(current, &transition, now)
        })
        .await
    }

    async fn cancel(&self, id: &str, reason: &str, now: u64) -> Result<PaymentIntent, StoreError> {
        self.mutate(id, |current| lifecycle::plan_cancel(current, reason, now))
            .await
    }

    async fn mark_notified(&self, id: &str, now: u64) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE payment_intents SET notified_at = ?, version = version + 1 \
             WHERE id = ? AND notified_at IS NULL AND status IN {TERMINAL_STATUSES}"
        );
        let result = sqlx::query(&sql)
            .bind(now as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        match self.get(id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<PaymentIntent>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_intent(&mut conn, id).await?.map(|(intent, _)| intent))
    }

    async fn get_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        let row = sqlx::query("SELECT * FROM payment_intents WHERE idempotency_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_intent).transpose()
    }

    async fn list_by_status(
        &self,
        status: IntentStatus,
        limit: usize,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM payment_intents WHERE status = ? ORDER BY created_at ASC, id ASC LIMIT ?",
        )
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_intent).collect()
    }

    async fn list_due_for_reclaim(
        &self,
        now: u64,
        limit: usize,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        let sql = format!(
            "SELECT * FROM payment_intents \
             WHERE status IN {CLAIMED_STATUSES} \
             AND (claim_owner IS NULL OR claim_expires_at IS NULL OR claim_expires_at <= ?) \
             ORDER BY claim_expires_at ASC LIMIT ?"
        );
        self.fetch_many(&sql, Some(now as i64), limit).await
    }

    async fn list_stale_pending(
        &self,
        updated_before: u64,
        limit: usize,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        self.fetch_many(
            "SELECT * FROM payment_intents WHERE status = 'Pending' AND updated_at <= ? \
             ORDER BY created_at ASC, id ASC LIMIT ?",
            Some(updated_before as i64),
            limit,
        )
        .await
    }

    async fn list_unnotified(&self, limit: usize) -> Result<Vec<PaymentIntent>, StoreError> {
        let sql = format!(
            "SELECT * FROM payment_intents \
             WHERE status IN {TERMINAL_STATUSES} AND notified_at IS NULL \
             ORDER BY updated_at ASC LIMIT ?"
        );
        self.fetch_many(&sql, None, limit).await
    }

    async fn get_history(&self, id: &str) -> Result<Vec<StateTransition>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM intent_transitions WHERE intent_id = ? ORDER BY seq ASC")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;

        rows.iter()
            .map(|row| {
                Ok(StateTransition {
                    from_status: parse_status(&row.try_get::<String, _>("from_status")?)?,
                    to_status: parse_status(&row.try_get::<String, _>("to_status")?)?,
                    timestamp: row.try_get::<i64, _>("timestamp")? as u64,
                    details: row.try_get("details")?,
                    tx_ref: row.try_get("tx_ref")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl DefinitionStore for SqliteStore {
    async fn create_definition(
        &self,
        definition: &RecurringDefinition,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO recurring_definitions (
                id, origin, kind, source_account, destination_account, token,
                amount_spec, cadence, next_due_at, enabled,
                last_run_at, run_count, last_intent_id, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&definition.id)
        .bind(&definition.origin)
        .bind(serde_json::to_string(&definition.kind)?)
        .bind(&definition.source_account)
        .bind(&definition.destination_account)
        .bind(&definition.token)
        .bind(serde_json::to_string(&definition.amount_spec)?)
        .bind(serde_json::to_string(&definition.cadence)?)
        .bind(definition.next_due_at as i64)
        .bind(definition.enabled)
        .bind(definition.last_run_at.map(|v| v as i64))
        .bind(definition.run_count as i64)
        .bind(&definition.last_intent_id)
        .bind(definition.created_at as i64)
        .bind(definition.updated_at as i64)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateDefinition(definition.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_definition(
        &self,
        definition: &RecurringDefinition,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE recurring_definitions
            SET origin = ?, kind = ?, source_account = ?, destination_account = ?,
                token = ?, amount_spec = ?, cadence = ?, next_due_at = ?, enabled = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&definition.origin)
        .bind(serde_json::to_string(&definition.kind)?)
        .bind(&definition.source_account)
        .bind(&definition.destination_account)
        .bind(&definition.token)
        .bind(serde_json::to_string(&definition.amount_spec)?)
        .bind(serde_json::to_string(&definition.cadence)?)
        .bind(definition.next_due_at as i64)
        .bind(definition.enabled)
        .bind(definition.updated_at as i64)
        .bind(&definition.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DefinitionNotFound(definition.id.clone()));
        }
        Ok(())
    }

    async fn get_definition(&self, id: &str) -> Result<Option<RecurringDefinition>, StoreError> {
        let row = sqlx::query("SELECT * FROM recurring_definitions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_definition).transpose()
    }

    async fn list_definitions_by_origin(
        &self,
        origin: &str,
    ) -> Result<Vec<RecurringDefinition>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM recurring_definitions WHERE origin = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(origin)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_definition).collect()
    }

    async fn count_active_by_origin(&self, origin: &str) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM recurring_definitions WHERE origin = ? AND enabled = 1",
        )
        .bind(origin)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as usize)
    }

    async fn list_due_definitions(
        &self,
        now: u64,
        limit: usize,
    ) -> Result<Vec<RecurringDefinition>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM recurring_definitions WHERE enabled = 1 AND next_due_at <= ? \
             ORDER BY next_due_at ASC, id ASC LIMIT ?",
        )
        .bind(now as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_definition).collect()
    }

    async fn set_definition_enabled(
        &self,
        id: &str,
        enabled: bool,
        now: u64,
    ) -> Result<RecurringDefinition, StoreError> {
        let result =
            sqlx::query("UPDATE recurring_definitions SET enabled = ?, updated_at = ? WHERE id = ?")
                .bind(enabled)
                .bind(now as i64)
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DefinitionNotFound(id.to_string()));
        }
        self.get_definition(id)
            .await?
            .ok_or_else(|| StoreError::DefinitionNotFound(id.to_string()))
    }

    async fn fire_definition(
        &self,
        firing: Firing,
        now: u64,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM recurring_definitions WHERE id = ?")
            .bind(&firing.definition_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::DefinitionNotFound(firing.definition_id.clone()))?;
        let definition = row_to_definition(&row)?;
        let mut advanced = lifecycle::plan_firing(&definition, &firing, now)?;

        // Any early return drops `tx`, rolling the whole firing back
        let mut created = Vec::with_capacity(firing.intents.len());
        for new in firing.intents {
            let intent = new.into_intent(lifecycle::new_intent_id(), now);
            match insert_intent(&mut tx, &intent).await {
                Ok(()) => {}
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    return Err(duplicate_of(&mut tx, &intent.idempotency_key).await);
                }
                Err(e) => return Err(e.into()),
            }
            insert_transition(&mut tx, &intent.id, &lifecycle::creation_record(&intent)).await?;
            created.push(intent);
        }

        if let Some(last) = created.last() {
            advanced.last_intent_id = Some(last.id.clone());
        }

        let result = sqlx::query(
            r#"
            UPDATE recurring_definitions
            SET next_due_at = ?, enabled = ?, run_count = ?, last_run_at = ?,
                last_intent_id = ?, updated_at = ?
            WHERE id = ? AND next_due_at = ? AND enabled = 1
            "#,
        )
        .bind(advanced.next_due_at as i64)
        .bind(advanced.enabled)
        .bind(advanced.run_count as i64)
        .bind(advanced.last_run_at.map(|v| v as i64))
        .bind(&advanced.last_intent_id)
        .bind(advanced.updated_at as i64)
        .bind(&advanced.id)
        .bind(firing.expected_due_at as i64)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::StaleDefinition {
                id: advanced.id,
                expected_due_at: firing.expected_due_at,
                actual_due_at: definition.next_due_at,
            });
        }

        tx.commit().await?;
        Ok(created)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════

async fn fetch_intent(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<(PaymentIntent, i64)>, StoreError> {
    let row = sqlx::query("SELECT * FROM payment_intents WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => Ok(Some((row_to_intent(&row)?, row.try_get("version")?))),
        None => Ok(None),
    }
}

async fn insert_intent(conn: &mut SqliteConnection, intent: &PaymentIntent) -> Result<(), sqlx::Error> {
    let fees = FeeColumns::from(intent.fees.as_ref());

    sqlx::query(
        r#"
        INSERT INTO payment_intents (
            id, idempotency_key, origin, source_account, destination_account,
            requested_amount, token, status, claim_owner, claim_expires_at,
            chain_tx_ref, submission_key, attempt_count, last_error,
            transfer_amount, network_fee, platform_fee, definition_id,
            submitted_at, notified_at, created_at, updated_at, version
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
        "#,
    )
    .bind(&intent.id)
    .bind(&intent.idempotency_key)
    .bind(&intent.origin)
    .bind(&intent.source_account)
    .bind(&intent.destination_account)
    .bind(intent.requested_amount.to_string())
    .bind(&intent.token)
    .bind(intent.status.as_str())
    .bind(&intent.claim_owner)
    .bind(intent.claim_expires_at.map(|v| v as i64))
    .bind(&intent.chain_tx_ref)
    .bind(&intent.submission_key)
    .bind(intent.attempt_count as i64)
    .bind(&intent.last_error)
    .bind(fees.transfer_amount)
    .bind(fees.network_fee)
    .bind(fees.platform_fee)
    .bind(&intent.definition_id)
    .bind(intent.submitted_at.map(|v| v as i64))
    .bind(intent.notified_at.map(|v| v as i64))
    .bind(intent.created_at as i64)
    .bind(intent.updated_at as i64)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Write back a planned record; `false` if the row version moved on
async fn write_intent(
    conn: &mut SqliteConnection,
    intent: &PaymentIntent,
    version: i64,
) -> Result<bool, StoreError> {
    let fees = FeeColumns::from(intent.fees.as_ref());

    let result = sqlx::query(
        r#"
        UPDATE payment_intents
        SET status = ?, claim_owner = ?, claim_expires_at = ?, chain_tx_ref = ?,
            submission_key = ?, attempt_count = ?, last_error = ?,
            transfer_amount = ?, network_fee = ?, platform_fee = ?,
            submitted_at = ?, notified_at = ?, updated_at = ?, version = version + 1
        WHERE id = ? AND version = ?
        "#,
    )
    .bind(intent.status.as_str())
    .bind(&intent.claim_owner)
    .bind(intent.claim_expires_at.map(|v| v as i64))
    .bind(&intent.chain_tx_ref)
    .bind(&intent.submission_key)
    .bind(intent.attempt_count as i64)
    .bind(&intent.last_error)
    .bind(fees.transfer_amount)
    .bind(fees.network_fee)
    .bind(fees.platform_fee)
    .bind(intent.submitted_at.map(|v| v as i64))
    .bind(intent.notified_at.map(|v| v as i64))
    .bind(intent.updated_at as i64)
    .bind(&intent.id)
    .bind(version)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

async fn insert_transition(
    conn: &mut SqliteConnection,
    intent_id: &str,
    transition: &StateTransition,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO intent_transitions (
            intent_id, from_status, to_status, timestamp, details, tx_ref
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(intent_id)
    .bind(transition.from_status.as_str())
    .bind(transition.to_status.as_str())
    .bind(transition.timestamp as i64)
    .bind(&transition.details)
    .bind(&transition.tx_ref)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn duplicate_of(conn: &mut SqliteConnection, idempotency_key: &str) -> StoreError {
    let existing: Result<Option<String>, sqlx::Error> =
        sqlx::query_scalar("SELECT id FROM payment_intents WHERE idempotency_key = ?")
            .bind(idempotency_key)
            .fetch_optional(&mut *conn)
            .await;

    match existing {
        Ok(Some(existing_id)) => StoreError::DuplicateIntent {
            idempotency_key: idempotency_key.to_string(),
            existing_id,
        },
        Ok(None) => StoreError::Database(format!(
            "unique violation on idempotency key {idempotency_key} without a matching row"
        )),
        Err(e) => e.into(),
    }
}

struct FeeColumns {
    transfer_amount: Option<String>,
    network_fee: Option<String>,
    platform_fee: Option<String>,
}

impl From<Option<&FeeBreakdown>> for FeeColumns {
    fn from(fees: Option<&FeeBreakdown>) -> Self {
        Self {
            transfer_amount: fees.map(|f| f.transfer_amount.to_string()),
            network_fee: fees.map(|f| f.network_fee.to_string()),
            platform_fee: fees.map(|f| f.platform_fee.to_string()),
        }
    }
}

fn row_to_intent(row: &SqliteRow) -> Result<PaymentIntent, StoreError> {
    let transfer_amount: Option<String> = row.try_get("transfer_amount")?;
    let network_fee: Option<String> = row.try_get("network_fee")?;
    let platform_fee: Option<String> = row.try_get("platform_fee")?;

    let fees = match (transfer_amount, network_fee, platform_fee) {
        (Some(transfer), Some(network), Some(platform)) => Some(FeeBreakdown {
            transfer_amount: parse_decimal(&transfer)?,
            network_fee: parse_decimal(&network)?,
            platform_fee: parse_decimal(&platform)?,
        }),
        _ => None,
    };

    Ok(PaymentIntent {
        id: row.try_get("id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        origin: row.try_get("origin")?,
        source_account: row.try_get("source_account")?,
        destination_account: row.try_get("destination_account")?,
        requested_amount: parse_decimal(&row.try_get::<String, _>("requested_amount")?)?,
        token: row.try_get("token")?,
        status: parse_status(&row.try_get::<String, _>("status")?)?,
        claim_owner: row.try_get("claim_owner")?,
        claim_expires_at: row
            .try_get::<Option<i64>, _>("claim_expires_at")?
            .map(|v| v as u64),
        chain_tx_ref: row.try_get("chain_tx_ref")?,
        submission_key: row.try_get("submission_key")?,
        attempt_count: row.try_get::<i64, _>("attempt_count")? as u32,
        last_error: row.try_get("last_error")?,
        fees,
        definition_id: row.try_get("definition_id")?,
        submitted_at: row
            .try_get::<Option<i64>, _>("submitted_at")?
            .map(|v| v as u64),
        notified_at: row
            .try_get::<Option<i64>, _>("notified_at")?
            .map(|v| v as u64),
        created_at: row.try_get::<i64, _>("created_at")? as u64,
        updated_at: row.try_get::<i64, _>("updated_at")? as u64,
    })
}

fn row_to_definition(row: &SqliteRow) -> Result<RecurringDefinition, StoreError> {
    Ok(RecurringDefinition {
        id: row.try_get("id")?,
        origin: row.try_get("origin")?,
        kind: serde_json::from_str(&row.try_get::<String, _>("kind")?)?,
        source_account: row.try_get("source_account")?,
        destination_account: row.try_get("destination_account")?,
        token: row.try_get("token")?,
        amount_spec: serde_json::from_str(&row.try_get::<String, _>("amount_spec")?)?,
        cadence: serde_json::from_str(&row.try_get::<String, _>("cadence")?)?,
        next_due_at: row.try_get::<i64, _>("next_due_at")? as u64,
        enabled: row.try_get("enabled")?,
        last_run_at: row
            .try_get::<Option<i64>, _>("last_run_at")?
            .map(|v| v as u64),
        run_count: row.try_get::<i64, _>("run_count")? as u64,
        last_intent_id: row.try_get("last_intent_id")?,
        created_at: row.try_get::<i64, _>("created_at")? as u64,
        updated_at: row.try_get::<i64, _>("updated_at")? as u64,
    })
}

fn parse_status(s: &str) -> Result<IntentStatus, StoreError> {
    IntentStatus::from_str(s).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn parse_decimal(s: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(s).map_err(|e| StoreError::Serialization(format!("{s}: {e}")))
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
