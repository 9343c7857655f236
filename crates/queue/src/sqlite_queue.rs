use async_trait::async_trait;
use payflow_types::{Clock, TaskMessage};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{Delivery, QueueDepth, QueueError, TaskQueue};

const MIGRATION: &str = include_str!("../migrations/001_create_task_queue.sql");

/// Attempts at handing out a message before giving up on this poll
const MAX_CLAIM_RETRIES: usize = 5;

enum ClaimAttempt {
    Done(Option<Delivery>),
    /// The head message was dead-lettered or taken by someone else
    Retry,
}

/// Queue table living next to the payment store, usable from many processes
pub struct SqliteQueue {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    max_redeliveries: u32,
}

impl SqliteQueue {
    pub async fn new(
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
        max_redeliveries: u32,
    ) -> Result<Self, QueueError> {
        for statement in MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(Self {
            pool,
            clock,
            max_redeliveries,
        })
    }

    async fn try_claim(
        &self,
        consumer: &str,
        visibility_secs: u64,
        now: u64,
    ) -> Result<ClaimAttempt, QueueError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT seq, intent_id, enqueued_at, deliveries FROM task_queue
            WHERE dead_at IS NULL AND visible_at <= ?
            ORDER BY visible_at ASC, seq ASC
            LIMIT 1
            "#,
        )
        .bind(now as i64)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(ClaimAttempt::Done(None));
        };
        let seq: i64 = row.try_get("seq")?;
        let deliveries: i64 = row.try_get("deliveries")?;
        let intent_id: String = row.try_get("intent_id")?;

        if deliveries > i64::from(self.max_redeliveries) {
            sqlx::query("UPDATE task_queue SET dead_at = ?, receipt = NULL WHERE seq = ?")
                .bind(now as i64)
                .bind(seq)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            warn!(
                intent_id = %intent_id,
                deliveries,
                "Task dead-lettered after too many redeliveries"
            );
            return Ok(ClaimAttempt::Retry);
        }

        let receipt = format!("{consumer}:{}", uuid::Uuid::new_v4());
        let updated = sqlx::query(
            r#"
            UPDATE task_queue
            SET receipt = ?, consumer = ?, visible_at = ?, deliveries = deliveries + 1
            WHERE seq = ? AND deliveries = ? AND dead_at IS NULL
            "#,
        )
        .bind(&receipt)
        .bind(consumer)
        .bind(now.saturating_add(visibility_secs) as i64)
        .bind(seq)
        .bind(deliveries)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            return Ok(ClaimAttempt::Retry);
        }
        tx.commit().await?;

        Ok(ClaimAttempt::Done(Some(Delivery {
            receipt,
            message: TaskMessage {
                intent_id,
                enqueued_at: row.try_get::<i64, _>("enqueued_at")? as u64,
                redelivery_count: deliveries as u32,
            },
        })))
    }
}

#[async_trait]
impl TaskQueue for SqliteQueue {
    async fn enqueue(&self, message: TaskMessage) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            INSERT INTO task_queue (intent_id, enqueued_at, visible_at, deliveries)
            SELECT ?, ?, ?, ?
            WHERE NOT EXISTS (
                SELECT 1 FROM task_queue WHERE intent_id = ? AND dead_at IS NULL
            )
            "#,
        )
        .bind(&message.intent_id)
        .bind(message.enqueued_at as i64)
        .bind(self.clock.now() as i64)
        .bind(i64::from(message.redelivery_count))
        .bind(&message.intent_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn claim(
        &self,
        consumer: &str,
        visibility_secs: u64,
    ) -> Result<Option<Delivery>, QueueError> {
        let now = self.clock.now();
        for attempt in 0..MAX_CLAIM_RETRIES {
            match self.try_claim(consumer, visibility_secs, now).await? {
                ClaimAttempt::Done(delivery) => return Ok(delivery),
                ClaimAttempt::Retry => {
                    debug!(consumer, attempt, "Queue head changed, claiming again")
                }
            }
        }
        Ok(None)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let result = sqlx::query("DELETE FROM task_queue WHERE receipt = ? AND dead_at IS NULL")
            .bind(&delivery.receipt)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::StaleReceipt(delivery.receipt.clone()));
        }
        Ok(())
    }

    async fn release(&self, delivery: &Delivery, delay_secs: u64) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE task_queue SET receipt = NULL, consumer = NULL, visible_at = ? \
             WHERE receipt = ? AND dead_at IS NULL",
        )
        .bind(self.clock.now().saturating_add(delay_secs) as i64)
        .bind(&delivery.receipt)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::StaleReceipt(delivery.receipt.clone()));
        }
        Ok(())
    }

    async fn extend(&self, delivery: &Delivery, visibility_secs: u64) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE task_queue SET visible_at = ? WHERE receipt = ? AND dead_at IS NULL",
        )
        .bind(self.clock.now().saturating_add(visibility_secs) as i64)
        .bind(&delivery.receipt)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::StaleReceipt(delivery.receipt.clone()));
        }
        Ok(())
    }

    async fn depth(&self) -> Result<QueueDepth, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN dead_at IS NULL AND visible_at <= ? THEN 1 ELSE 0 END), 0) AS visible,
                COALESCE(SUM(CASE WHEN dead_at IS NULL AND visible_at > ? THEN 1 ELSE 0 END), 0) AS in_flight,
                COALESCE(SUM(CASE WHEN dead_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS dead
            FROM task_queue
            "#,
        )
        .bind(self.clock.now() as i64)
        .bind(self.clock.now() as i64)
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueDepth {
            visible: row.try_get::<i64, _>("visible")? as u64,
            in_flight: row.try_get::<i64, _>("in_flight")? as u64,
            dead: row.try_get::<i64, _>("dead")? as u64,
        })
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<TaskMessage>, QueueError> {
        let rows = sqlx::query(
            "SELECT intent_id, enqueued_at, deliveries FROM task_queue \
             WHERE dead_at IS NOT NULL ORDER BY dead_at ASC, seq ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(TaskMessage {
                    intent_id: row.try_get("intent_id")?,
                    enqueued_at: row.try_get::<i64, _>("enqueued_at")? as u64,
                    redelivery_count: row.try_get::<i64, _>("deliveries")? as u32,
                })
            })
            .collect()
    }
}
