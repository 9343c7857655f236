use async_trait::async_trait;
use payflow_types::{Clock, TaskMessage};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::warn;

use crate::{Delivery, QueueDepth, QueueError, TaskQueue};

#[derive(Debug)]
struct Entry {
    message: TaskMessage,
    visible_at: u64,
    deliveries: u32,
    receipt: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    next_seq: u64,
    entries: BTreeMap<u64, Entry>,
    dead: Vec<TaskMessage>,
}

impl Inner {
    fn by_receipt(&mut self, receipt: &str) -> Result<(u64, &mut Entry), QueueError> {
        self.entries
            .iter_mut()
            .find(|(_, entry)| entry.receipt.as_deref() == Some(receipt))
            .map(|(seq, entry)| (*seq, entry))
            .ok_or_else(|| QueueError::StaleReceipt(receipt.to_string()))
    }
}

/// In-process queue for tests and single-node runs
pub struct InMemoryQueue {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    max_redeliveries: u32,
    notify: Notify,
}

impl InMemoryQueue {
    pub fn new(clock: Arc<dyn Clock>, max_redeliveries: u32) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
            max_redeliveries,
            notify: Notify::new(),
        }
    }

    /// Intent ids of every live message, in queue order (for testing)
    pub async fn pending_intents(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .entries
            .values()
            .map(|entry| entry.message.intent_id.clone())
            .collect()
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn enqueue(&self, message: TaskMessage) -> Result<bool, QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        if inner
            .entries
            .values()
            .any(|entry| entry.message.intent_id == message.intent_id)
        {
            return Ok(false);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            seq,
            Entry {
                visible_at: now,
                message,
                deliveries: 0,
                receipt: None,
            },
        );
        drop(inner);

        self.notify.notify_one();
        Ok(true)
    }

    async fn claim(
        &self,
        consumer: &str,
        visibility_secs: u64,
    ) -> Result<Option<Delivery>, QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        loop {
            let next = inner
                .entries
                .iter()
                .filter(|(_, entry)| entry.visible_at <= now)
                .min_by_key(|(seq, entry)| (entry.visible_at, **seq))
                .map(|(seq, _)| *seq);
            let Some(seq) = next else {
                return Ok(None);
            };

            let over_limit = inner
                .entries
                .get(&seq)
                .is_some_and(|entry| entry.deliveries > self.max_redeliveries);
            if over_limit {
                if let Some(entry) = inner.entries.remove(&seq) {
                    warn!(
                        intent_id = %entry.message.intent_id,
                        deliveries = entry.deliveries,
                        "Task dead-lettered after too many redeliveries"
                    );
                    inner.dead.push(entry.message);
                }
                continue;
            }

            let Some(entry) = inner.entries.get_mut(&seq) else {
                return Ok(None);
            };
            let receipt = format!("{consumer}:{}", uuid::Uuid::new_v4());
            entry.receipt = Some(receipt.clone());
            entry.visible_at = now.saturating_add(visibility_secs);
            entry.message.redelivery_count = entry.deliveries;
            entry.deliveries += 1;

            return Ok(Some(Delivery {
                receipt,
                message: entry.message.clone(),
            }));
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let (seq, _) = inner.by_receipt(&delivery.receipt)?;
        inner.entries.remove(&seq);
        Ok(())
    }

    async fn release(&self, delivery: &Delivery, delay_secs: u64) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let (_, entry) = inner.by_receipt(&delivery.receipt)?;
        entry.receipt = None;
        entry.visible_at = now.saturating_add(delay_secs);
        drop(inner);

        if delay_secs == 0 {
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn extend(&self, delivery: &Delivery, visibility_secs: u64) -> Result<(), QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let (_, entry) = inner.by_receipt(&delivery.receipt)?;
        entry.visible_at = now.saturating_add(visibility_secs);
        Ok(())
    }

    async fn depth(&self) -> Result<QueueDepth, QueueError> {
        let now = self.clock.now();
        let inner = self.inner.lock().await;
        let visible = inner
            .entries
            .values()
            .filter(|entry| entry.visible_at <= now)
            .count() as u64;

        Ok(QueueDepth {
            visible,
            in_flight: inner.entries.len() as u64 - visible,
            dead: inner.dead.len() as u64,
        })
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<TaskMessage>, QueueError> {
        Ok(self
            .inner
            .lock()
            .await
            .dead
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn wait_for_work(&self, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.notify.notified()).await;
    }
}
