use async_trait::async_trait;
use payflow_types::{IntentStatus, NewPaymentIntent, PaymentIntent, RecurringDefinition};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::lifecycle::{self, Planned};
use crate::{DefinitionStore, Firing, PaymentStore, StateTransition, StoreError, Transition};

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct Inner {
    intents: HashMap<String, PaymentIntent>,
    by_key: HashMap<String, String>,
    transitions: HashMap<String, Vec<StateTransition>>,
    definitions: HashMap<String, RecurringDefinition>,
}

impl Inner {
    fn intent(&self, id: &str) -> Result<&PaymentIntent, StoreError> {
        self.intents
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn apply(&mut self, planned: Planned) -> PaymentIntent {
        let Planned { intent, history } = planned;
        if !history.is_empty() {
            self.transitions
                .entry(intent.id.clone())
                .or_default()
                .extend(history);
        }
        self.intents.insert(intent.id.clone(), intent.clone());
        intent
    }

    fn insert_new(&mut self, new: NewPaymentIntent, now: u64) -> Result<PaymentIntent, StoreError> {
        if let Some(existing_id) = self.by_key.get(&new.idempotency_key) {
            return Err(StoreError::DuplicateIntent {
                idempotency_key: new.idempotency_key,
                existing_id: existing_id.clone(),
            });
        }

        let intent = new.into_intent(lifecycle::new_intent_id(), now);
        self.by_key
            .insert(intent.idempotency_key.clone(), intent.id.clone());
        self.transitions
            .insert(intent.id.clone(), vec![lifecycle::creation_record(&intent)]);
        self.intents.insert(intent.id.clone(), intent.clone());
        Ok(intent)
    }
}

/// Single-process store; one lock makes every operation atomic
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of intents (for testing)
    pub async fn len(&self) -> usize {
        self.inner.lock().await.intents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.intents.is_empty()
    }
}

fn sorted_by_created(mut intents: Vec<PaymentIntent>, limit: usize) -> Vec<PaymentIntent> {
    intents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    intents.truncate(limit);
    intents
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn create(&self, new: NewPaymentIntent, now: u64) -> Result<PaymentIntent, StoreError> {
        self.inner.lock().await.insert_new(new, now)
    }

    async fn claim(
        &self,
        id: &str,
        worker_id: &str,
        lease_secs: u64,
        now: u64,
    ) -> Result<PaymentIntent, StoreError> {
        let mut inner = self.inner.lock().await;
        let planned = lifecycle::plan_claim(inner.intent(id)?, worker_id, lease_secs, now)?;
        Ok(inner.apply(planned))
    }

    async fn renew(
        &self,
        id: &str,
        worker_id: &str,
        lease_secs: u64,
        now: u64,
    ) -> Result<PaymentIntent, StoreError> {
        let mut inner = self.inner.lock().await;
        let renewed = lifecycle::plan_renew(inner.intent(id)?, worker_id, lease_secs, now)?;
        inner.intents.insert(renewed.id.clone(), renewed.clone());
        Ok(renewed)
    }

    async fn transition(
        &self,
        id: &str,
        transition: Transition,
        now: u64,
    ) -> Result<PaymentIntent, StoreError> {
        let mut inner = self.inner.lock().await;
        let planned = lifecycle::plan_transition(inner.intent(id)?, &transition, now)?;
        Ok(inner.apply(planned))
    }

    async fn cancel(&self, id: &str, reason: &str, now: u64) -> Result<PaymentIntent, StoreError> {
        let mut inner = self.inner.lock().await;
        let planned = lifecycle::plan_cancel(inner.intent(id)?, reason, now)?;
        Ok(inner.apply(planned))
    }

    async fn mark_notified(&self, id: &str, now: u64) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match lifecycle::plan_notified(inner.intent(id)?, now) {
            Some(notified) => {
                inner.intents.insert(notified.id.clone(), notified);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<PaymentIntent>, StoreError> {
        Ok(self.inner.lock().await.intents.get(id).cloned())
    }

    async fn get_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentIntent>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .by_key
            .get(key)
            .and_then(|id| inner.intents.get(id))
            .cloned())
    }

    async fn list_by_status(
        &self,
        status: IntentStatus,
        limit: usize,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        let inner = self.inner.lock().await;
        let matching = inner
            .intents
            .values()
            .filter(|i| i.status == status)
            .cloned()
            .collect();
        Ok(sorted_by_created(matching, limit))
    }

    async fn list_due_for_reclaim(
        &self,
        now: u64,
        limit: usize,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        let inner = self.inner.lock().await;
        let mut due: Vec<_> = inner
            .intents
            .values()
            .filter(|i| i.is_claim_abandoned(now))
            .cloned()
            .collect();
        due.sort_by_key(|i| i.claim_expires_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn list_stale_pending(
        &self,
        updated_before: u64,
        limit: usize,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        let inner = self.inner.lock().await;
        let stale = inner
            .intents
            .values()
            .filter(|i| i.status == IntentStatus::Pending && i.updated_at <= updated_before)
            .cloned()
            .collect();
        Ok(sorted_by_created(stale, limit))
    }

    async fn list_unnotified(&self, limit: usize) -> Result<Vec<PaymentIntent>, StoreError> {
        let inner = self.inner.lock().await;
        let mut unnotified: Vec<_> = inner
            .intents
            .values()
            .filter(|i| i.needs_notification())
            .cloned()
            .collect();
        unnotified.sort_by_key(|i| i.updated_at);
        unnotified.truncate(limit);
        Ok(unnotified)
    }

    async fn get_history(&self, id: &str) -> Result<Vec<StateTransition>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .transitions
            .get(id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl DefinitionStore for InMemoryStore {
    async fn create_definition(
        &self,
        definition: &RecurringDefinition,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.definitions.contains_key(&definition.id) {
            return Err(StoreError::DuplicateDefinition(definition.id.clone()));
        }
        inner
            .definitions
            .insert(definition.id.clone(), definition.clone());
        Ok(())
    }

    async fn update_definition(
        &self,
        definition: &RecurringDefinition,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let existing = inner
            .definitions
            .get_mut(&definition.id)
            .ok_or_else(|| StoreError::DefinitionNotFound(definition.id.clone()))?;

        // Run bookkeeping belongs to the scheduler
        let mut updated = definition.clone();
        updated.last_run_at = existing.last_run_at;
        updated.run_count = existing.run_count;
        updated.last_intent_id = existing.last_intent_id.clone();
        updated.created_at = existing.created_at;
        *existing = updated;
        Ok(())
    }

    async fn get_definition(&self, id: &str) -> Result<Option<RecurringDefinition>, StoreError> {
        Ok(self.inner.lock().await.definitions.get(id).cloned())
    }

    async fn list_definitions_by_origin(
        &self,
        origin: &str,
    ) -> Result<Vec<RecurringDefinition>, StoreError> {
        let inner = self.inner.lock().await;
        let mut definitions: Vec<_> = inner
            .definitions
            .values()
            .filter(|d| d.origin == origin)
            .cloned()
            .collect();
        definitions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(definitions)
    }

    async fn count_active_by_origin(&self, origin: &str) -> Result<usize, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .definitions
            .values()
            .filter(|d| d.enabled && d.origin == origin)
            .count())
    }

    async fn list_due_definitions(
        &self,
        now: u64,
        limit: usize,
    ) -> Result<Vec<RecurringDefinition>, StoreError> {
        let inner = self.inner.lock().await;
        let mut due: Vec<_> = inner
            .definitions
            .values()
            .filter(|d| d.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.next_due_at.cmp(&b.next_due_at).then(a.id.cmp(&b.id)));
        due.truncate(limit);
        Ok(due)
    }

    async fn set_definition_enabled(
        &self,
        id: &str,
        enabled: bool,
        now: u64,
    ) -> Result<RecurringDefinition, StoreError> {
        let mut inner = self.inner.lock().await;
        let definition = inner
            .definitions
            .get_mut(id)
            .ok_or_else(|| StoreError::DefinitionNotFound(id.to_string()))?;
        definition.enabled = enabled;
        definition.updated_at = now;
        Ok(definition.clone())
    }

    async fn fire_definition(
        &self,
        firing: Firing,
        now: u64,
    ) -> Result<Vec<PaymentIntent>, StoreError> {
        let mut inner = self.inner.lock().await;
        let definition = inner
            .definitions
            .get(&firing.definition_id)
            .ok_or_else(|| StoreError::DefinitionNotFound(firing.definition_id.clone()))?;
        let mut advanced = lifecycle::plan_firing(definition, &firing, now)?;

        // Check every key first so a rejected firing leaves nothing behind
        for new in &firing.intents {
            if let Some(existing_id) = inner.by_key.get(&new.idempotency_key) {
                return Err(StoreError::DuplicateIntent {
                    idempotency_key: new.idempotency_key.clone(),
                    existing_id: existing_id.clone(),
                });
            }
        }

        let mut created = Vec::with_capacity(firing.intents.len());
        for new in firing.intents {
            created.push(inner.insert_new(new, now)?);
        }

        if let Some(last) = created.last() {
            advanced.last_intent_id = Some(last.id.clone());
        }
        inner.definitions.insert(advanced.id.clone(), advanced);
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payflow_types::{AmountSpec, Cadence};
    use rust_decimal_macros::dec;

    fn new_intent(key: &str) -> NewPaymentIntent {
        NewPaymentIntent::new(key, "chat:1", "src", "dst", dec!(100), "APT")
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryStore::new();
        let intent = store.create(new_intent("k1"), 10).await.unwrap();

        assert_eq!(store.get(&intent.id).await.unwrap(), Some(intent.clone()));
        assert_eq!(
            store.get_by_idempotency_key("k1").await.unwrap(),
            Some(intent)
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_key_returns_existing_id() {
        let store = InMemoryStore::new();
        let first = store.create(new_intent("k1"), 10).await.unwrap();

        match store.create(new_intent("k1"), 11).await {
            Err(StoreError::DuplicateIntent { existing_id, .. }) => {
                assert_eq!(existing_id, first.id)
            }
            other => panic!("expected DuplicateIntent, got {other:?}"),
        }
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let store = InMemoryStore::new();
        let intent = store.create(new_intent("k1"), 10).await.unwrap();

        let attempts = (0..16).map(|n| {
            let store = store.clone();
            let id = intent.id.clone();
            tokio::spawn(async move { store.claim(&id, &format!("w{n}"), 30, 20).await })
        });

        let mut winners = 0;
        for handle in attempts {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(e) => assert!(e.is_conflict(), "unexpected error {e}"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_reclaim_queries() {
        let store = InMemoryStore::new();
        let a = store.create(new_intent("a"), 10).await.unwrap();
        let b = store.create(new_intent("b"), 10).await.unwrap();
        store.claim(&a.id, "w1", 30, 20).await.unwrap();

        assert!(store.list_due_for_reclaim(49, 10).await.unwrap().is_empty());
        let due = store.list_due_for_reclaim(50, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, a.id);

        let stale = store.list_stale_pending(10, 10).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, b.id);
    }

    #[tokio::test]
    async fn test_history_records_transitions() {
        let store = InMemoryStore::new();
        let intent = store.create(new_intent("k1"), 10).await.unwrap();
        store.claim(&intent.id, "w1", 30, 11).await.unwrap();
        store
            .transition(
                &intent.id,
                Transition::new(IntentStatus::Claimed, IntentStatus::Submitting).by("w1"),
                12,
            )
            .await
            .unwrap();

        let history = store.get_history(&intent.id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].from_status, IntentStatus::Pending);
        assert_eq!(history[0].timestamp, 10);
        assert_eq!(history[0].details.as_deref(), Some("created"));
        assert_eq!(history[2].to_status, IntentStatus::Submitting);
    }

    #[tokio::test]
    async fn test_fire_definition_is_all_or_nothing() {
        let store = InMemoryStore::new();
        let definition = RecurringDefinition::new(
            "def-1",
            "chat:1",
            "src",
            "dst",
            "APT",
            AmountSpec::Fixed { amount: dec!(5) },
            Cadence::every(300),
            1_000,
            900,
        );
        store.create_definition(&definition).await.unwrap();
        store.create(new_intent("taken"), 10).await.unwrap();

        let firing = Firing {
            definition_id: "def-1".to_string(),
            expected_due_at: 1_000,
            next_due_at: Some(1_300),
            intents: vec![new_intent("fresh"), new_intent("taken")],
        };
        assert!(matches!(
            store.fire_definition(firing, 1_001).await,
            Err(StoreError::DuplicateIntent { .. })
        ));
        assert!(store.get_by_idempotency_key("fresh").await.unwrap().is_none());
        let unchanged = store.get_definition("def-1").await.unwrap().unwrap();
        assert_eq!(unchanged.next_due_at, 1_000);

        let firing = Firing {
            definition_id: "def-1".to_string(),
            expected_due_at: 1_000,
            next_due_at: Some(1_300),
            intents: vec![new_intent("fresh")],
        };
        let created = store.fire_definition(firing.clone(), 1_001).await.unwrap();
        assert_eq!(created.len(), 1);

        let advanced = store.get_definition("def-1").await.unwrap().unwrap();
        assert_eq!(advanced.next_due_at, 1_300);
        assert_eq!(advanced.run_count, 1);
        assert_eq!(advanced.last_intent_id, Some(created[0].id.clone()));

        // A second scheduler racing on the same cycle loses
        assert!(matches!(
            store.fire_definition(firing, 1_002).await,
            Err(StoreError::StaleDefinition { .. })
        ));
    }
}
