//! Claim races across independent store handles sharing one database file

use payflow_store::{PaymentStore, SqliteStore, StoreError, Transition};
use payflow_types::{IntentStatus, NewPaymentIntent};
use rust_decimal_macros::dec;
use std::sync::Arc;

async fn file_store(dir: &tempfile::TempDir) -> SqliteStore {
    SqliteStore::new(dir.path().join("payflow.db")).await.unwrap()
}

#[tokio::test]
async fn test_one_winner_across_handles() {
    let dir = tempfile::tempdir().unwrap();
    let seed = file_store(&dir).await;
    let intent = seed
        .create(
            NewPaymentIntent::new("race-1", "chat:1", "src", "dst", dec!(10), "APT"),
            100,
        )
        .await
        .unwrap();

    // Separate pools behave like separate worker processes
    let mut handles = Vec::new();
    for n in 0..6 {
        let store = Arc::new(file_store(&dir).await);
        let id = intent.id.clone();
        handles.push(tokio::spawn(async move {
            store.claim(&id, &format!("worker-{n}"), 30, 110).await
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(claimed) => winners.push(claimed.claim_owner),
            Err(StoreError::ClaimConflict { .. }) | Err(StoreError::Contention(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(winners.len(), 1);

    let stored = seed.get(&intent.id).await.unwrap().unwrap();
    assert_eq!(stored.status, IntentStatus::Claimed);
    assert_eq!(stored.claim_owner, winners[0]);
}

#[tokio::test]
async fn test_reclaim_after_expiry_resumes_broadcast_intent() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir).await;
    let intent = store
        .create(
            NewPaymentIntent::new("race-2", "chat:1", "src", "dst", dec!(10), "APT"),
            100,
        )
        .await
        .unwrap();

    store.claim(&intent.id, "w1", 30, 100).await.unwrap();
    store
        .transition(
            &intent.id,
            Transition::new(IntentStatus::Claimed, IntentStatus::Submitting).by("w1"),
            101,
        )
        .await
        .unwrap();
    store
        .transition(
            &intent.id,
            Transition::new(IntentStatus::Submitting, IntentStatus::Submitted)
                .by("w1")
                .with_tx_ref("0xfeed"),
            102,
        )
        .await
        .unwrap();

    // w1 disappears; w2 cannot take over before the lease runs out
    assert!(store.claim(&intent.id, "w2", 30, 129).await.is_err());

    let resumed = store.claim(&intent.id, "w2", 30, 130).await.unwrap();
    assert_eq!(resumed.status, IntentStatus::Submitted);
    assert_eq!(resumed.chain_tx_ref.as_deref(), Some("0xfeed"));

    // The stale worker can no longer move the intent
    let err = store
        .transition(
            &intent.id,
            Transition::new(IntentStatus::Submitted, IntentStatus::Confirming).by("w1"),
            131,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ClaimLost { .. }));

    // Nor can anyone record a second transaction
    let err = store
        .transition(
            &intent.id,
            Transition::new(IntentStatus::Submitted, IntentStatus::Confirming)
                .by("w2")
                .with_tx_ref("0xbeef"),
            131,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::TxRefConflict { .. }));
}
