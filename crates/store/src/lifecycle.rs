//! Lifecycle rules shared by every backend.
//!
//! Each `plan_*` function takes the current record and returns the record to
//! write plus the history to append, or the error explaining why the change
//! is refused. Backends only have to make read-plan-write atomic.

use payflow_types::{FailureReason, IntentStatus, PaymentIntent, RecurringDefinition};

use crate::{Firing, StateTransition, StoreError, Transition};

/// Result of a planned intent mutation
#[derive(Debug, Clone, PartialEq)]
pub struct Planned {
    pub intent: PaymentIntent,
    pub history: Vec<StateTransition>,
}

pub fn new_intent_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// First history row of every intent
pub fn creation_record(intent: &PaymentIntent) -> StateTransition {
    let details = match &intent.definition_id {
        Some(definition_id) => format!("created by definition {definition_id}"),
        None => "created".to_string(),
    };
    StateTransition::new(IntentStatus::Pending, IntentStatus::Pending, intent.created_at)
        .with_details(details)
}

pub fn plan_claim(
    intent: &PaymentIntent,
    worker_id: &str,
    lease_secs: u64,
    now: u64,
) -> Result<Planned, StoreError> {
    if intent.status.is_terminal() {
        return Err(StoreError::AlreadyFinal {
            id: intent.id.clone(),
            status: intent.status,
        });
    }

    let mut next = intent.clone();
    let mut history = Vec::new();

    if intent.status == IntentStatus::Pending {
        next.status = IntentStatus::Claimed;
        history.push(
            StateTransition::new(IntentStatus::Pending, IntentStatus::Claimed, now)
                .with_details(format!("claimed by {worker_id}")),
        );
    } else if intent.claim_owner.as_deref() != Some(worker_id) {
        if intent.has_live_claim(now) {
            return Err(StoreError::ClaimConflict {
                id: intent.id.clone(),
                owner: intent.claim_owner.clone().unwrap_or_default(),
                expires_at: intent.claim_expires_at.unwrap_or_default(),
            });
        }

        let previous = intent.claim_owner.as_deref().unwrap_or("nobody");
        if intent.status.is_broadcast() {
            // Never back to Pending once a transaction may exist
            history.push(
                StateTransition::new(intent.status, intent.status, now).with_details(format!(
                    "claim of {previous} expired, resumed by {worker_id}"
                )),
            );
        } else {
            history.push(
                StateTransition::new(intent.status, IntentStatus::Pending, now)
                    .with_details(format!("claim of {previous} expired")),
            );
            history.push(
                StateTransition::new(IntentStatus::Pending, IntentStatus::Claimed, now)
                    .with_details(format!("claimed by {worker_id}")),
            );
            next.status = IntentStatus::Claimed;
        }
    }

    next.claim_owner = Some(worker_id.to_string());
    next.claim_expires_at = Some(now.saturating_add(lease_secs));
    next.updated_at = now;

    Ok(Planned {
        intent: next,
        history,
    })
}

pub fn plan_renew(
    intent: &PaymentIntent,
    worker_id: &str,
    lease_secs: u64,
    now: u64,
) -> Result<PaymentIntent, StoreError> {
    if intent.status.is_terminal() {
        return Err(StoreError::AlreadyFinal {
            id: intent.id.clone(),
            status: intent.status,
        });
    }
    ensure_owner(intent, worker_id)?;

    let mut next = intent.clone();
    next.claim_expires_at = Some(now.saturating_add(lease_secs));
    next.updated_at = now;
    Ok(next)
}

pub fn plan_transition(
    intent: &PaymentIntent,
    transition: &Transition,
    now: u64,
) -> Result<Planned, StoreError> {
    if intent.status != transition.expected {
        return Err(StoreError::StaleTransition {
            id: intent.id.clone(),
            expected: transition.expected,
            actual: intent.status,
        });
    }

    let invalid = || StoreError::InvalidTransition {
        id: intent.id.clone(),
        from: transition.expected,
        to: transition.next,
    };

    if !transition.expected.can_transition_to(transition.next) {
        return Err(invalid());
    }

    // Ownership only changes hands inside `claim`, so a matching owner
    // means nobody else took over even if the lease ran out.
    if let Some(owner) = transition.owner.as_deref() {
        ensure_owner(intent, owner)?;
    }

    let mut next = intent.clone();

    if let Some(tx_ref) = transition.chain_tx_ref.as_deref() {
        match intent.chain_tx_ref.as_deref() {
            Some(existing) if existing != tx_ref => {
                return Err(StoreError::TxRefConflict {
                    id: intent.id.clone(),
                    existing: existing.to_string(),
                });
            }
            _ => next.chain_tx_ref = Some(tx_ref.to_string()),
        }
    }

    if transition.next == IntentStatus::Submitted && next.chain_tx_ref.is_none() {
        return Err(invalid());
    }
    if transition.next == IntentStatus::Expired && intent.may_be_broadcast() {
        return Err(invalid());
    }

    if transition.clear_submission_key {
        next.submission_key = None;
    }
    if let Some(key) = &transition.submission_key {
        next.submission_key = Some(key.clone());
    }
    if let Some(attempt_count) = transition.attempt_count {
        next.attempt_count = attempt_count;
    }
    if let Some(error) = &transition.last_error {
        next.last_error = Some(error.clone());
    }
    if let Some(fees) = transition.fees {
        next.fees = Some(fees);
    }

    next.status = transition.next;
    if transition.next == IntentStatus::Submitted && next.submitted_at.is_none() {
        next.submitted_at = Some(now);
    }

    if transition.next == IntentStatus::Pending || transition.next.is_terminal() {
        next.claim_owner = None;
        next.claim_expires_at = None;
    } else if let Some(expires_at) = transition.claim_expires_at {
        next.claim_expires_at = Some(expires_at);
    }
    next.updated_at = now;

    let mut history = Vec::new();
    let details = transition
        .details
        .clone()
        .or_else(|| transition.last_error.clone());
    if transition.expected != transition.next || details.is_some() {
        let mut record = StateTransition::new(transition.expected, transition.next, now);
        record.details = details;
        record.tx_ref = transition.chain_tx_ref.clone();
        history.push(record);
    }

    Ok(Planned {
        intent: next,
        history,
    })
}

pub fn plan_cancel(intent: &PaymentIntent, reason: &str, now: u64) -> Result<Planned, StoreError> {
    if intent.status.is_terminal() {
        return Err(StoreError::AlreadyFinal {
            id: intent.id.clone(),
            status: intent.status,
        });
    }
    if intent.may_be_broadcast() {
        return Err(StoreError::TooLateToCancel {
            id: intent.id.clone(),
            status: intent.status,
        });
    }

    let failure = FailureReason::Cancelled(reason.to_string()).to_string();
    let mut next = intent.clone();
    next.status = IntentStatus::Failed;
    next.last_error = Some(failure.clone());
    next.claim_owner = None;
    next.claim_expires_at = None;
    next.updated_at = now;

    Ok(Planned {
        intent: next,
        history: vec![
            StateTransition::new(intent.status, IntentStatus::Failed, now).with_details(failure)
        ],
    })
}

/// `None` when there is nothing to record
pub fn plan_notified(intent: &PaymentIntent, now: u64) -> Option<PaymentIntent> {
    if !intent.needs_notification() {
        return None;
    }
    let mut next = intent.clone();
    next.notified_at = Some(now);
    Some(next)
}

/// Advance a definition for a firing; `last_intent_id` is filled in by the caller
pub fn plan_firing(
    definition: &RecurringDefinition,
    firing: &Firing,
    now: u64,
) -> Result<RecurringDefinition, StoreError> {
    if !definition.enabled {
        return Err(StoreError::DefinitionDisabled(definition.id.clone()));
    }
    if definition.next_due_at != firing.expected_due_at {
        return Err(StoreError::StaleDefinition {
            id: definition.id.clone(),
            expected_due_at: firing.expected_due_at,
            actual_due_at: definition.next_due_at,
        });
    }

    let mut next = definition.clone();
    match firing.next_due_at {
        Some(next_due_at) => next.next_due_at = next_due_at,
        None => next.enabled = false,
    }
    if !firing.intents.is_empty() {
        next.run_count += firing.intents.len() as u64;
        next.last_run_at = Some(now);
    }
    next.updated_at = now;
    Ok(next)
}

fn ensure_owner(intent: &PaymentIntent, worker_id: &str) -> Result<(), StoreError> {
    if intent.claim_owner.as_deref() == Some(worker_id) {
        Ok(())
    } else {
        Err(StoreError::ClaimLost {
            id: intent.id.clone(),
            worker_id: worker_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payflow_types::NewPaymentIntent;
    use rust_decimal_macros::dec;

    fn pending() -> PaymentIntent {
        NewPaymentIntent::new("key", "chat:1", "src", "dst", dec!(10), "APT")
            .into_intent("intent-1".to_string(), 100)
    }

    fn held(status: IntentStatus, owner: &str, expires_at: u64) -> PaymentIntent {
        let mut intent = pending();
        intent.status = status;
        intent.claim_owner = Some(owner.to_string());
        intent.claim_expires_at = Some(expires_at);
        intent
    }

    #[test]
    fn test_claim_pending() {
        let planned = plan_claim(&pending(), "w1", 30, 200).unwrap();
        assert_eq!(planned.intent.status, IntentStatus::Claimed);
        assert_eq!(planned.intent.claim_owner.as_deref(), Some("w1"));
        assert_eq!(planned.intent.claim_expires_at, Some(230));
        assert_eq!(planned.history.len(), 1);
    }

    #[test]
    fn test_claim_live_claim_conflicts() {
        let intent = held(IntentStatus::Claimed, "w1", 230);
        let err = plan_claim(&intent, "w2", 30, 229).unwrap_err();
        assert!(matches!(err, StoreError::ClaimConflict { expires_at: 230, .. }));
        assert!(err.is_conflict());
    }

    #[test]
    fn test_same_owner_renews_on_claim() {
        let intent = held(IntentStatus::Submitting, "w1", 230);
        let planned = plan_claim(&intent, "w1", 30, 220).unwrap();
        assert_eq!(planned.intent.status, IntentStatus::Submitting);
        assert_eq!(planned.intent.claim_expires_at, Some(250));
        assert!(planned.history.is_empty());
    }

    #[test]
    fn test_expired_submitting_restarts_from_claimed() {
        let mut intent = held(IntentStatus::Submitting, "w1", 230);
        intent.submission_key = Some("intent-1:0".to_string());

        let planned = plan_claim(&intent, "w2", 30, 230).unwrap();
        assert_eq!(planned.intent.status, IntentStatus::Claimed);
        assert_eq!(planned.intent.claim_owner.as_deref(), Some("w2"));
        // The key survives so the new holder can look the submission up
        assert_eq!(planned.intent.submission_key.as_deref(), Some("intent-1:0"));

        let statuses: Vec<_> = planned
            .history
            .iter()
            .map(|t| (t.from_status, t.to_status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                (IntentStatus::Submitting, IntentStatus::Pending),
                (IntentStatus::Pending, IntentStatus::Claimed)
            ]
        );
    }

    #[test]
    fn test_expired_confirming_keeps_status() {
        let mut intent = held(IntentStatus::Confirming, "w1", 230);
        intent.chain_tx_ref = Some("0xabc".to_string());

        let planned = plan_claim(&intent, "w2", 30, 231).unwrap();
        assert_eq!(planned.intent.status, IntentStatus::Confirming);
        assert_eq!(planned.intent.chain_tx_ref.as_deref(), Some("0xabc"));
        assert_eq!(planned.intent.claim_owner.as_deref(), Some("w2"));
    }

    #[test]
    fn test_claim_terminal_is_final() {
        let mut intent = pending();
        intent.status = IntentStatus::Confirmed;
        assert!(matches!(
            plan_claim(&intent, "w1", 30, 200),
            Err(StoreError::AlreadyFinal { .. })
        ));
    }

    #[test]
    fn test_transition_checks_expected_status() {
        let intent = held(IntentStatus::Claimed, "w1", 230);
        let err = plan_transition(
            &intent,
            &Transition::new(IntentStatus::Submitting, IntentStatus::Submitted),
            200,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            StoreError::StaleTransition {
                actual: IntentStatus::Claimed,
                ..
            }
        ));
    }

    #[test]
    fn test_transition_checks_owner() {
        let intent = held(IntentStatus::Claimed, "w2", 230);
        let err = plan_transition(
            &intent,
            &Transition::new(IntentStatus::Claimed, IntentStatus::Submitting).by("w1"),
            200,
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::ClaimLost { .. }));
    }

    #[test]
    fn test_submitted_requires_tx_ref() {
        let intent = held(IntentStatus::Submitting, "w1", 230);
        let bare = Transition::new(IntentStatus::Submitting, IntentStatus::Submitted).by("w1");
        assert!(matches!(
            plan_transition(&intent, &bare, 200),
            Err(StoreError::InvalidTransition { .. })
        ));

        let planned = plan_transition(&intent, &bare.with_tx_ref("0xabc"), 200).unwrap();
        assert_eq!(planned.intent.chain_tx_ref.as_deref(), Some("0xabc"));
        assert_eq!(planned.intent.submitted_at, Some(200));
        assert_eq!(planned.history[0].tx_ref.as_deref(), Some("0xabc"));
    }

    #[test]
    fn test_tx_ref_is_never_replaced() {
        let mut intent = held(IntentStatus::Submitting, "w1", 230);
        intent.chain_tx_ref = Some("0xabc".to_string());

        let err = plan_transition(
            &intent,
            &Transition::new(IntentStatus::Submitting, IntentStatus::Submitted).with_tx_ref("0xdef"),
            200,
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::TxRefConflict { .. }));
    }

    #[test]
    fn test_terminal_transition_releases_claim() {
        let intent = held(IntentStatus::Confirming, "w1", 230);
        let planned = plan_transition(
            &intent,
            &Transition::new(IntentStatus::Confirming, IntentStatus::Failed)
                .with_failure(&FailureReason::ConfirmationDeadline),
            200,
        )
        .unwrap();

        assert!(planned.intent.claim_owner.is_none());
        assert_eq!(
            planned.intent.last_error.as_deref(),
            Some("ConfirmationDeadline")
        );
    }

    #[test]
    fn test_repoll_without_details_leaves_no_history() {
        let intent = held(IntentStatus::Confirming, "w1", 230);
        let planned = plan_transition(
            &intent,
            &Transition::new(IntentStatus::Confirming, IntentStatus::Confirming)
                .by("w1")
                .extending_claim_to(260),
            200,
        )
        .unwrap();

        assert!(planned.history.is_empty());
        assert_eq!(planned.intent.claim_expires_at, Some(260));
    }

    #[test]
    fn test_unresolved_submission_never_expires() {
        let expire = Transition::new(IntentStatus::Pending, IntentStatus::Expired)
            .with_failure(&FailureReason::Expired);
        assert!(plan_transition(&pending(), &expire, 150).is_ok());

        let mut unresolved = pending();
        unresolved.submission_key = Some("intent-1:0".to_string());
        assert!(matches!(
            plan_transition(&unresolved, &expire, 150),
            Err(StoreError::InvalidTransition {
                to: IntentStatus::Expired,
                ..
            })
        ));
    }

    #[test]
    fn test_cancel_rules() {
        let planned = plan_cancel(&pending(), "user request", 150).unwrap();
        assert_eq!(planned.intent.status, IntentStatus::Failed);
        assert_eq!(
            planned.intent.last_error.as_deref(),
            Some("Cancelled: user request")
        );

        let submitting = held(IntentStatus::Submitting, "w1", 230);
        assert!(matches!(
            plan_cancel(&submitting, "late", 150),
            Err(StoreError::TooLateToCancel { .. })
        ));

        // Handed back after an unknown submit outcome
        let mut unresolved = pending();
        unresolved.submission_key = Some("intent-1:0".to_string());
        unresolved.attempt_count = 1;
        assert!(matches!(
            plan_cancel(&unresolved, "late", 150),
            Err(StoreError::TooLateToCancel {
                status: IntentStatus::Pending,
                ..
            })
        ));
    }

    #[test]
    fn test_notified_once() {
        let mut intent = pending();
        assert!(plan_notified(&intent, 10).is_none());

        intent.status = IntentStatus::Confirmed;
        let notified = plan_notified(&intent, 10).unwrap();
        assert_eq!(notified.notified_at, Some(10));
        assert!(plan_notified(&notified, 11).is_none());
    }
}
