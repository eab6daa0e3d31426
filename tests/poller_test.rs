mod common;

use chrono::{Duration, Utc};
use common::*;
use jaaiye::domain::id::Reference;
use jaaiye::domain::payment::ProviderPaymentStatus;
use jaaiye::domain::provider::ProviderKind;
use jaaiye::domain::store::Store;
use jaaiye::domain::transaction::TransactionStatus;
use jaaiye::services::poller::{PollStats, poll_provider};

#[tokio::test]
async fn recovers_payment_whose_webhook_never_arrived() {
    let mut h = Harness::new();
    seed_default(&h.store);
    track(h.store.as_ref(), ProviderKind::Monnify, "mnfy_lost", 2, TransactionStatus::Pending).await;

    let provider = MockProvider::new(ProviderKind::Monnify);
    provider.answer(verified(
        ProviderKind::Monnify,
        "mnfy_lost",
        ProviderPaymentStatus::Success,
        500_000,
        metadata("E1", "U1", 2),
    ));

    let stats = poll_provider(&h.dyn_store(), &provider, &h.reconciler).await.unwrap();
    assert_eq!(
        stats,
        PollStats {
            checked: 1,
            reconciled: 1,
            ..PollStats::default()
        }
    );
    assert_eq!(h.store.tickets().len(), 2);
    assert_eq!(h.store.transactions()[0].status, TransactionStatus::Successful);
    assert_eq!(h.queued_emails().len(), 1);

    // Nothing pending is left for the next pass.
    let again = poll_provider(&h.dyn_store(), &provider, &h.reconciler).await.unwrap();
    assert_eq!(again.checked, 0);
    assert_eq!(h.store.tickets().len(), 2);
}

#[tokio::test]
async fn stale_transactions_are_left_alone() {
    let h = Harness::new();
    seed_default(&h.store);
    track(h.store.as_ref(), ProviderKind::Paystack, "ps_old", 1, TransactionStatus::Pending).await;
    h.store.backdate_transaction(
        ProviderKind::Paystack,
        &Reference::new("ps_old").unwrap(),
        Utc::now() - Duration::hours(3),
    );

    let provider = MockProvider::new(ProviderKind::Paystack);
    provider.answer(successful("ps_old", 1));

    let stats = poll_provider(&h.dyn_store(), &provider, &h.reconciler).await.unwrap();
    assert_eq!(stats.checked, 0);
    assert_eq!(provider.verify_calls(), 0);
    assert!(h.store.tickets().is_empty());
}

#[tokio::test]
async fn explicit_failure_closes_the_transaction() {
    let h = Harness::new();
    seed_default(&h.store);
    track(h.store.as_ref(), ProviderKind::Payaza, "pyz_declined", 1, TransactionStatus::Pending).await;

    let provider = MockProvider::new(ProviderKind::Payaza);
    provider.answer(verified(
        ProviderKind::Payaza,
        "pyz_declined",
        ProviderPaymentStatus::Abandoned,
        250_000,
        metadata("E1", "U1", 1),
    ));

    let stats = poll_provider(&h.dyn_store(), &provider, &h.reconciler).await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(h.store.transactions()[0].status, TransactionStatus::Failed);
    let audit = h.store.audit_entries();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, "marked_failed");
    assert_eq!(audit[0].actor, "poller:payaza");
    assert_eq!(audit[0].entity_id, Some(h.store.transactions()[0].id));
    assert_eq!(audit[0].detail["amount"], 250_000);
    assert_eq!(audit[0].detail["providerStatus"], "abandoned");
}

#[tokio::test]
async fn unanswered_and_pending_lookups_change_nothing() {
    let h = Harness::new();
    seed_default(&h.store);
    track(h.store.as_ref(), ProviderKind::Paystack, "ps_silent", 1, TransactionStatus::Pending).await;
    track(h.store.as_ref(), ProviderKind::Paystack, "ps_waiting", 1, TransactionStatus::Pending).await;

    let provider = MockProvider::new(ProviderKind::Paystack);
    provider.answer(verified(
        ProviderKind::Paystack,
        "ps_waiting",
        ProviderPaymentStatus::Pending,
        250_000,
        metadata("E1", "U1", 1),
    ));

    let stats = poll_provider(&h.dyn_store(), &provider, &h.reconciler).await.unwrap();
    assert_eq!(
        stats,
        PollStats {
            checked: 2,
            ..PollStats::default()
        }
    );
    assert!(h
        .store
        .transactions()
        .iter()
        .all(|t| t.status == TransactionStatus::Pending));
    assert!(h.store.audit_entries().is_empty());
}

#[tokio::test]
async fn only_this_providers_pending_rows_are_polled() {
    let h = Harness::new();
    seed_default(&h.store);
    track(h.store.as_ref(), ProviderKind::Paystack, "ps_registered", 1, TransactionStatus::Created).await;
    track(h.store.as_ref(), ProviderKind::Flutterwave, "flw_other", 1, TransactionStatus::Pending).await;

    let provider = MockProvider::new(ProviderKind::Paystack);
    let stats = poll_provider(&h.dyn_store(), &provider, &h.reconciler).await.unwrap();
    assert_eq!(stats.checked, 0);
    assert_eq!(provider.verify_calls(), 0);
}

#[tokio::test]
async fn lapsed_claim_is_picked_up_again() {
    let h = Harness::new();
    seed_default(&h.store);
    track(h.store.as_ref(), ProviderKind::Paystack, "ps_crashed", 1, TransactionStatus::Pending).await;

    // A pass claimed the row and died before committing.
    let reference = Reference::new("ps_crashed").unwrap();
    h.store
        .claim_transaction(ProviderKind::Paystack, &reference, Duration::seconds(120))
        .await
        .unwrap();
    assert_eq!(h.store.transactions()[0].status, TransactionStatus::Processing);

    let provider = MockProvider::new(ProviderKind::Paystack);
    provider.answer(successful("ps_crashed", 1));

    // Still inside the default lease: left to its owner.
    let stats = poll_provider(&h.dyn_store(), &provider, &h.reconciler).await.unwrap();
    assert_eq!(stats.checked, 0);

    let expired = h.reconciler.clone().with_lease(Duration::zero());
    let stats = poll_provider(&h.dyn_store(), &provider, &expired).await.unwrap();
    assert_eq!(stats.checked, 1);
    assert_eq!(stats.reconciled, 1);
    assert_eq!(h.store.transactions()[0].status, TransactionStatus::Successful);
    assert_eq!(h.store.tickets().len(), 1);
}
