mod common;

use common::*;
use jaaiye::domain::error::PipelineError;
use jaaiye::domain::id::{EventId, Reference, TicketTypeId, UserId};
use jaaiye::domain::payment::{Assignee, PaymentMetadata, ProviderPaymentStatus};
use jaaiye::domain::provider::ProviderKind;
use jaaiye::domain::store::Store;
use jaaiye::domain::transaction::{ClaimOutcome, TransactionStatus};
use jaaiye::services::reconciliation::{ReconcileOutcome, RejectReason};
use std::sync::Arc;

// ── Idempotence ────────────────────────────────────────────────────────────

#[tokio::test]
async fn reconciling_twice_issues_once() {
    let mut h = Harness::new();
    seed_default(&h.store);
    let payment = successful("ps_idem", 2);

    let first = h.reconciler.handle_successful_payment(&payment).await.unwrap();
    let ReconcileOutcome::Issued { transaction_id, tickets, .. } = &first else {
        panic!("expected Issued, got {first:?}");
    };
    assert_eq!(tickets.len(), 2);

    let second = h.reconciler.handle_successful_payment(&payment).await.unwrap();
    match second {
        ReconcileOutcome::AlreadyProcessed { transaction_id: id } => assert_eq!(id, *transaction_id),
        other => panic!("expected AlreadyProcessed, got {other:?}"),
    }

    assert_eq!(h.store.tickets().len(), 2, "no extra tickets on the second pass");
    assert_eq!(h.store.transactions().len(), 1);
    assert_eq!(h.queued_emails().len(), 1, "one consolidated confirmation");
}

#[tokio::test]
async fn settled_transaction_records_gateway_ids() {
    let h = Harness::new();
    seed_default(&h.store);
    h.reconciler
        .handle_successful_payment(&successful("ps_ids", 1))
        .await
        .unwrap();

    let tx = h
        .store
        .find_transaction(ProviderKind::Paystack, &Reference::new("ps_ids").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Successful);
    assert_eq!(tx.trans_id.as_deref(), Some("tx-ps_ids"));
    assert!(tx.claimed_at.is_none());

    let tickets = h.store.tickets();
    let ticket = &tickets[0];
    assert_eq!(ticket.transaction_id, Some(tx.id));
    assert_eq!(ticket.quantity, 1);
    assert_eq!(ticket.price.minor(), 250_000);
    assert_eq!(ticket.ticket_type_name.as_deref(), Some("Regular"));
    assert!(ticket.qr_code.starts_with("data:image/svg+xml;base64,"));
}

// ── Concurrency ────────────────────────────────────────────────────────────
// Webhook, poller and client verify racing on the same reference.

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reconciliation_issues_exactly_quantity() {
    let h = Harness::new();
    seed_default(&h.store);
    let payment = successful("ps_race", 3);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let reconciler = h.reconciler.clone();
        let payment = payment.clone();
        handles.push(tokio::spawn(async move {
            reconciler.handle_successful_payment(&payment).await.unwrap()
        }));
    }

    let mut issued = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ReconcileOutcome::Issued { .. } => issued += 1,
            ReconcileOutcome::AlreadyProcessed { .. } | ReconcileOutcome::InFlight => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    assert_eq!(issued, 1, "exactly one pass issues");
    assert_eq!(h.store.tickets().len(), 3);
    assert_eq!(h.store.transactions().len(), 1);
    let event = h.store.event(&EventId::new("E1").unwrap()).unwrap();
    assert_eq!(event.ticket_types[0].sold_count, 3);
    assert_eq!(event.attendee_count, 3);
}

// ── Metadata and quantity ──────────────────────────────────────────────────

#[tokio::test]
async fn missing_metadata_is_rejected_without_side_effects() {
    let h = Harness::new();
    seed_default(&h.store);
    let payment = verified(
        ProviderKind::Paystack,
        "ps_nometa",
        ProviderPaymentStatus::Success,
        250_000,
        PaymentMetadata::default(),
    );

    let outcome = h.reconciler.handle_successful_payment(&payment).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Rejected(RejectReason::MissingMetadata)));
    assert!(h.store.tickets().is_empty());
    assert!(h.store.transactions().is_empty());
}

#[tokio::test]
async fn quantity_bounds_are_inclusive() {
    let h = Harness::new();
    seed_default(&h.store);

    for (reference, quantity) in [("ps_q0", 0), ("ps_q11", 11)] {
        let err = h
            .reconciler
            .handle_successful_payment(&successful(reference, quantity))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)), "{quantity}: {err}");
    }
    assert!(h.store.transactions().is_empty());

    for (reference, quantity) in [("ps_q1", 1), ("ps_q10", 10)] {
        let outcome = h
            .reconciler
            .handle_successful_payment(&successful(reference, quantity))
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Issued { .. }));
    }
    assert_eq!(h.store.tickets().len(), 11);
}

// ── Capacity ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn capacity_failure_releases_claim_and_audits() {
    let h = Harness::new();
    h.store.insert_event(event(
        "E1",
        None,
        vec![ticket_type("T-VIP", "VIP", 1_000_000, Some(3), 2)],
    ));
    let mut meta = metadata("E1", "U1", 2);
    meta.ticket_type_id = Some(TicketTypeId::new("T-VIP").unwrap());
    let payment = verified(
        ProviderKind::Paystack,
        "ps_full",
        ProviderPaymentStatus::Success,
        2_000_000,
        meta,
    );

    let err = h.reconciler.handle_successful_payment(&payment).await.unwrap_err();
    assert!(matches!(err, PipelineError::CapacityExceeded { requested: 2, remaining: 1, .. }));

    let transactions = h.store.transactions();
    let tx = &transactions[0];
    assert_eq!(tx.status, TransactionStatus::Pending, "claim released for a later retry");
    assert!(h.store.tickets().is_empty());
    let audit = h.store.audit_entries();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, "issuance_failed");
    assert_eq!(audit[0].actor, "reconcile:paystack");
}

// ── Pricing ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn free_event_issues_zero_priced_tickets() {
    let h = Harness::new();
    h.store.insert_event(event(
        "E1",
        Some("free"),
        vec![ticket_type("T-REG", "Regular", 500_000, None, 0)],
    ));
    let mut meta = metadata("E1", "U1", 2);
    meta.ticket_type_id = Some(TicketTypeId::new("T-REG").unwrap());

    h.reconciler
        .handle_successful_payment(&verified(
            ProviderKind::Paystack,
            "ps_free",
            ProviderPaymentStatus::Success,
            0,
            meta,
        ))
        .await
        .unwrap();

    let tickets = h.store.tickets();
    assert_eq!(tickets.len(), 2);
    assert!(tickets.iter().all(|t| t.price.is_zero()));
}

#[tokio::test]
async fn early_bird_is_preferred_when_no_type_requested() {
    let h = Harness::new();
    h.store.insert_event(event(
        "E1",
        None,
        vec![
            ticket_type("T-REG", "Regular", 500_000, None, 0),
            ticket_type("T-EB", "Early Bird", 300_000, Some(10), 0),
        ],
    ));

    h.reconciler
        .handle_successful_payment(&successful("ps_eb", 1))
        .await
        .unwrap();
    let tickets = h.store.tickets();
    let ticket = &tickets[0];
    assert_eq!(ticket.ticket_type_id.as_ref().map(|t| t.as_str()), Some("T-EB"));
    assert_eq!(ticket.price.minor(), 300_000);
}

#[tokio::test]
async fn sold_out_regular_reports_capacity_when_no_type_requested() {
    let h = Harness::new();
    h.store.insert_event(event(
        "E1",
        None,
        vec![ticket_type("T-REG", "Regular", 250_000, Some(5), 4)],
    ));

    let err = h
        .reconciler
        .handle_successful_payment(&successful("ps_last_seats", 2))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::CapacityExceeded { ref ticket_type, requested: 2, remaining: 1 }
            if ticket_type == "Regular"
    ));
    assert_eq!(h.store.transactions()[0].status, TransactionStatus::Pending);
}

#[tokio::test]
async fn short_payment_is_flagged_but_still_issued() {
    let h = Harness::new();
    seed_default(&h.store);
    track(h.store.as_ref(), ProviderKind::Paystack, "ps_short", 2, TransactionStatus::Pending).await;

    let outcome = h
        .reconciler
        .handle_successful_payment(&verified(
            ProviderKind::Paystack,
            "ps_short",
            ProviderPaymentStatus::Success,
            100_000,
            metadata("E1", "U1", 2),
        ))
        .await
        .unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Issued { .. }));
    assert_eq!(h.store.tickets().len(), 2);

    let audit = h.store.audit_entries();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, "amount_mismatch");
    assert_eq!(audit[0].actor, "reconcile:paystack");
    assert_eq!(audit[0].detail["expected"]["amount"], 500_000);
    assert_eq!(audit[0].detail["received"]["amount"], 100_000);
}

#[tokio::test]
async fn matching_amount_leaves_no_audit_trail() {
    let h = Harness::new();
    seed_default(&h.store);
    track(h.store.as_ref(), ProviderKind::Paystack, "ps_exact", 1, TransactionStatus::Pending).await;

    h.reconciler
        .handle_successful_payment(&successful("ps_exact", 1))
        .await
        .unwrap();
    assert!(h.store.audit_entries().is_empty());
}

// ── Notifications ──────────────────────────────────────────────────────────

#[tokio::test]
async fn assignees_each_get_their_own_ticket_and_email() {
    let mut h = Harness::new();
    seed_default(&h.store);
    let mut meta = metadata("E1", "U1", 5);
    meta.assignees = vec![
        Assignee {
            name: Some("Ada".into()),
            email: "ada@example.com".into(),
            user_id: Some(UserId::new("U2").unwrap()),
        },
        Assignee {
            name: None,
            email: "tunde@example.com".into(),
            user_id: None,
        },
    ];

    h.reconciler
        .handle_successful_payment(&verified(
            ProviderKind::Flutterwave,
            "flw_assign",
            ProviderPaymentStatus::Success,
            500_000,
            meta,
        ))
        .await
        .unwrap();

    let tickets = h.store.tickets();
    assert_eq!(tickets.len(), 2, "assignee count wins over quantity");
    assert_eq!(tickets[0].user_id.as_str(), "U2");
    assert_eq!(tickets[1].user_id.as_str(), "U1");

    let mut to: Vec<String> = h.queued_emails().into_iter().map(|m| m.to).collect();
    to.sort();
    assert_eq!(to, vec!["ada@example.com", "tunde@example.com"]);
}

#[tokio::test]
async fn buyer_without_linked_calendar_gets_guidance() {
    let mut h = Harness::new();
    seed_default(&h.store);

    let outcome = h
        .reconciler
        .handle_successful_payment(&successful("ps_cal", 1))
        .await
        .unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Issued { calendar_guidance: true, .. }));

    h.store.insert_user(user("U1", "u1@example.com", true));
    let outcome = h
        .reconciler
        .handle_successful_payment(&successful("ps_cal_2", 1))
        .await
        .unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Issued { calendar_guidance: false, .. }));

    let emails = h.queued_emails();
    assert_eq!(emails.len(), 2);
    assert!(emails.iter().all(|m| m.to == "u1@example.com"));
}

#[tokio::test]
async fn unknown_buyer_falls_back_to_metadata_email() {
    let mut h = Harness::new();
    h.store.insert_event(event("E1", Some("2500"), vec![]));
    let mut meta = metadata("E1", "U404", 1);
    meta.extra.insert("email".into(), serde_json::json!("guest@example.com"));

    h.reconciler
        .handle_successful_payment(&verified(
            ProviderKind::Monnify,
            "mnfy_guest",
            ProviderPaymentStatus::Success,
            250_000,
            meta,
        ))
        .await
        .unwrap();

    assert_eq!(h.store.tickets()[0].price.minor(), 250_000);
    let emails = h.queued_emails();
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].to, "guest@example.com");
}

#[tokio::test]
async fn failed_transaction_is_not_reopened() {
    let h = Harness::new();
    seed_default(&h.store);
    let store: Arc<dyn Store> = h.dyn_store();
    let payment = successful("ps_closed", 1);

    // Tracked at init, then declined by the gateway.
    store
        .insert_transaction(&jaaiye::domain::transaction::NewTransaction::new(
            jaaiye::domain::transaction::NewTransactionParams {
                provider: ProviderKind::Paystack,
                reference: payment.reference.clone(),
                trans_id: None,
                trans_reference: None,
                money: payment.money,
                status: TransactionStatus::Pending,
                user_id: UserId::new("U1").unwrap(),
                event_id: EventId::new("E1").unwrap(),
                ticket_type_id: None,
                quantity: 1,
                metadata: payment.metadata.clone(),
                raw: serde_json::Value::Null,
            },
        ))
        .await
        .unwrap();
    let tx = store
        .find_transaction(ProviderKind::Paystack, &payment.reference)
        .await
        .unwrap()
        .unwrap();
    assert!(store.mark_transaction_failed(tx.id, serde_json::json!({})).await.unwrap());

    let outcome = h.reconciler.handle_successful_payment(&payment).await.unwrap();
    assert!(matches!(
        outcome,
        ReconcileOutcome::Rejected(RejectReason::TransactionClosed(TransactionStatus::Failed))
    ));
    assert!(h.store.tickets().is_empty());
}

// ── Claim lease ────────────────────────────────────────────────────────────

#[tokio::test]
async fn stale_claim_is_taken_over_after_lease() {
    let h = Harness::new();
    seed_default(&h.store);
    track(h.store.as_ref(), ProviderKind::Paystack, "ps_crashed", 1, TransactionStatus::Pending).await;

    // A pass that claimed the row and never finished.
    let reference = Reference::new("ps_crashed").unwrap();
    h.store
        .claim_transaction(ProviderKind::Paystack, &reference, chrono::Duration::seconds(120))
        .await
        .unwrap();

    let payment = successful("ps_crashed", 1);
    let outcome = h.reconciler.handle_successful_payment(&payment).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::InFlight));
    assert!(h.store.tickets().is_empty());

    let impatient = h.reconciler.clone().with_lease(chrono::Duration::zero());
    let outcome = impatient.handle_successful_payment(&payment).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Issued { .. }));
    assert_eq!(h.store.tickets().len(), 1);
}

#[tokio::test]
async fn releasing_an_old_claim_keeps_the_newer_one() {
    let h = Harness::new();
    seed_default(&h.store);
    track(h.store.as_ref(), ProviderKind::Paystack, "ps_taken_over", 1, TransactionStatus::Pending).await;
    let reference = Reference::new("ps_taken_over").unwrap();

    let ClaimOutcome::Claimed(first) = h
        .store
        .claim_transaction(ProviderKind::Paystack, &reference, chrono::Duration::seconds(120))
        .await
        .unwrap()
    else {
        panic!("first claim should succeed");
    };
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let ClaimOutcome::Claimed(second) = h
        .store
        .claim_transaction(ProviderKind::Paystack, &reference, chrono::Duration::zero())
        .await
        .unwrap()
    else {
        panic!("expired lease should be taken over");
    };
    assert_ne!(first.claimed_at, second.claimed_at);

    // The slow first pass gives up; the takeover must survive it.
    h.store
        .release_claim(first.id, first.claimed_at.unwrap())
        .await
        .unwrap();
    let transactions = h.store.transactions();
    assert_eq!(transactions[0].status, TransactionStatus::Processing);
    assert_eq!(transactions[0].claimed_at, second.claimed_at);

    h.store
        .release_claim(second.id, second.claimed_at.unwrap())
        .await
        .unwrap();
    assert_eq!(h.store.transactions()[0].status, TransactionStatus::Pending);
}
