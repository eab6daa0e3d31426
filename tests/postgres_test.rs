//! Store behaviour against a real database. Set `TEST_DATABASE_URL` to run;
//! without it every test returns early.

mod common;

use chrono::{Duration, Utc};
use common::*;
use jaaiye::domain::error::PipelineError;
use jaaiye::domain::id::{EventId, Reference, TicketTypeId, UserId};
use jaaiye::domain::money::{Currency, Money, MoneyAmount};
use jaaiye::domain::payment::ProviderPaymentStatus;
use jaaiye::domain::provider::ProviderKind;
use jaaiye::domain::store::Store;
use jaaiye::domain::transaction::{NewTransaction, NewTransactionParams, TransactionStatus};
use jaaiye::infra::postgres::PgStore;
use jaaiye::services::calendar::LogCalendarSync;
use jaaiye::services::notifications::EmailQueue;
use jaaiye::services::reconciliation::{ReconcileOutcome, Reconciler};
use jaaiye::services::ticket_issuance::TicketIssuer;
use jaaiye::services::ticket_token::TicketSigner;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

async fn pool() -> Option<PgPool> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&url)
        .await
        .expect("failed to connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");
    Some(pool)
}

/// Fresh ids per test run so reruns against the same database never collide.
struct Seed {
    event_id: String,
    user_id: String,
    ticket_type_id: String,
}

async fn seed(pool: &PgPool, capacity: i32) -> Seed {
    let tag = uuid::Uuid::new_v4().simple().to_string();
    let seed = Seed {
        event_id: format!("evt_{tag}"),
        user_id: format!("usr_{tag}"),
        ticket_type_id: format!("tt_{tag}"),
    };

    sqlx::query("INSERT INTO users (id, email) VALUES ($1, $2)")
        .bind(&seed.user_id)
        .bind(format!("{tag}@example.com"))
        .execute(pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO events (id, title, starts_at) VALUES ($1, 'Launch', $2)")
        .bind(&seed.event_id)
        .bind(Utc::now() + Duration::days(7))
        .execute(pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO event_ticket_types (id, event_id, name, price, capacity) \
         VALUES ($1, $2, 'Regular', 250000, $3)",
    )
    .bind(&seed.ticket_type_id)
    .bind(&seed.event_id)
    .bind(capacity)
    .execute(pool)
    .await
    .unwrap();
    seed
}

fn build_reconciler(store: Arc<dyn Store>) -> Reconciler {
    let issuer = TicketIssuer::new(store.clone(), TicketSigner::new(TICKET_SECRET));
    let (queue, _rx) = EmailQueue::new(64);
    Reconciler::new(store, issuer, queue, Arc::new(LogCalendarSync))
}

fn new_transaction(seed: &Seed, reference: &str, status: TransactionStatus) -> NewTransaction {
    NewTransaction::new(NewTransactionParams {
        provider: ProviderKind::Paystack,
        reference: Reference::new(reference).unwrap(),
        trans_id: None,
        trans_reference: None,
        money: Money::new(MoneyAmount::new(250_000).unwrap(), Currency::Ngn),
        status,
        user_id: UserId::new(seed.user_id.as_str()).unwrap(),
        event_id: EventId::new(seed.event_id.as_str()).unwrap(),
        ticket_type_id: None,
        quantity: 1,
        metadata: metadata(&seed.event_id, &seed.user_id, 1),
        raw: serde_json::Value::Null,
    })
}

#[tokio::test]
async fn provider_reference_is_unique() {
    let Some(pool) = pool().await else { return };
    let seed = seed(&pool, 100).await;
    let store = PgStore::new(pool);
    let reference = format!("ps_{}", seed.event_id);

    assert!(store
        .insert_transaction(&new_transaction(&seed, &reference, TransactionStatus::Pending))
        .await
        .unwrap());
    assert!(!store
        .insert_transaction(&new_transaction(&seed, &reference, TransactionStatus::Created))
        .await
        .unwrap());

    let found = store
        .find_transaction(ProviderKind::Paystack, &Reference::new(reference.as_str()).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.status, TransactionStatus::Pending, "first insert wins");
    assert!(store
        .find_transaction(ProviderKind::Flutterwave, &Reference::new(reference.as_str()).unwrap())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reconciliation_issues_once() {
    let Some(pool) = pool().await else { return };
    let seed = seed(&pool, 100).await;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));
    let reconciler = build_reconciler(store.clone());
    let reference = format!("ps_race_{}", seed.event_id);
    let payment = verified(
        ProviderKind::Paystack,
        &reference,
        ProviderPaymentStatus::Success,
        750_000,
        metadata(&seed.event_id, &seed.user_id, 3),
    );

    let mut handles = Vec::new();
    for _ in 0..10 {
        let reconciler = reconciler.clone();
        let payment = payment.clone();
        handles.push(tokio::spawn(async move {
            reconciler.handle_successful_payment(&payment).await.unwrap()
        }));
    }

    let mut issued = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ReconcileOutcome::Issued { tickets, .. } => {
                issued += 1;
                assert_eq!(tickets.len(), 3);
            }
            ReconcileOutcome::AlreadyProcessed { .. } | ReconcileOutcome::InFlight => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(issued, 1);

    let tickets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tickets WHERE event_id = $1")
        .bind(&seed.event_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(tickets, 3);
    let sold: i32 = sqlx::query_scalar("SELECT sold_count FROM event_ticket_types WHERE event_id = $1")
        .bind(&seed.event_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(sold, 3);
}

#[tokio::test]
async fn sold_out_issuance_leaves_counters_untouched() {
    let Some(pool) = pool().await else { return };
    let seed = seed(&pool, 1).await;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));
    let reconciler = build_reconciler(store.clone());
    let reference = format!("ps_full_{}", seed.event_id);

    let mut meta = metadata(&seed.event_id, &seed.user_id, 2);
    meta.ticket_type_id = Some(TicketTypeId::new(seed.ticket_type_id.as_str()).unwrap());
    let err = reconciler
        .handle_successful_payment(&verified(
            ProviderKind::Paystack,
            &reference,
            ProviderPaymentStatus::Success,
            500_000,
            meta,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::CapacityExceeded { requested: 2, remaining: 1, .. }));

    let sold: i32 = sqlx::query_scalar("SELECT sold_count FROM event_ticket_types WHERE event_id = $1")
        .bind(&seed.event_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(sold, 0);
    let tx = store
        .find_transaction(ProviderKind::Paystack, &Reference::new(reference.as_str()).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending, "claim is released");
}

#[tokio::test]
async fn pending_listing_respects_window() {
    let Some(pool) = pool().await else { return };
    let seed = seed(&pool, 100).await;
    let store = PgStore::new(pool.clone());
    let fresh = format!("ps_fresh_{}", seed.event_id);
    let stale = format!("ps_stale_{}", seed.event_id);
    let registered = format!("ps_reg_{}", seed.event_id);
    let crashed = format!("ps_crashed_{}", seed.event_id);
    let live = format!("ps_live_{}", seed.event_id);

    for (reference, status) in [
        (&fresh, TransactionStatus::Pending),
        (&stale, TransactionStatus::Pending),
        (&registered, TransactionStatus::Created),
        (&crashed, TransactionStatus::Pending),
        (&live, TransactionStatus::Pending),
    ] {
        store
            .insert_transaction(&new_transaction(&seed, reference, status))
            .await
            .unwrap();
    }
    sqlx::query("UPDATE transactions SET created_at = now() - interval '3 hours' WHERE reference = $1")
        .bind(&stale)
        .execute(&pool)
        .await
        .unwrap();
    for reference in [&crashed, &live] {
        store
            .claim_transaction(ProviderKind::Paystack, &Reference::new(reference.as_str()).unwrap(), Duration::seconds(120))
            .await
            .unwrap();
    }
    sqlx::query("UPDATE transactions SET claimed_at = now() - interval '10 minutes' WHERE reference = $1")
        .bind(&crashed)
        .execute(&pool)
        .await
        .unwrap();

    let now = Utc::now();
    let pending = store
        .list_pending_transactions(ProviderKind::Paystack, now - Duration::hours(2), now - Duration::seconds(120), 1000)
        .await
        .unwrap();
    let mut ours: Vec<&str> = pending
        .iter()
        .filter(|t| t.event_id.as_str() == seed.event_id)
        .map(|t| t.reference.as_str())
        .collect();
    ours.sort();
    let mut expected = vec![crashed.as_str(), fresh.as_str()];
    expected.sort();
    assert_eq!(ours, expected, "lapsed claims are listed, live ones are not");
}
