#![allow(dead_code)]

use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use jaaiye::domain::error::PipelineError;
use jaaiye::domain::event::{Event, TicketType};
use jaaiye::domain::id::{EventId, Reference, TicketTypeId, UserId};
use jaaiye::domain::money::{Currency, Money, MoneyAmount};
use jaaiye::domain::payment::{PaymentMetadata, ProviderPaymentStatus, VerifiedPayment};
use jaaiye::domain::provider::{
    BoxFuture, InitRequest, InitializedPayment, PaymentProvider, ProviderKind, WebhookEvent,
};
use jaaiye::domain::store::Store;
use jaaiye::domain::transaction::{NewTransaction, NewTransactionParams, TransactionStatus};
use jaaiye::domain::user::UserProfile;
use jaaiye::infra::memory::MemoryStore;
use jaaiye::services::calendar::LogCalendarSync;
use jaaiye::services::notifications::{EmailMessage, EmailQueue};
use jaaiye::services::reconciliation::Reconciler;
use jaaiye::services::ticket_issuance::TicketIssuer;
use jaaiye::services::ticket_token::TicketSigner;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub const TICKET_SECRET: &str = "ticket-test-secret";
pub const JWT_SECRET: &str = "jwt-test-secret";
pub const MOCK_SIGNATURE_HEADER: &str = "x-mock-signature";
pub const MOCK_SIGNATURE: &str = "valid";

/// Everything a reconciliation test needs, wired to an in-memory store.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub reconciler: Reconciler,
    pub issuer: TicketIssuer,
    pub emails: mpsc::Receiver<EmailMessage>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn Store> = store.clone();
        let issuer = TicketIssuer::new(dyn_store.clone(), TicketSigner::new(TICKET_SECRET));
        let (queue, emails) = EmailQueue::new(64);
        let reconciler = Reconciler::new(dyn_store, issuer.clone(), queue, Arc::new(LogCalendarSync));
        Self {
            store,
            reconciler,
            issuer,
            emails,
        }
    }

    pub fn dyn_store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Drain queued emails without waiting.
    pub fn queued_emails(&mut self) -> Vec<EmailMessage> {
        let mut out = Vec::new();
        while let Ok(m) = self.emails.try_recv() {
            out.push(m);
        }
        out
    }
}

// ── Seed data ──────────────────────────────────────────────────────────────

pub fn ticket_type(id: &str, name: &str, price_minor: i64, capacity: Option<u32>, sold: u32) -> TicketType {
    TicketType {
        id: TicketTypeId::new(id).unwrap(),
        name: name.to_string(),
        price: MoneyAmount::new(price_minor).unwrap(),
        capacity,
        sold_count: sold,
        is_active: true,
        sales_start_date: None,
        sales_end_date: None,
    }
}

pub fn event(id: &str, ticket_fee: Option<&str>, ticket_types: Vec<TicketType>) -> Event {
    Event {
        id: EventId::new(id).unwrap(),
        title: format!("Event {id}"),
        starts_at: Utc::now() + Duration::days(7),
        ends_at: None,
        venue: Some("Lagos".to_string()),
        ticket_fee: ticket_fee.map(str::to_string),
        attendee_count: 0,
        ticket_types,
    }
}

pub fn user(id: &str, email: &str, calendar_linked: bool) -> UserProfile {
    UserProfile {
        id: UserId::new(id).unwrap(),
        email: email.to_string(),
        full_name: Some(format!("User {id}")),
        google_calendar_linked: calendar_linked,
        outlook_calendar_linked: false,
    }
}

/// Event `E1` with a Regular type priced at 2500 NGN and plenty of room, plus buyer `U1`.
pub fn seed_default(store: &MemoryStore) {
    store.insert_event(event(
        "E1",
        None,
        vec![ticket_type("T-REG", "Regular", 250_000, Some(100), 0)],
    ));
    store.insert_user(user("U1", "u1@example.com", false));
}

pub fn metadata(event_id: &str, user_id: &str, quantity: u32) -> PaymentMetadata {
    PaymentMetadata {
        event_id: Some(EventId::new(event_id).unwrap()),
        user_id: Some(UserId::new(user_id).unwrap()),
        quantity: Some(quantity),
        ..PaymentMetadata::default()
    }
}

pub fn verified(
    provider: ProviderKind,
    reference: &str,
    status: ProviderPaymentStatus,
    amount_minor: i64,
    metadata: PaymentMetadata,
) -> VerifiedPayment {
    VerifiedPayment {
        provider,
        reference: Reference::new(reference).unwrap(),
        status,
        money: Money::new(MoneyAmount::new(amount_minor).unwrap(), Currency::Ngn),
        metadata,
        provider_transaction_id: Some(format!("tx-{reference}")),
        provider_reference: None,
        raw: serde_json::json!({"reference": reference}),
    }
}

pub fn successful(reference: &str, quantity: u32) -> VerifiedPayment {
    verified(
        ProviderKind::Paystack,
        reference,
        ProviderPaymentStatus::Success,
        250_000 * i64::from(quantity),
        metadata("E1", "U1", quantity),
    )
}

/// Record a transaction the way payment init (pending) or client
/// registration (created) does, for buyer U1 at event E1.
pub async fn track(store: &dyn Store, provider: ProviderKind, reference: &str, quantity: u32, status: TransactionStatus) {
    let inserted = store
        .insert_transaction(&NewTransaction::new(NewTransactionParams {
            provider,
            reference: Reference::new(reference).unwrap(),
            trans_id: None,
            trans_reference: None,
            money: Money::new(MoneyAmount::new(250_000 * i64::from(quantity)).unwrap(), Currency::Ngn),
            status,
            user_id: UserId::new("U1").unwrap(),
            event_id: EventId::new("E1").unwrap(),
            ticket_type_id: None,
            quantity,
            metadata: metadata("E1", "U1", quantity),
            raw: serde_json::Value::Null,
        }))
        .await
        .unwrap();
    assert!(inserted, "{reference} already tracked");
}

// ── Scripted provider ──────────────────────────────────────────────────────

/// Provider double. Lookups answer from a script; webhooks are
/// `{"event": "...", "reference": "..."}` signed with a fixed header.
pub struct MockProvider {
    kind: ProviderKind,
    script: Mutex<HashMap<String, VerifiedPayment>>,
    verify_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            script: Mutex::new(HashMap::new()),
            verify_calls: AtomicUsize::new(0),
        }
    }

    pub fn answer(&self, payment: VerifiedPayment) {
        self.script
            .lock()
            .unwrap()
            .insert(payment.reference.as_str().to_string(), payment);
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

impl PaymentProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn initialize<'a>(
        &'a self,
        request: &'a InitRequest,
    ) -> BoxFuture<'a, Result<InitializedPayment, PipelineError>> {
        Box::pin(async move {
            Ok(InitializedPayment {
                authorization_url: format!("https://checkout.test/{}", request.reference),
                reference: request.reference.clone(),
                provider_reference: None,
            })
        })
    }

    fn verify<'a>(&'a self, reference: &'a Reference) -> BoxFuture<'a, Option<VerifiedPayment>> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.script.lock().unwrap().get(reference.as_str()).cloned();
        Box::pin(async move { answer })
    }

    fn validate_signature(&self, headers: &HeaderMap, _raw_body: &[u8]) -> bool {
        headers
            .get(MOCK_SIGNATURE_HEADER)
            .is_some_and(|v| v.as_bytes() == MOCK_SIGNATURE.as_bytes())
    }

    fn parse_webhook_event(&self, raw_body: &[u8]) -> Result<WebhookEvent, PipelineError> {
        let body: serde_json::Value = serde_json::from_slice(raw_body)?;
        let event = body["event"].as_str().unwrap_or_default().to_string();
        if event != "payment.success" {
            return Ok(WebhookEvent::Unhandled { event_type: event });
        }
        Ok(WebhookEvent::PaymentSucceeded {
            reference: body["reference"].as_str().map(Reference::new).transpose()?,
        })
    }
}

pub fn signed_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(MOCK_SIGNATURE_HEADER, MOCK_SIGNATURE.parse().unwrap());
    headers
}

pub fn webhook_body(reference: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({"event": "payment.success", "reference": reference})).unwrap()
}

/// Bearer token the API accepts for `user_id`.
pub fn bearer(user_id: &str) -> String {
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &serde_json::json!({"sub": user_id}),
        &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {token}")
}
