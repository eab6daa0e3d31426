use {
    super::{api_errors::ApiError, auth::AuthUser},
    crate::{
        AppState,
        domain::{
            id::{EventId, Reference, TicketTypeId},
            money::{Currency, Money, MoneyAmount},
            payment::{Assignee, PaymentMetadata},
            provider::ProviderKind,
        },
        services::{
            payments::{InitPaymentRequest, RegisterRequest, VerifyOutcome},
            reconciliation::ReconcileOutcome,
        },
    },
    axum::{
        Json,
        extract::{Path, State},
        http::StatusCode,
    },
    serde::Deserialize,
};

fn default_quantity() -> u32 {
    1
}

fn money(amount: &serde_json::Value, currency: Option<&str>) -> Result<Money, ApiError> {
    let currency = match currency {
        Some(c) => Currency::try_from(c)?,
        None => Currency::Ngn,
    };
    Ok(Money::new(MoneyAmount::from_major_json(amount)?, currency))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitBody {
    event_id: EventId,
    #[serde(default)]
    ticket_type_id: Option<TicketTypeId>,
    #[serde(default = "default_quantity")]
    quantity: u32,
    email: String,
    /// Major units.
    amount: serde_json::Value,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    assignees: Vec<Assignee>,
    #[serde(default)]
    customer_name: Option<String>,
}

pub async fn init_payment(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(provider): Path<String>,
    Json(body): Json<InitBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let kind = ProviderKind::try_from(provider.as_str())?;
    let session = state
        .payments
        .initialize_payment(
            kind,
            InitPaymentRequest {
                user_id,
                event_id: body.event_id,
                ticket_type_id: body.ticket_type_id,
                quantity: body.quantity,
                email: body.email,
                customer_name: body.customer_name,
                money: money(&body.amount, body.currency.as_deref())?,
                assignees: body.assignees,
            },
        )
        .await?;

    Ok(Json(serde_json::json!({
        "authorizationUrl": session.authorization_url,
        "reference": session.reference,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    provider: String,
    reference: Reference,
    amount: serde_json::Value,
    #[serde(default)]
    currency: Option<String>,
    event_id: EventId,
    #[serde(default)]
    ticket_type_id: Option<TicketTypeId>,
    #[serde(default = "default_quantity")]
    quantity: u32,
    #[serde(default)]
    trans_id: Option<String>,
    #[serde(default)]
    trans_reference: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
}

pub async fn register_transaction(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<RegisterBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let kind = ProviderKind::try_from(body.provider.as_str())?;
    let (transaction, created) = state
        .payments
        .register_transaction(
            kind,
            RegisterRequest {
                reference: body.reference,
                money: money(&body.amount, body.currency.as_deref())?,
                user_id,
                event_id: body.event_id,
                ticket_type_id: body.ticket_type_id,
                quantity: body.quantity,
                trans_id: body.trans_id,
                trans_reference: body.trans_reference,
                metadata: PaymentMetadata::from_value(&body.metadata),
            },
        )
        .await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((
        status,
        Json(serde_json::json!({
            "created": created,
            "transaction": {
                "id": transaction.id,
                "provider": transaction.provider,
                "reference": transaction.reference,
                "status": transaction.status,
            },
        })),
    ))
}

pub async fn verify_payment(
    State(state): State<AppState>,
    Path((provider, reference)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let kind = ProviderKind::try_from(provider.as_str())?;
    let reference = Reference::new(reference)?;
    let outcome = state.payments.verify_and_reconcile(kind, &reference).await?;

    let body = match outcome {
        VerifyOutcome::Reconciled(ReconcileOutcome::Issued {
            transaction_id,
            tickets,
            calendar_guidance,
        }) => serde_json::json!({
            "status": "successful",
            "outcome": "issued",
            "transactionId": transaction_id,
            "ticketCount": tickets.len(),
            "calendarGuidance": calendar_guidance,
        }),
        VerifyOutcome::Reconciled(ReconcileOutcome::AlreadyProcessed { transaction_id }) => {
            serde_json::json!({
                "status": "successful",
                "outcome": "already_processed",
                "transactionId": transaction_id,
            })
        }
        VerifyOutcome::Reconciled(other) => serde_json::json!({
            "status": "pending",
            "outcome": other.label(),
        }),
        VerifyOutcome::NotConfirmed(status) => serde_json::json!({
            "status": "pending",
            "providerStatus": status.map(|s| s.as_str()),
        }),
        VerifyOutcome::Failed(status) => serde_json::json!({
            "status": "failed",
            "providerStatus": status.as_str(),
        }),
    };
    Ok(Json(body))
}
