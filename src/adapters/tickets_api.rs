use {
    super::{api_errors::ApiError, auth::AuthUser},
    crate::{AppState, domain::ticket::Ticket},
    axum::{
        Json,
        extract::{Path, State},
    },
    serde::Deserialize,
    uuid::Uuid,
};

#[derive(Debug, Deserialize)]
pub struct VerifyTicketBody {
    token: String,
}

/// Admit the bearer of a ticket QR code. A ticket can be used once.
pub async fn verify_ticket(
    State(state): State<AppState>,
    Json(body): Json<VerifyTicketBody>,
) -> Result<Json<Ticket>, ApiError> {
    let ticket = state.issuer.verify_ticket(body.token.trim()).await?;
    Ok(Json(ticket))
}

pub async fn cancel_ticket(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, ApiError> {
    let ticket = state.issuer.cancel_ticket(id, &user_id).await?;
    Ok(Json(ticket))
}
