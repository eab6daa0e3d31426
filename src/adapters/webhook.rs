use {
    super::api_errors::ApiError,
    crate::{
        AppState,
        domain::{error::PipelineError, provider::ProviderKind},
        services::dispatcher::WebhookJob,
    },
    axum::{
        Json,
        body::Bytes,
        extract::{Path, State},
        http::HeaderMap,
    },
};

/// Acknowledge a gateway webhook and hand it to the background worker.
/// Processing outcome never changes the response; gateways only need a 200.
#[tracing::instrument(skip_all, fields(provider = %provider))]
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let kind = ProviderKind::try_from(provider.as_str())
        .map_err(|_| PipelineError::NotFound(format!("webhook provider {provider}")))?;
    if state.payments.providers().get(kind).is_none() {
        return Err(PipelineError::NotFound(format!("webhook provider {kind}")).into());
    }

    let queued = state.dispatcher.dispatch(WebhookJob {
        provider: kind,
        headers,
        body,
    });
    tracing::debug!(queued, "webhook acknowledged");

    Ok(Json(serde_json::json!({"received": true})))
}
