use crate::domain::error::PipelineError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// HTTP-facing error. Domain errors are mapped here so the service layer
/// never sees status codes.
#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    Unauthorized(&'static str),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self::Pipeline(err)
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "internal error".to_string(),
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            Self::Unauthorized(msg) => {
                let body = serde_json::json!({
                    "error_code": "unauthorized",
                    "message": msg,
                });
                return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
            }
            Self::Pipeline(err) => err,
        };

        let (status, error_code, message) = match &err {
            PipelineError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", msg.clone())
            }
            PipelineError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            PipelineError::CapacityExceeded { .. } => {
                (StatusCode::CONFLICT, "capacity_exceeded", err.to_string())
            }
            PipelineError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            PipelineError::ProviderInit(msg) => {
                tracing::warn!("payment initialization failed: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "provider_error",
                    "payment provider rejected the request".to_string(),
                )
            }
            PipelineError::Token(e) => {
                tracing::debug!("ticket token rejected: {e}");
                (
                    StatusCode::BAD_REQUEST,
                    "invalid_token",
                    "invalid ticket token".to_string(),
                )
            }
            PipelineError::Database(e) => {
                tracing::error!("database error: {e}");
                internal()
            }
            PipelineError::Serialization(e) => {
                tracing::error!("serialization error: {e}");
                internal()
            }
            PipelineError::Provider(e) => {
                tracing::error!("provider error: {e}");
                internal()
            }
            PipelineError::QrCode(e) => {
                tracing::error!("qr code error: {e}");
                internal()
            }
        };

        let body = serde_json::json!({
            "error_code": error_code,
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
