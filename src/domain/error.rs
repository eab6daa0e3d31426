use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("capacity exceeded for {ticket_type}: requested {requested}, remaining {remaining}")]
    CapacityExceeded {
        ticket_type: String,
        requested: u32,
        remaining: i64,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("provider: {0}")]
    Provider(String),

    #[error("provider init: {0}")]
    ProviderInit(String),

    #[error("ticket token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("qr code: {0}")]
    QrCode(#[from] qrcode::types::QrError),
}

impl PipelineError {
    /// Errors caused by the request itself; retrying the same input cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound(_) | Self::CapacityExceeded { .. }
        )
    }
}
