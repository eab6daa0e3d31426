use {
    super::error::PipelineError,
    super::id::Reference,
    super::money::Money,
    super::payment::{PaymentMetadata, VerifiedPayment},
    axum::http::HeaderMap,
    serde::{Deserialize, Serialize},
    std::{fmt, future::Future, pin::Pin},
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Paystack,
    Flutterwave,
    Monnify,
    Payaza,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Paystack,
        ProviderKind::Flutterwave,
        ProviderKind::Monnify,
        ProviderKind::Payaza,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paystack => "paystack",
            Self::Flutterwave => "flutterwave",
            Self::Monnify => "monnify",
            Self::Payaza => "payaza",
        }
    }

    /// Prefix for references generated by this service.
    pub fn reference_prefix(&self) -> &'static str {
        match self {
            Self::Paystack => "ps",
            Self::Flutterwave => "flw",
            Self::Monnify => "mnfy",
            Self::Payaza => "pyz",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for ProviderKind {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paystack" => Ok(Self::Paystack),
            "flutterwave" => Ok(Self::Flutterwave),
            "monnify" => Ok(Self::Monnify),
            "payaza" => Ok(Self::Payaza),
            other => Err(PipelineError::Validation(format!(
                "unsupported payment provider: {other}"
            ))),
        }
    }
}

/// What the shared init driver hands to an adapter.
#[derive(Debug, Clone)]
pub struct InitRequest {
    pub reference: Reference,
    pub money: Money,
    pub email: String,
    pub customer_name: Option<String>,
    pub description: String,
    pub metadata: PaymentMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializedPayment {
    pub authorization_url: String,
    pub reference: Reference,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_reference: Option<String>,
}

/// Webhook body reduced to what the processing driver needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    PaymentSucceeded { reference: Option<Reference> },
    Unhandled { event_type: String },
}

pub trait PaymentProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Open a checkout session with the gateway.
    fn initialize<'a>(
        &'a self,
        request: &'a InitRequest,
    ) -> BoxFuture<'a, Result<InitializedPayment, PipelineError>>;

    /// Look the payment up on the gateway. `None` means "not confirmed yet":
    /// network failures, unknown references and error envelopes all map here.
    fn verify<'a>(&'a self, reference: &'a Reference) -> BoxFuture<'a, Option<VerifiedPayment>>;

    /// Check the webhook signature. Returns `true` without checking when no
    /// webhook secret is configured.
    fn validate_signature(&self, headers: &HeaderMap, raw_body: &[u8]) -> bool;

    fn parse_webhook_event(&self, raw_body: &[u8]) -> Result<WebhookEvent, PipelineError>;
}
