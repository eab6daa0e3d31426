use {
    super::{gateway_url, signature::check_hmac_header},
    crate::{
        config::PaystackSettings,
        domain::{
            error::PipelineError,
            id::Reference,
            money::{Currency, Money, MoneyAmount},
            payment::{PaymentMetadata, ProviderPaymentStatus, VerifiedPayment},
            provider::{
                BoxFuture, InitRequest, InitializedPayment, PaymentProvider, ProviderKind,
                WebhookEvent,
            },
        },
    },
    axum::http::HeaderMap,
    serde::{Deserialize, Serialize},
};

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

pub struct PaystackProvider {
    client: reqwest::Client,
    settings: PaystackSettings,
    callback_url: Option<String>,
}

impl PaystackProvider {
    pub fn new(client: reqwest::Client, settings: PaystackSettings, callback_url: Option<String>) -> Self {
        Self {
            client,
            settings,
            callback_url,
        }
    }
}

// ── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
struct InitializeBody<'a> {
    email: &'a str,
    /// Kobo.
    amount: i64,
    currency: &'a str,
    reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    reference: String,
    #[serde(default)]
    access_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    id: i64,
    status: String,
    reference: String,
    /// Kobo.
    amount: i64,
    currency: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
enum WebhookPayload {
    #[serde(rename = "charge.success")]
    ChargeSuccess(ChargeData),
}

#[derive(Debug, Deserialize)]
struct ChargeData {
    #[serde(default)]
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventName {
    event: String,
}

fn convert_status(status: &str) -> ProviderPaymentStatus {
    match status {
        "success" => ProviderPaymentStatus::Success,
        "failed" | "reversed" => ProviderPaymentStatus::Failed,
        "abandoned" => ProviderPaymentStatus::Abandoned,
        _ => ProviderPaymentStatus::Pending,
    }
}

fn into_verified(data: TransactionData, raw: serde_json::Value) -> Result<VerifiedPayment, PipelineError> {
    Ok(VerifiedPayment {
        provider: ProviderKind::Paystack,
        reference: Reference::new(data.reference)?,
        status: convert_status(&data.status),
        money: Money::new(
            MoneyAmount::new(data.amount)?,
            Currency::try_from(data.currency.as_str())?,
        ),
        metadata: PaymentMetadata::from_value(&data.metadata),
        provider_transaction_id: Some(data.id.to_string()),
        provider_reference: None,
        raw,
    })
}

impl PaystackProvider {
    async fn initialize_inner(&self, req: &InitRequest) -> Result<InitializedPayment, PipelineError> {
        let body = InitializeBody {
            email: &req.email,
            amount: req.money.amount().minor(),
            currency: req.money.currency().as_str(),
            reference: req.reference.as_str(),
            callback_url: self.callback_url.as_deref(),
            metadata: req.metadata.to_value(),
        };

        let response = self
            .client
            .post(format!("{}/transaction/initialize", self.settings.base_url))
            .bearer_auth(&self.settings.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::ProviderInit(format!("paystack: {e}")))?;

        let http_status = response.status();
        let envelope: Envelope<InitializeData> = response
            .json()
            .await
            .map_err(|e| PipelineError::ProviderInit(format!("paystack: {e}")))?;

        match envelope.data {
            Some(data) if envelope.status && http_status.is_success() => {
                tracing::debug!(access_code = ?data.access_code, "paystack session opened");
                Ok(InitializedPayment {
                    authorization_url: data.authorization_url,
                    reference: Reference::new(data.reference)?,
                    provider_reference: data.access_code,
                })
            }
            _ => Err(PipelineError::ProviderInit(format!(
                "paystack returned {http_status}: {}",
                envelope.message
            ))),
        }
    }

    async fn verify_inner(&self, reference: &Reference) -> Result<VerifiedPayment, PipelineError> {
        let url = gateway_url(
            &self.settings.base_url,
            &["transaction", "verify", reference.as_str()],
        )?;
        let raw: serde_json::Value = self
            .client
            .get(url)
            .bearer_auth(&self.settings.secret_key)
            .send()
            .await
            .map_err(|e| PipelineError::Provider(format!("paystack: {e}")))?
            .json()
            .await
            .map_err(|e| PipelineError::Provider(format!("paystack: {e}")))?;

        let envelope: Envelope<TransactionData> = serde_json::from_value(raw.clone())?;
        match envelope.data {
            Some(data) if envelope.status => into_verified(data, raw),
            _ => Err(PipelineError::Provider(format!(
                "paystack verify failed: {}",
                envelope.message
            ))),
        }
    }
}

impl PaymentProvider for PaystackProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Paystack
    }

    fn initialize<'a>(
        &'a self,
        request: &'a InitRequest,
    ) -> BoxFuture<'a, Result<InitializedPayment, PipelineError>> {
        Box::pin(self.initialize_inner(request))
    }

    fn verify<'a>(&'a self, reference: &'a Reference) -> BoxFuture<'a, Option<VerifiedPayment>> {
        Box::pin(async move {
            self.verify_inner(reference)
                .await
                .inspect_err(|e| tracing::warn!(%reference, error = %e, "paystack verify failed"))
                .ok()
        })
    }

    fn validate_signature(&self, headers: &HeaderMap, raw_body: &[u8]) -> bool {
        check_hmac_header(
            "paystack",
            Some(&self.settings.secret_key),
            headers,
            SIGNATURE_HEADER,
            raw_body,
        )
    }

    fn parse_webhook_event(&self, raw_body: &[u8]) -> Result<WebhookEvent, PipelineError> {
        parse_event(raw_body)
    }
}

fn parse_event(raw_body: &[u8]) -> Result<WebhookEvent, PipelineError> {
    let name: EventName = serde_json::from_slice(raw_body)?;
    if name.event != "charge.success" {
        return Ok(WebhookEvent::Unhandled {
            event_type: name.event,
        });
    }
    let WebhookPayload::ChargeSuccess(charge) = serde_json::from_slice(raw_body)?;
    Ok(WebhookEvent::PaymentSucceeded {
        reference: charge.reference.map(Reference::new).transpose()?,
    })
}
