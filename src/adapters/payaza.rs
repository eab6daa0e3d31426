use {
    super::{gateway_url, signature::check_hmac_header},
    crate::{
        config::PayazaSettings,
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

pub const SIGNATURE_HEADER: &str = "x-payaza-signature";

pub struct PayazaProvider {
    client: reqwest::Client,
    settings: PayazaSettings,
    callback_url: Option<String>,
}

impl PayazaProvider {
    pub fn new(client: reqwest::Client, settings: PayazaSettings, callback_url: Option<String>) -> Self {
        Self {
            client,
            settings,
            callback_url,
        }
    }

    fn authorization(&self) -> String {
        format!("Payaza {}", self.settings.api_key)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Serialize)]
struct CheckoutBody<'a> {
    amount: serde_json::Value,
    currency: &'a str,
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_name: Option<&'a str>,
    transaction_reference: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CheckoutData {
    checkout_url: String,
    transaction_reference: String,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    transaction_reference: String,
    transaction_status: String,
    amount: serde_json::Value,
    currency: String,
    #[serde(default)]
    payaza_reference: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WebhookBody {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: WebhookData,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookData {
    #[serde(default)]
    transaction_reference: Option<String>,
    #[serde(default)]
    transaction_status: Option<String>,
}

fn convert_status(status: &str) -> ProviderPaymentStatus {
    match status.to_ascii_lowercase().as_str() {
        "completed" | "successful" | "success" => ProviderPaymentStatus::Success,
        "failed" => ProviderPaymentStatus::Failed,
        "cancelled" | "abandoned" | "expired" => ProviderPaymentStatus::Abandoned,
        _ => ProviderPaymentStatus::Pending,
    }
}

fn into_verified(data: TransactionData, raw: serde_json::Value) -> Result<VerifiedPayment, PipelineError> {
    Ok(VerifiedPayment {
        provider: ProviderKind::Payaza,
        reference: Reference::new(data.transaction_reference)?,
        status: convert_status(&data.transaction_status),
        money: Money::new(
            MoneyAmount::from_major_json(&data.amount)?,
            Currency::try_from(data.currency.as_str())?,
        ),
        metadata: PaymentMetadata::from_value(&data.metadata),
        provider_transaction_id: None,
        provider_reference: data.payaza_reference,
        raw,
    })
}

impl PayazaProvider {
    async fn initialize_inner(&self, req: &InitRequest) -> Result<InitializedPayment, PipelineError> {
        let body = CheckoutBody {
            amount: req.money.amount().major_json(),
            currency: req.money.currency().as_str(),
            email: &req.email,
            first_name: req.customer_name.as_deref(),
            transaction_reference: req.reference.as_str(),
            description: &req.description,
            callback_url: self.callback_url.as_deref(),
            metadata: req.metadata.to_value(),
        };

        let response = self
            .client
            .post(format!("{}/checkout/initialize", self.settings.base_url))
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::ProviderInit(format!("payaza: {e}")))?;

        let http_status = response.status();
        let envelope: Envelope<CheckoutData> = response
            .json()
            .await
            .map_err(|e| PipelineError::ProviderInit(format!("payaza: {e}")))?;

        match envelope.data {
            Some(data) if envelope.success && http_status.is_success() => Ok(InitializedPayment {
                authorization_url: data.checkout_url,
                reference: Reference::new(data.transaction_reference)?,
                provider_reference: None,
            }),
            _ => Err(PipelineError::ProviderInit(format!(
                "payaza returned {http_status}: {}",
                envelope.message
            ))),
        }
    }

    async fn verify_inner(&self, reference: &Reference) -> Result<VerifiedPayment, PipelineError> {
        let url = gateway_url(
            &self.settings.base_url,
            &["transactions", "verify", reference.as_str()],
        )?;
        let raw: serde_json::Value = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .send()
            .await
            .map_err(|e| PipelineError::Provider(format!("payaza: {e}")))?
            .json()
            .await
            .map_err(|e| PipelineError::Provider(format!("payaza: {e}")))?;

        let envelope: Envelope<TransactionData> = serde_json::from_value(raw.clone())?;
        match envelope.data {
            Some(data) if envelope.success => into_verified(data, raw),
            _ => Err(PipelineError::Provider(format!(
                "payaza verify failed: {}",
                envelope.message
            ))),
        }
    }
}

impl PaymentProvider for PayazaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Payaza
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
                .inspect_err(|e| tracing::warn!(%reference, error = %e, "payaza verify failed"))
                .ok()
        })
    }

    fn validate_signature(&self, headers: &HeaderMap, raw_body: &[u8]) -> bool {
        check_hmac_header(
            "payaza",
            self.settings.webhook_secret.as_deref(),
            headers,
            SIGNATURE_HEADER,
            raw_body,
        )
    }

    fn parse_webhook_event(&self, raw_body: &[u8]) -> Result<WebhookEvent, PipelineError> {
        parse_event(raw_body)
    }
}

/// Payaza posts one notification shape for every transaction update; only
/// completed ones trigger reconciliation.
fn parse_event(raw_body: &[u8]) -> Result<WebhookEvent, PipelineError> {
    let body: WebhookBody = serde_json::from_slice(raw_body)?;
    let status = body.data.transaction_status.as_deref().unwrap_or_default();
    if convert_status(status) != ProviderPaymentStatus::Success {
        return Ok(WebhookEvent::Unhandled {
            event_type: format!(
                "{}:{status}",
                body.event.as_deref().unwrap_or("transaction")
            ),
        });
    }
    Ok(WebhookEvent::PaymentSucceeded {
        reference: body
            .data
            .transaction_reference
            .map(Reference::new)
            .transpose()?,
    })
}
