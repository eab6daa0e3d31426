use {
    super::signature::{constant_time_eq, header},
    crate::{
        config::FlutterwaveSettings,
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

/// Flutterwave sends the configured secret hash verbatim in this header.
pub const SIGNATURE_HEADER: &str = "verif-hash";

pub struct FlutterwaveProvider {
    client: reqwest::Client,
    settings: FlutterwaveSettings,
    redirect_url: Option<String>,
}

impl FlutterwaveProvider {
    pub fn new(
        client: reqwest::Client,
        settings: FlutterwaveSettings,
        redirect_url: Option<String>,
    ) -> Self {
        Self {
            client,
            settings,
            redirect_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_success(self) -> Result<T, String> {
        match self.data {
            Some(data) if self.status == "success" => Ok(data),
            _ => Err(self.message),
        }
    }
}

#[derive(Debug, Serialize)]
struct Customer<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Customizations<'a> {
    title: &'a str,
}

#[derive(Debug, Serialize)]
struct PaymentBody<'a> {
    tx_ref: &'a str,
    /// Major units.
    amount: serde_json::Value,
    currency: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect_url: Option<&'a str>,
    customer: Customer<'a>,
    meta: serde_json::Value,
    customizations: Customizations<'a>,
}

#[derive(Debug, Deserialize)]
struct PaymentLink {
    link: String,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    id: i64,
    tx_ref: String,
    #[serde(default)]
    flw_ref: Option<String>,
    amount: serde_json::Value,
    currency: String,
    status: String,
    #[serde(default)]
    meta: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
enum WebhookPayload {
    #[serde(rename = "charge.completed")]
    ChargeCompleted(ChargeData),
}

#[derive(Debug, Deserialize)]
struct ChargeData {
    #[serde(default)]
    tx_ref: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventName {
    event: String,
}

fn convert_status(status: &str) -> ProviderPaymentStatus {
    match status {
        "successful" => ProviderPaymentStatus::Success,
        "failed" => ProviderPaymentStatus::Failed,
        "cancelled" => ProviderPaymentStatus::Abandoned,
        _ => ProviderPaymentStatus::Pending,
    }
}

fn into_verified(data: TransactionData, raw: serde_json::Value) -> Result<VerifiedPayment, PipelineError> {
    Ok(VerifiedPayment {
        provider: ProviderKind::Flutterwave,
        reference: Reference::new(data.tx_ref)?,
        status: convert_status(&data.status),
        money: Money::new(
            MoneyAmount::from_major_json(&data.amount)?,
            Currency::try_from(data.currency.as_str())?,
        ),
        metadata: PaymentMetadata::from_value(&data.meta),
        provider_transaction_id: Some(data.id.to_string()),
        provider_reference: data.flw_ref,
        raw,
    })
}

impl FlutterwaveProvider {
    async fn initialize_inner(&self, req: &InitRequest) -> Result<InitializedPayment, PipelineError> {
        let body = PaymentBody {
            tx_ref: req.reference.as_str(),
            amount: req.money.amount().major_json(),
            currency: req.money.currency().as_str(),
            redirect_url: self.redirect_url.as_deref(),
            customer: Customer {
                email: &req.email,
                name: req.customer_name.as_deref(),
            },
            meta: req.metadata.to_value(),
            customizations: Customizations {
                title: &req.description,
            },
        };

        let envelope: Envelope<PaymentLink> = self
            .client
            .post(format!("{}/v3/payments", self.settings.base_url))
            .bearer_auth(&self.settings.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::ProviderInit(format!("flutterwave: {e}")))?
            .json()
            .await
            .map_err(|e| PipelineError::ProviderInit(format!("flutterwave: {e}")))?;

        let link = envelope
            .into_success()
            .map_err(|message| PipelineError::ProviderInit(format!("flutterwave: {message}")))?;
        Ok(InitializedPayment {
            authorization_url: link.link,
            reference: req.reference.clone(),
            provider_reference: None,
        })
    }

    async fn verify_inner(&self, reference: &Reference) -> Result<VerifiedPayment, PipelineError> {
        let raw: serde_json::Value = self
            .client
            .get(format!(
                "{}/v3/transactions/verify_by_reference",
                self.settings.base_url
            ))
            .query(&[("tx_ref", reference.as_str())])
            .bearer_auth(&self.settings.secret_key)
            .send()
            .await
            .map_err(|e| PipelineError::Provider(format!("flutterwave: {e}")))?
            .json()
            .await
            .map_err(|e| PipelineError::Provider(format!("flutterwave: {e}")))?;

        let envelope: Envelope<TransactionData> = serde_json::from_value(raw.clone())?;
        let data = envelope
            .into_success()
            .map_err(|message| PipelineError::Provider(format!("flutterwave verify failed: {message}")))?;
        into_verified(data, raw)
    }
}

impl PaymentProvider for FlutterwaveProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Flutterwave
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
                .inspect_err(|e| tracing::warn!(%reference, error = %e, "flutterwave verify failed"))
                .ok()
        })
    }

    fn validate_signature(&self, headers: &HeaderMap, _raw_body: &[u8]) -> bool {
        let Some(expected) = self.settings.webhook_hash.as_deref() else {
            tracing::warn!(provider = "flutterwave", "webhook hash not configured, skipping signature check");
            return true;
        };
        header(headers, SIGNATURE_HEADER).is_some_and(|received| constant_time_eq(received, expected))
    }

    fn parse_webhook_event(&self, raw_body: &[u8]) -> Result<WebhookEvent, PipelineError> {
        parse_event(raw_body)
    }
}

fn parse_event(raw_body: &[u8]) -> Result<WebhookEvent, PipelineError> {
    let name: EventName = serde_json::from_slice(raw_body)?;
    if name.event != "charge.completed" {
        return Ok(WebhookEvent::Unhandled {
            event_type: name.event,
        });
    }
    let WebhookPayload::ChargeCompleted(charge) = serde_json::from_slice(raw_body)?;
    // charge.completed also fires for failed charges.
    match charge.status.as_deref() {
        Some("successful") => Ok(WebhookEvent::PaymentSucceeded {
            reference: charge.tx_ref.map(Reference::new).transpose()?,
        }),
        other => Ok(WebhookEvent::Unhandled {
            event_type: format!("charge.completed:{}", other.unwrap_or("unknown")),
        }),
    }
}
