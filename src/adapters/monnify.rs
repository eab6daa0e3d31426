use {
    super::signature::check_hmac_header,
    crate::{
        config::MonnifySettings,
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
    std::time::{Duration, Instant},
    tokio::sync::Mutex,
};

pub const SIGNATURE_HEADER: &str = "monnify-signature";

/// Refresh the access token this long before Monnify expires it.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct MonnifyProvider {
    client: reqwest::Client,
    settings: MonnifySettings,
    redirect_url: Option<String>,
    token: Mutex<Option<CachedToken>>,
}

impl MonnifyProvider {
    pub fn new(client: reqwest::Client, settings: MonnifySettings, redirect_url: Option<String>) -> Self {
        Self {
            client,
            settings,
            redirect_url,
            token: Mutex::new(None),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    request_successful: bool,
    #[serde(default)]
    response_message: String,
    response_body: Option<T>,
}

impl<T> Envelope<T> {
    fn into_success(self) -> Result<T, String> {
        match self.response_body {
            Some(body) if self.request_successful => Ok(body),
            _ => Err(self.response_message),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginBody {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitTransactionBody<'a> {
    amount: serde_json::Value,
    customer_name: &'a str,
    customer_email: &'a str,
    payment_reference: &'a str,
    payment_description: &'a str,
    currency_code: &'a str,
    contract_code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect_url: Option<&'a str>,
    meta_data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitTransactionResult {
    transaction_reference: String,
    payment_reference: String,
    checkout_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionStatusBody {
    transaction_reference: String,
    payment_reference: String,
    amount_paid: serde_json::Value,
    payment_status: String,
    currency_code: String,
    #[serde(default)]
    meta_data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "eventType", content = "eventData")]
enum WebhookPayload {
    #[serde(rename = "SUCCESSFUL_TRANSACTION")]
    SuccessfulTransaction(TransactionEventData),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionEventData {
    #[serde(default)]
    payment_reference: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventName {
    event_type: String,
}

fn convert_status(status: &str) -> ProviderPaymentStatus {
    match status {
        "PAID" | "OVERPAID" => ProviderPaymentStatus::Success,
        "FAILED" | "REVERSED" => ProviderPaymentStatus::Failed,
        "EXPIRED" | "CANCELLED" => ProviderPaymentStatus::Abandoned,
        _ => ProviderPaymentStatus::Pending,
    }
}

fn into_verified(body: TransactionStatusBody, raw: serde_json::Value) -> Result<VerifiedPayment, PipelineError> {
    Ok(VerifiedPayment {
        provider: ProviderKind::Monnify,
        reference: Reference::new(body.payment_reference)?,
        status: convert_status(&body.payment_status),
        money: Money::new(
            MoneyAmount::from_major_json(&body.amount_paid)?,
            Currency::try_from(body.currency_code.as_str())?,
        ),
        metadata: PaymentMetadata::from_value(&body.meta_data),
        provider_transaction_id: None,
        provider_reference: Some(body.transaction_reference),
        raw,
    })
}

impl MonnifyProvider {
    async fn access_token(&self) -> Result<String, PipelineError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let envelope: Envelope<LoginBody> = self
            .client
            .post(format!("{}/api/v1/auth/login", self.settings.base_url))
            .basic_auth(&self.settings.api_key, Some(&self.settings.secret_key))
            .send()
            .await
            .map_err(|e| PipelineError::Provider(format!("monnify login: {e}")))?
            .json()
            .await
            .map_err(|e| PipelineError::Provider(format!("monnify login: {e}")))?;
        let login = envelope
            .into_success()
            .map_err(|message| PipelineError::Provider(format!("monnify login: {message}")))?;

        let lifetime = Duration::from_secs(login.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *cached = Some(CachedToken {
            value: login.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(login.access_token)
    }

    async fn initialize_inner(&self, req: &InitRequest) -> Result<InitializedPayment, PipelineError> {
        let token = self
            .access_token()
            .await
            .map_err(|e| PipelineError::ProviderInit(e.to_string()))?;
        let body = InitTransactionBody {
            amount: req.money.amount().major_json(),
            customer_name: req.customer_name.as_deref().unwrap_or(&req.email),
            customer_email: &req.email,
            payment_reference: req.reference.as_str(),
            payment_description: &req.description,
            currency_code: req.money.currency().as_str(),
            contract_code: &self.settings.contract_code,
            redirect_url: self.redirect_url.as_deref(),
            meta_data: req.metadata.to_value(),
        };

        let envelope: Envelope<InitTransactionResult> = self
            .client
            .post(format!(
                "{}/api/v1/merchant/transactions/init-transaction",
                self.settings.base_url
            ))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::ProviderInit(format!("monnify: {e}")))?
            .json()
            .await
            .map_err(|e| PipelineError::ProviderInit(format!("monnify: {e}")))?;

        let result = envelope
            .into_success()
            .map_err(|message| PipelineError::ProviderInit(format!("monnify: {message}")))?;
        Ok(InitializedPayment {
            authorization_url: result.checkout_url,
            reference: Reference::new(result.payment_reference)?,
            provider_reference: Some(result.transaction_reference),
        })
    }

    async fn verify_inner(&self, reference: &Reference) -> Result<VerifiedPayment, PipelineError> {
        let token = self.access_token().await?;
        let raw: serde_json::Value = self
            .client
            .get(format!(
                "{}/api/v2/merchant/transactions/query",
                self.settings.base_url
            ))
            .query(&[("paymentReference", reference.as_str())])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| PipelineError::Provider(format!("monnify: {e}")))?
            .json()
            .await
            .map_err(|e| PipelineError::Provider(format!("monnify: {e}")))?;

        let envelope: Envelope<TransactionStatusBody> = serde_json::from_value(raw.clone())?;
        let body = envelope
            .into_success()
            .map_err(|message| PipelineError::Provider(format!("monnify verify failed: {message}")))?;
        into_verified(body, raw)
    }
}

impl PaymentProvider for MonnifyProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Monnify
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
                .inspect_err(|e| tracing::warn!(%reference, error = %e, "monnify verify failed"))
                .ok()
        })
    }

    fn validate_signature(&self, headers: &HeaderMap, raw_body: &[u8]) -> bool {
        check_hmac_header(
            "monnify",
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
    if name.event_type != "SUCCESSFUL_TRANSACTION" {
        return Ok(WebhookEvent::Unhandled {
            event_type: name.event_type,
        });
    }
    let WebhookPayload::SuccessfulTransaction(data) = serde_json::from_slice(raw_body)?;
    Ok(WebhookEvent::PaymentSucceeded {
        reference: data.payment_reference.map(Reference::new).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::adapters::signature::hmac_sha512_hex,
        axum::http::HeaderValue,
        wiremock::{
            Mock, MockServer, ResponseTemplate,
            matchers::{header, method, path, query_param},
        },
    };

    fn provider(base_url: &str) -> MonnifyProvider {
        MonnifyProvider::new(
            reqwest::Client::new(),
            MonnifySettings {
                api_key: "MK_TEST".into(),
                secret_key: "client-secret".into(),
                contract_code: "1234567890".into(),
                base_url: base_url.into(),
            },
            None,
        )
    }

    #[test]
    fn signature_uses_client_secret() {
        let body = br#"{"eventType":"SUCCESSFUL_TRANSACTION","eventData":{"paymentReference":"mnfy_1"}}"#;
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&hmac_sha512_hex(b"client-secret", body)).unwrap(),
        );
        assert!(provider("http://unused").validate_signature(&headers, body));
    }

    #[test]
    fn successful_transaction_event() {
        let body = br#"{"eventType":"SUCCESSFUL_TRANSACTION","eventData":{"paymentReference":"mnfy_1","amountPaid":"5000.00"}}"#;
        assert_eq!(
            parse_event(body).unwrap(),
            WebhookEvent::PaymentSucceeded {
                reference: Some(Reference::new("mnfy_1").unwrap())
            }
        );
        let refund = br#"{"eventType":"SUCCESSFUL_REFUND","eventData":{}}"#;
        assert!(matches!(parse_event(refund).unwrap(), WebhookEvent::Unhandled { .. }));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(convert_status("PAID"), ProviderPaymentStatus::Success);
        assert_eq!(convert_status("OVERPAID"), ProviderPaymentStatus::Success);
        assert_eq!(convert_status("PARTIALLY_PAID"), ProviderPaymentStatus::Pending);
        assert_eq!(convert_status("EXPIRED"), ProviderPaymentStatus::Abandoned);
    }

    #[tokio::test]
    async fn verify_logs_in_once_and_queries_by_reference() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "requestSuccessful": true,
                "responseMessage": "0",
                "responseBody": {"accessToken": "tok-1", "expiresIn": 3600}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/merchant/transactions/query"))
            .and(query_param("paymentReference", "mnfy_1"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "requestSuccessful": true,
                "responseMessage": "success",
                "responseBody": {
                    "transactionReference": "MNFY|20240101|000001",
                    "paymentReference": "mnfy_1",
                    "amountPaid": "2500.50",
                    "paymentStatus": "PAID",
                    "currencyCode": "NGN",
                    "metaData": {"eventId": "E1", "userId": "U1"}
                }
            })))
            .mount(&server)
            .await;

        let p = provider(&server.uri());
        let reference = Reference::new("mnfy_1").unwrap();
        let first = p.verify(&reference).await.unwrap();
        let second = p.verify(&reference).await.unwrap();

        assert_eq!(first.money.amount().minor(), 250_050);
        assert_eq!(first.provider_reference.as_deref(), Some("MNFY|20240101|000001"));
        assert_eq!(second.status, ProviderPaymentStatus::Success);
    }
}
