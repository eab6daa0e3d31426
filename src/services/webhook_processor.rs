use {
    super::{
        payments::{VerifyOutcome, settle_verified},
        reconciliation::{ReconcileOutcome, Reconciler, RejectReason},
    },
    crate::domain::{
        audit::NewAuditEntry,
        error::PipelineError,
        provider::{PaymentProvider, WebhookEvent},
        store::Store,
    },
    axum::http::HeaderMap,
    std::sync::Arc,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookRejection {
    InvalidSignature,
    MissingReference,
    VerificationFailed,
    UnhandledEvent(String),
    MissingMetadata,
    ProcessingError(String),
}

impl WebhookRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidSignature => "invalid_signature",
            Self::MissingReference => "missing_reference",
            Self::VerificationFailed => "verification_failed",
            Self::UnhandledEvent(_) => "unhandled_event",
            Self::MissingMetadata => "missing_metadata",
            Self::ProcessingError(_) => "processing_error",
        }
    }
}

#[derive(Debug, Clone)]
pub enum WebhookOutcome {
    Processed(ReconcileOutcome),
    Rejected(WebhookRejection),
}

impl WebhookOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Processed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Processed(outcome) => outcome.label(),
            Self::Rejected(rejection) => rejection.reason(),
        }
    }
}

#[derive(Clone)]
pub struct WebhookProcessor {
    store: Arc<dyn Store>,
    reconciler: Reconciler,
}

impl WebhookProcessor {
    pub fn new(store: Arc<dyn Store>, reconciler: Reconciler) -> Self {
        Self { store, reconciler }
    }

    /// Validate, re-verify and reconcile one webhook delivery. Never fails:
    /// every problem becomes a [`WebhookRejection`].
    #[tracing::instrument(name = "webhook", skip_all, fields(provider = %provider.kind(), reference = tracing::field::Empty))]
    pub async fn process(
        &self,
        provider: &dyn PaymentProvider,
        headers: &HeaderMap,
        raw_body: &[u8],
    ) -> WebhookOutcome {
        if !provider.validate_signature(headers, raw_body) {
            tracing::warn!("invalid webhook signature");
            return WebhookOutcome::Rejected(WebhookRejection::InvalidSignature);
        }

        let reference = match provider.parse_webhook_event(raw_body) {
            Ok(WebhookEvent::PaymentSucceeded {
                reference: Some(reference),
            }) => reference,
            Ok(WebhookEvent::PaymentSucceeded { reference: None }) => {
                tracing::warn!("success event without a reference");
                return WebhookOutcome::Rejected(WebhookRejection::MissingReference);
            }
            Ok(WebhookEvent::Unhandled { event_type }) => {
                tracing::debug!(%event_type, "ignoring webhook event");
                return WebhookOutcome::Rejected(WebhookRejection::UnhandledEvent(event_type));
            }
            Err(e) => return self.fail(provider, None, e, raw_body).await,
        };
        tracing::Span::current().record("reference", tracing::field::display(&reference));

        let Some(payment) = provider.verify(&reference).await else {
            tracing::warn!("gateway could not confirm the payment");
            return WebhookOutcome::Rejected(WebhookRejection::VerificationFailed);
        };

        match settle_verified(&self.store, &self.reconciler, payment, "webhook").await {
            Ok(VerifyOutcome::Reconciled(ReconcileOutcome::Rejected(RejectReason::MissingMetadata))) => {
                WebhookOutcome::Rejected(WebhookRejection::MissingMetadata)
            }
            Ok(VerifyOutcome::Reconciled(outcome)) => {
                tracing::info!(outcome = outcome.label(), "webhook processed");
                WebhookOutcome::Processed(outcome)
            }
            Ok(VerifyOutcome::Failed(status) | VerifyOutcome::NotConfirmed(Some(status))) => {
                tracing::warn!(status = status.as_str(), "gateway reports payment not successful");
                WebhookOutcome::Rejected(WebhookRejection::VerificationFailed)
            }
            Ok(VerifyOutcome::NotConfirmed(None)) => {
                WebhookOutcome::Rejected(WebhookRejection::VerificationFailed)
            }
            Err(e) => self.fail(provider, Some(reference.as_str()), e, raw_body).await,
        }
    }

    async fn fail(
        &self,
        provider: &dyn PaymentProvider,
        reference: Option<&str>,
        error: PipelineError,
        raw_body: &[u8],
    ) -> WebhookOutcome {
        if error.is_permanent() {
            tracing::warn!(error = %error, "webhook rejected by validation");
        } else {
            tracing::error!(error = %error, "webhook processing failed");
        }
        let payload = serde_json::from_slice(raw_body)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(raw_body).into_owned()));
        let entry = NewAuditEntry::webhook_failure(
            provider.kind().as_str(),
            reference,
            &error.to_string(),
            payload,
        );
        if let Err(e) = self.store.record_audit(&entry).await {
            tracing::error!(error = %e, "failed to record webhook failure");
        }
        WebhookOutcome::Rejected(WebhookRejection::ProcessingError(error.to_string()))
    }
}
