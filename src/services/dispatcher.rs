use {
    super::{payments::ProviderRegistry, webhook_processor::WebhookProcessor},
    crate::domain::{audit::NewAuditEntry, provider::ProviderKind, store::Store},
    axum::{body::Bytes, http::HeaderMap},
    std::sync::Arc,
    tokio::sync::{mpsc, watch},
};

pub const WEBHOOK_QUEUE_CAPACITY: usize = 1024;

/// A webhook delivery that has been acknowledged but not yet processed.
#[derive(Debug, Clone)]
pub struct WebhookJob {
    pub provider: ProviderKind,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Producer side of the webhook queue, held by the HTTP handler.
#[derive(Clone)]
pub struct WebhookDispatcher {
    tx: mpsc::Sender<WebhookJob>,
    store: Arc<dyn Store>,
}

impl WebhookDispatcher {
    pub fn new(store: Arc<dyn Store>, capacity: usize) -> (Self, mpsc::Receiver<WebhookJob>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, store }, rx)
    }

    /// Queue a job without waiting. A rejected job is dead-lettered; the
    /// poller will still pick the payment up.
    pub fn dispatch(&self, job: WebhookJob) -> bool {
        let (job, reason) = match self.tx.try_send(job) {
            Ok(()) => return true,
            Err(mpsc::error::TrySendError::Full(job)) => (job, "webhook queue full"),
            Err(mpsc::error::TrySendError::Closed(job)) => (job, "webhook worker stopped"),
        };
        tracing::error!(provider = %job.provider, reason, "dropping webhook");

        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let entry = NewAuditEntry::webhook_failure(
                job.provider.as_str(),
                None,
                reason,
                serde_json::Value::String(String::from_utf8_lossy(&job.body).into_owned()),
            );
            if let Err(e) = store.record_audit(&entry).await {
                tracing::error!(error = %e, "failed to dead-letter webhook");
            }
        });
        false
    }
}

/// Consume queued webhooks. Each job runs in its own task so a panic is
/// contained and recorded instead of killing the worker.
pub async fn run_webhook_worker(
    mut rx: mpsc::Receiver<WebhookJob>,
    providers: ProviderRegistry,
    processor: WebhookProcessor,
    store: Arc<dyn Store>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("webhook worker started");

    loop {
        let job = tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("webhook worker shutting down");
                return;
            }
            job = rx.recv() => match job {
                Some(job) => job,
                None => return,
            },
        };

        let Some(provider) = providers.get(job.provider).cloned() else {
            tracing::warn!(provider = %job.provider, "webhook for unconfigured provider");
            continue;
        };

        let processor = processor.clone();
        let kind = job.provider;
        let handle = tokio::spawn(async move {
            processor
                .process(provider.as_ref(), &job.headers, &job.body)
                .await
        });

        match handle.await {
            Ok(outcome) => {
                tracing::info!(provider = %kind, ok = outcome.is_ok(), outcome = outcome.label(), "webhook job done")
            }
            Err(e) => {
                tracing::error!(provider = %kind, error = %e, "webhook job panicked");
                let entry = NewAuditEntry::webhook_failure(
                    kind.as_str(),
                    None,
                    "worker task panicked",
                    serde_json::json!({ "error": e.to_string() }),
                );
                if let Err(e) = store.record_audit(&entry).await {
                    tracing::error!(error = %e, "failed to dead-letter webhook");
                }
            }
        }
    }
}
