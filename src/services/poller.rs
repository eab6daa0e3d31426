use {
    super::{
        payments::{ProviderRegistry, VerifyOutcome, settle_verified},
        reconciliation::Reconciler,
    },
    crate::domain::{error::PipelineError, provider::PaymentProvider, store::Store},
    chrono::Utc,
    std::{sync::Arc, time::Duration},
    tokio::sync::watch,
};

/// Only transactions created this recently are re-verified.
pub const POLL_WINDOW_HOURS: i64 = 2;
pub const POLL_BATCH_LIMIT: i64 = 50;

/// Counts from one provider pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollStats {
    pub checked: usize,
    pub reconciled: usize,
    pub failed: usize,
    pub errors: usize,
}

/// Re-verify recent pending transactions so payments whose webhook never
/// arrived still produce tickets.
pub async fn run_poller(
    store: Arc<dyn Store>,
    providers: ProviderRegistry,
    reconciler: Reconciler,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(interval_secs = interval.as_secs(), "payment poller started");

    loop {
        for provider in providers.enabled() {
            match poll_provider(&store, provider.as_ref(), &reconciler).await {
                Ok(stats) if stats.checked > 0 => {
                    tracing::info!(provider = %provider.kind(), ?stats, "poll pass complete")
                }
                Ok(_) => {}
                Err(e) => tracing::error!(provider = %provider.kind(), error = %e, "poll pass failed"),
            }
            if *shutdown.borrow() {
                break;
            }
        }

        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("payment poller shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// One sequential pass over a provider's recent pending transactions,
/// including ones a crashed pass left claimed past the lease.
pub async fn poll_provider(
    store: &Arc<dyn Store>,
    provider: &dyn PaymentProvider,
    reconciler: &Reconciler,
) -> Result<PollStats, PipelineError> {
    let now = Utc::now();
    let since = now - chrono::Duration::hours(POLL_WINDOW_HOURS);
    let pending = store
        .list_pending_transactions(provider.kind(), since, now - reconciler.lease(), POLL_BATCH_LIMIT)
        .await?;

    let mut stats = PollStats::default();
    for transaction in pending {
        stats.checked += 1;
        let Some(payment) = provider.verify(&transaction.reference).await else {
            continue;
        };

        match settle_verified(store, reconciler, payment, "poller").await {
            Ok(VerifyOutcome::Reconciled(outcome)) => {
                tracing::info!(reference = %transaction.reference, outcome = outcome.label(), "reconciled by poller");
                stats.reconciled += 1;
            }
            Ok(VerifyOutcome::Failed(_)) => stats.failed += 1,
            Ok(VerifyOutcome::NotConfirmed(_)) => {}
            Err(e) => {
                tracing::warn!(reference = %transaction.reference, error = %e, "poller reconciliation failed");
                stats.errors += 1;
            }
        }
    }
    Ok(stats)
}
