use {
    super::reconciliation::{ReconcileOutcome, Reconciler, purchase_quantity},
    crate::domain::{
        error::PipelineError,
        event::validate_quantity,
        id::{EventId, Reference, TicketTypeId, UserId},
        money::Money,
        payment::{Assignee, PaymentMetadata, ProviderPaymentStatus, VerifiedPayment},
        provider::{InitRequest, InitializedPayment, PaymentProvider, ProviderKind},
        store::Store,
        transaction::{NewTransaction, NewTransactionParams, Transaction, TransactionStatus},
    },
    chrono::Utc,
    std::{collections::HashMap, sync::Arc},
    uuid::Uuid,
};

/// Configured gateways, keyed by kind. A gateway without credentials is
/// simply absent.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn PaymentProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&Arc<dyn PaymentProvider>> {
        self.providers.get(&kind)
    }

    pub fn require(&self, kind: ProviderKind) -> Result<&Arc<dyn PaymentProvider>, PipelineError> {
        self.get(kind).ok_or_else(|| {
            PipelineError::Validation(format!("payment provider {kind} is not configured"))
        })
    }

    /// Enabled providers in a fixed order.
    pub fn enabled(&self) -> Vec<Arc<dyn PaymentProvider>> {
        ProviderKind::ALL
            .iter()
            .filter_map(|kind| self.providers.get(kind).cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct InitPaymentRequest {
    pub user_id: UserId,
    pub event_id: EventId,
    pub ticket_type_id: Option<TicketTypeId>,
    pub quantity: u32,
    pub email: String,
    pub customer_name: Option<String>,
    pub money: Money,
    pub assignees: Vec<Assignee>,
}

#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub reference: Reference,
    pub money: Money,
    pub user_id: UserId,
    pub event_id: EventId,
    pub ticket_type_id: Option<TicketTypeId>,
    pub quantity: u32,
    pub trans_id: Option<String>,
    pub trans_reference: Option<String>,
    pub metadata: PaymentMetadata,
}

/// Result of a client-triggered verification.
#[derive(Debug, Clone)]
pub enum VerifyOutcome {
    Reconciled(ReconcileOutcome),
    /// Gateway has no final answer yet (or could not be reached).
    NotConfirmed(Option<ProviderPaymentStatus>),
    Failed(ProviderPaymentStatus),
}

#[derive(Clone)]
pub struct PaymentService {
    providers: ProviderRegistry,
    store: Arc<dyn Store>,
    reconciler: Reconciler,
}

impl PaymentService {
    pub fn new(providers: ProviderRegistry, store: Arc<dyn Store>, reconciler: Reconciler) -> Self {
        Self {
            providers,
            store,
            reconciler,
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Open a checkout with the gateway and start tracking the payment.
    #[tracing::instrument(skip_all, fields(provider = %kind, event_id = %req.event_id))]
    pub async fn initialize_payment(
        &self,
        kind: ProviderKind,
        req: InitPaymentRequest,
    ) -> Result<InitializedPayment, PipelineError> {
        let provider = self.providers.require(kind)?;

        let metadata = PaymentMetadata {
            event_id: Some(req.event_id.clone()),
            user_id: Some(req.user_id.clone()),
            ticket_type_id: req.ticket_type_id.clone(),
            quantity: Some(req.quantity),
            assignees: req.assignees,
            extra: serde_json::Map::from_iter([(
                "email".to_string(),
                serde_json::Value::String(req.email.clone()),
            )]),
        };
        let quantity = purchase_quantity(&metadata);
        validate_quantity(quantity)?;
        if req.money.amount().is_zero() {
            return Err(PipelineError::Validation("amount must be greater than zero".into()));
        }
        if !req.email.contains('@') {
            return Err(PipelineError::Validation("a valid email is required".into()));
        }
        if self.store.get_event(&req.event_id).await?.is_none() {
            return Err(PipelineError::NotFound(format!("event {}", req.event_id)));
        }

        let reference = generate_reference(kind)?;
        let init = InitRequest {
            reference: reference.clone(),
            money: req.money,
            email: req.email,
            customer_name: req.customer_name,
            description: format!("Ticket purchase for event {}", req.event_id),
            metadata: metadata.clone(),
        };
        let session = provider.initialize(&init).await?;

        let inserted = self
            .store
            .insert_transaction(&NewTransaction::new(NewTransactionParams {
                provider: kind,
                reference,
                trans_id: None,
                trans_reference: session.provider_reference.clone(),
                money: req.money,
                status: TransactionStatus::Pending,
                user_id: req.user_id,
                event_id: req.event_id,
                ticket_type_id: req.ticket_type_id,
                quantity,
                metadata,
                raw: serde_json::Value::Null,
            }))
            .await?;
        if !inserted {
            tracing::debug!(reference = %session.reference, "transaction already tracked");
        }

        tracing::info!(reference = %session.reference, "payment initialized");
        Ok(session)
    }

    /// Record a payment completed by a client SDK. Registering the same
    /// (provider, reference) twice returns the existing record.
    #[tracing::instrument(skip_all, fields(provider = %kind, reference = %req.reference))]
    pub async fn register_transaction(
        &self,
        kind: ProviderKind,
        req: RegisterRequest,
    ) -> Result<(Transaction, bool), PipelineError> {
        validate_quantity(req.quantity)?;

        let metadata = PaymentMetadata {
            event_id: Some(req.event_id.clone()),
            user_id: Some(req.user_id.clone()),
            ticket_type_id: req.ticket_type_id.clone(),
            quantity: Some(req.quantity),
            ..PaymentMetadata::default()
        }
        .or_fill_from(req.metadata);

        let created = self
            .store
            .insert_transaction(&NewTransaction::new(NewTransactionParams {
                provider: kind,
                reference: req.reference.clone(),
                trans_id: req.trans_id,
                trans_reference: req.trans_reference,
                money: req.money,
                status: TransactionStatus::Created,
                user_id: req.user_id,
                event_id: req.event_id,
                ticket_type_id: req.ticket_type_id,
                quantity: req.quantity,
                metadata,
                raw: serde_json::Value::Null,
            }))
            .await?;

        let transaction = self
            .store
            .find_transaction(kind, &req.reference)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("transaction {kind}/{}", req.reference)))?;

        tracing::info!(created, transaction_id = %transaction.id, "transaction registered");
        Ok((transaction, created))
    }

    /// Look the payment up with the gateway and reconcile it if it succeeded.
    pub async fn verify_and_reconcile(
        &self,
        kind: ProviderKind,
        reference: &Reference,
    ) -> Result<VerifyOutcome, PipelineError> {
        let provider = self.providers.require(kind)?;
        let Some(payment) = provider.verify(reference).await else {
            return Ok(VerifyOutcome::NotConfirmed(None));
        };
        settle_verified(&self.store, &self.reconciler, payment, "verify").await
    }
}

/// Apply a gateway lookup result: reconcile on success, close the
/// transaction on an explicit failure, leave it otherwise.
pub async fn settle_verified(
    store: &Arc<dyn Store>,
    reconciler: &Reconciler,
    payment: VerifiedPayment,
    actor: &str,
) -> Result<VerifyOutcome, PipelineError> {
    match payment.status {
        ProviderPaymentStatus::Success => {
            let payment = with_ledger_metadata(store.as_ref(), payment).await?;
            Ok(VerifyOutcome::Reconciled(
                reconciler.handle_successful_payment(&payment).await?,
            ))
        }
        status if status.is_explicit_failure() => {
            mark_failed(store.as_ref(), &payment, actor).await?;
            Ok(VerifyOutcome::Failed(status))
        }
        status => Ok(VerifyOutcome::NotConfirmed(Some(status))),
    }
}

/// Gateways do not always echo metadata back; fill gaps from the row recorded
/// at init or registration.
pub async fn with_ledger_metadata(
    store: &dyn Store,
    mut payment: VerifiedPayment,
) -> Result<VerifiedPayment, PipelineError> {
    if let Some(stored) = store
        .find_transaction(payment.provider, &payment.reference)
        .await?
    {
        payment.metadata = payment.metadata.or_fill_from(stored.effective_metadata());
    }
    Ok(payment)
}

async fn mark_failed(
    store: &dyn Store,
    payment: &VerifiedPayment,
    actor: &str,
) -> Result<(), PipelineError> {
    let Some(transaction) = store
        .find_transaction(payment.provider, &payment.reference)
        .await?
    else {
        return Ok(());
    };

    if store
        .mark_transaction_failed(transaction.id, payment.raw.clone())
        .await?
    {
        tracing::info!(
            provider = %payment.provider,
            reference = %payment.reference,
            status = payment.status.as_str(),
            "transaction marked failed"
        );
        let mut entry = transaction.audit_entry(&format!("{actor}:{}", payment.provider), "marked_failed");
        entry.detail["providerStatus"] = serde_json::json!(payment.status.as_str());
        store.record_audit(&entry).await?;
    }
    Ok(())
}

/// `{prefix}_{unix millis}_{random}`, e.g. `flw_1700000000000_3f9a1c`.
pub fn generate_reference(kind: ProviderKind) -> Result<Reference, PipelineError> {
    let suffix = Uuid::new_v4().simple().to_string();
    Reference::new(format!(
        "{}_{}_{}",
        kind.reference_prefix(),
        Utc::now().timestamp_millis(),
        &suffix[..6]
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_carry_provider_prefix() {
        let r = generate_reference(ProviderKind::Flutterwave).unwrap();
        let parts: Vec<&str> = r.as_str().split('_').collect();
        assert_eq!(parts[0], "flw");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 6);
        assert_ne!(r, generate_reference(ProviderKind::Flutterwave).unwrap());
    }

    #[test]
    fn each_provider_has_distinct_prefix() {
        let prefixes: Vec<&str> = ProviderKind::ALL.iter().map(|k| k.reference_prefix()).collect();
        assert_eq!(prefixes, vec!["ps", "flw", "mnfy", "pyz"]);
    }
}
