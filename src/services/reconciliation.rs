use {
    super::{
        calendar::CalendarSync,
        notifications::{EmailMessage, EmailQueue, TicketLine},
        ticket_issuance::{TicketHolder, TicketIssuer},
    },
    crate::domain::{
        audit::NewAuditEntry,
        error::PipelineError,
        event::{Event, validate_quantity},
        id::{EventId, UserId},
        payment::{PaymentMetadata, VerifiedPayment},
        store::Store,
        ticket::{IssuanceBatch, Ticket},
        transaction::{
            ClaimOutcome, NewTransaction, NewTransactionParams, Settlement, Transaction,
            TransactionStatus,
        },
        user::UserProfile,
    },
    chrono::{Duration, Utc},
    std::sync::Arc,
    uuid::Uuid,
};

/// How long a reconciliation pass may hold a transaction in `processing`
/// before another pass may take it over.
pub const DEFAULT_CLAIM_LEASE_SECS: i64 = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    MissingMetadata,
    TransactionClosed(TransactionStatus),
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingMetadata => "missing_metadata",
            Self::TransactionClosed(_) => "transaction_closed",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    Issued {
        transaction_id: Uuid,
        tickets: Vec<Ticket>,
        /// Buyer has no linked calendar and was told how to link one.
        calendar_guidance: bool,
    },
    AlreadyProcessed {
        transaction_id: Uuid,
    },
    /// Another pass holds the claim; it will finish the work.
    InFlight,
    Rejected(RejectReason),
}

impl ReconcileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Issued { .. } => "issued",
            Self::AlreadyProcessed { .. } => "already_processed",
            Self::InFlight => "in_flight",
            Self::Rejected(reason) => reason.as_str(),
        }
    }
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn Store>,
    issuer: TicketIssuer,
    emails: EmailQueue,
    calendar: Arc<dyn CalendarSync>,
    lease: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        issuer: TicketIssuer,
        emails: EmailQueue,
        calendar: Arc<dyn CalendarSync>,
    ) -> Self {
        Self {
            store,
            issuer,
            emails,
            calendar,
            lease: Duration::seconds(DEFAULT_CLAIM_LEASE_SECS),
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Turn a gateway-confirmed payment into tickets, exactly once per
    /// (provider, reference).
    #[tracing::instrument(
        name = "reconcile",
        skip_all,
        fields(provider = %payment.provider, reference = %payment.reference)
    )]
    pub async fn handle_successful_payment(
        &self,
        payment: &VerifiedPayment,
    ) -> Result<ReconcileOutcome, PipelineError> {
        let metadata = &payment.metadata;
        let (Some(event_id), Some(user_id)) = (&metadata.event_id, &metadata.user_id) else {
            tracing::warn!("payment metadata lacks eventId or userId");
            return Ok(ReconcileOutcome::Rejected(RejectReason::MissingMetadata));
        };

        let quantity = purchase_quantity(metadata);
        validate_quantity(quantity)?;

        let inserted = self
            .store
            .insert_transaction(&NewTransaction::new(NewTransactionParams {
                provider: payment.provider,
                reference: payment.reference.clone(),
                trans_id: payment.provider_transaction_id.clone(),
                trans_reference: payment.provider_reference.clone(),
                money: payment.money,
                status: TransactionStatus::Pending,
                user_id: user_id.clone(),
                event_id: event_id.clone(),
                ticket_type_id: metadata.ticket_type_id.clone(),
                quantity,
                metadata: metadata.clone(),
                raw: payment.raw.clone(),
            }))
            .await?;
        if inserted {
            tracing::info!("transaction was not tracked, recorded at reconciliation");
        }

        let transaction = match self
            .store
            .claim_transaction(payment.provider, &payment.reference, self.lease)
            .await?
        {
            ClaimOutcome::Claimed(t) => t,
            ClaimOutcome::AlreadySuccessful(t) => {
                tracing::info!(transaction_id = %t.id, "already processed");
                return Ok(ReconcileOutcome::AlreadyProcessed { transaction_id: t.id });
            }
            ClaimOutcome::InFlight => {
                tracing::info!("claimed by another reconciliation pass");
                return Ok(ReconcileOutcome::InFlight);
            }
            ClaimOutcome::Closed(status) => {
                tracing::warn!(%status, "payment confirmed for a closed transaction");
                return Ok(ReconcileOutcome::Rejected(RejectReason::TransactionClosed(status)));
            }
            ClaimOutcome::Missing => {
                return Err(PipelineError::NotFound(format!(
                    "transaction {}/{}",
                    payment.provider, payment.reference
                )));
            }
        };

        if payment.money != transaction.money {
            self.flag_amount_mismatch(&transaction, payment).await;
        }

        let (event, tickets) = match self.issue(&transaction, payment, event_id, user_id, quantity).await {
            Ok(issued) => issued,
            Err(e) => {
                self.abandon_claim(&transaction, &e).await;
                return Err(e);
            }
        };
        tracing::info!(transaction_id = %transaction.id, count = tickets.len(), "tickets issued");

        let buyer = match self.store.get_user(user_id).await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(error = %e, "buyer profile lookup failed");
                None
            }
        };
        let calendar_guidance = buyer.as_ref().is_some_and(|u| !u.has_linked_calendar());

        self.queue_emails(&event, metadata, buyer.as_ref(), &tickets, calendar_guidance);
        if let Some(buyer) = buyer.as_ref().filter(|u| u.has_linked_calendar()) {
            if let Err(e) = self.calendar.add_event(buyer, &event).await {
                tracing::warn!(error = %e, "calendar sync failed");
            }
        }

        Ok(ReconcileOutcome::Issued {
            transaction_id: transaction.id,
            tickets,
            calendar_guidance,
        })
    }

    async fn issue(
        &self,
        transaction: &Transaction,
        payment: &VerifiedPayment,
        event_id: &EventId,
        user_id: &UserId,
        quantity: u32,
    ) -> Result<(Event, Vec<Ticket>), PipelineError> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("event {event_id}")))?;

        let holders = ticket_holders(&payment.metadata, user_id, quantity);
        let tickets = self.issuer.prepare_tickets(
            &event,
            payment.metadata.ticket_type_id.as_ref(),
            &holders,
            false,
            false,
            Utc::now(),
        )?;

        let issued = self
            .store
            .commit_issuance(IssuanceBatch {
                tickets,
                bypass_capacity: false,
                settlement: Some(Settlement {
                    transaction_id: transaction.id,
                    trans_id: payment.provider_transaction_id.clone(),
                    trans_reference: payment.provider_reference.clone(),
                    raw: payment.raw.clone(),
                }),
            })
            .await?;
        Ok((event, issued))
    }

    /// Put the transaction back to `pending` so redelivery or the poller can
    /// retry, and leave a record of why.
    async fn abandon_claim(&self, transaction: &Transaction, error: &PipelineError) {
        tracing::error!(transaction_id = %transaction.id, error = %error, "ticket issuance failed, releasing claim");
        match transaction.claimed_at {
            Some(claimed_at) => {
                if let Err(e) = self.store.release_claim(transaction.id, claimed_at).await {
                    tracing::error!(transaction_id = %transaction.id, error = %e, "failed to release claim");
                }
            }
            None => tracing::warn!(transaction_id = %transaction.id, "claimed row carries no claim time"),
        }

        let entry = NewAuditEntry {
            id: Uuid::now_v7(),
            entity_type: "transaction".to_string(),
            entity_id: Some(transaction.id),
            reference: Some(transaction.reference.as_str().to_string()),
            action: "issuance_failed".to_string(),
            actor: format!("reconcile:{}", transaction.provider),
            detail: serde_json::json!({ "error": error.to_string() }),
        };
        if let Err(e) = self.store.record_audit(&entry).await {
            tracing::error!(error = %e, "failed to write audit entry");
        }
    }

    /// The gateway settled a different amount than the ledger recorded.
    /// Issuance goes ahead; the entry is left for an operator.
    async fn flag_amount_mismatch(&self, transaction: &Transaction, payment: &VerifiedPayment) {
        tracing::warn!(
            transaction_id = %transaction.id,
            expected = transaction.money.amount().minor(),
            received = payment.money.amount().minor(),
            "verified amount differs from ledger"
        );
        let mut entry = transaction.audit_entry(
            &format!("reconcile:{}", transaction.provider),
            "amount_mismatch",
        );
        entry.detail = serde_json::json!({
            "expected": {
                "amount": transaction.money.amount().minor(),
                "currency": transaction.money.currency().as_str(),
            },
            "received": {
                "amount": payment.money.amount().minor(),
                "currency": payment.money.currency().as_str(),
            },
        });
        if let Err(e) = self.store.record_audit(&entry).await {
            tracing::error!(error = %e, "failed to write audit entry");
        }
    }

    fn queue_emails(
        &self,
        event: &Event,
        metadata: &PaymentMetadata,
        buyer: Option<&UserProfile>,
        tickets: &[Ticket],
        calendar_guidance: bool,
    ) {
        if !metadata.assignees.is_empty() {
            for ticket in tickets {
                let Some(assignee) = &ticket.assigned_to else {
                    continue;
                };
                let name = assignee.name.as_deref().unwrap_or(&assignee.email);
                self.emails.enqueue(EmailMessage::ticket_confirmation(
                    &assignee.email,
                    name,
                    &event.title,
                    &[TicketLine::from(ticket)],
                    false,
                ));
            }
            return;
        }

        let to = buyer.map(|b| b.email.clone()).or_else(|| {
            metadata
                .extra
                .get("email")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        });
        let Some(to) = to else {
            tracing::warn!("no buyer email on record, skipping confirmation");
            return;
        };
        let name = buyer.map(UserProfile::display_name).unwrap_or(to.as_str());
        let lines: Vec<TicketLine> = tickets.iter().map(TicketLine::from).collect();
        self.emails.enqueue(EmailMessage::ticket_confirmation(
            &to,
            name,
            &event.title,
            &lines,
            calendar_guidance,
        ));
    }
}

/// Number of tickets a purchase yields: one per assignee when assignees are
/// listed, otherwise the purchased quantity.
pub fn purchase_quantity(metadata: &PaymentMetadata) -> u32 {
    if metadata.assignees.is_empty() {
        metadata.quantity()
    } else {
        u32::try_from(metadata.assignees.len()).unwrap_or(u32::MAX)
    }
}

fn ticket_holders(metadata: &PaymentMetadata, buyer: &UserId, quantity: u32) -> Vec<TicketHolder> {
    if metadata.assignees.is_empty() {
        return (0..quantity)
            .map(|_| TicketHolder {
                user_id: buyer.clone(),
                assigned_to: None,
            })
            .collect();
    }
    metadata
        .assignees
        .iter()
        .map(|a| TicketHolder {
            user_id: a.user_id.clone().unwrap_or_else(|| buyer.clone()),
            assigned_to: Some(a.clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use {super::*, crate::domain::payment::Assignee};

    fn assignee(email: &str, user: Option<&str>) -> Assignee {
        Assignee {
            name: None,
            email: email.to_string(),
            user_id: user.map(|u| UserId::new(u).unwrap()),
        }
    }

    #[test]
    fn quantity_follows_assignees() {
        let metadata = PaymentMetadata {
            quantity: Some(5),
            assignees: vec![assignee("a@x.io", None), assignee("b@x.io", None)],
            ..Default::default()
        };
        assert_eq!(purchase_quantity(&metadata), 2);
        assert_eq!(purchase_quantity(&PaymentMetadata::default()), 1);
    }

    #[test]
    fn holders_use_assignee_account_when_known() {
        let buyer = UserId::new("U1").unwrap();
        let metadata = PaymentMetadata {
            assignees: vec![assignee("a@x.io", Some("U2")), assignee("b@x.io", None)],
            ..Default::default()
        };
        let holders = ticket_holders(&metadata, &buyer, 2);
        assert_eq!(holders[0].user_id.as_str(), "U2");
        assert_eq!(holders[1].user_id, buyer);
        assert!(holders.iter().all(|h| h.assigned_to.is_some()));
    }

    #[test]
    fn buyer_gets_one_holder_per_unit() {
        let buyer = UserId::new("U1").unwrap();
        let holders = ticket_holders(&PaymentMetadata::default(), &buyer, 3);
        assert_eq!(holders.len(), 3);
        assert!(holders.iter().all(|h| h.user_id == buyer && h.assigned_to.is_none()));
    }
}
