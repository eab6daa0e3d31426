use {
    crate::domain::{
        audit::NewAuditEntry,
        error::PipelineError,
        event::{Event, SalesDelta},
        id::{EventId, Reference, UserId},
        provider::{BoxFuture, ProviderKind},
        store::Store,
        ticket::{IssuanceBatch, Ticket, TicketStatus},
        transaction::{ClaimOutcome, NewTransaction, Transaction, TransactionStatus},
        user::UserProfile,
    },
    chrono::{DateTime, Duration, Utc},
    std::{
        collections::HashMap,
        future::ready,
        sync::{Mutex, MutexGuard, PoisonError},
    },
    uuid::Uuid,
};

#[derive(Default)]
struct State {
    transactions: Vec<Transaction>,
    events: HashMap<EventId, Event>,
    users: HashMap<UserId, UserProfile>,
    tickets: Vec<Ticket>,
    audit: Vec<NewAuditEntry>,
}

/// Process-local store. Every operation runs under one lock, which gives the
/// same atomicity the Postgres store gets from row-level conditional updates.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_event(&self, event: Event) {
        self.state().events.insert(event.id.clone(), event);
    }

    pub fn insert_user(&self, user: UserProfile) {
        self.state().users.insert(user.id.clone(), user);
    }

    pub fn event(&self, id: &EventId) -> Option<Event> {
        self.state().events.get(id).cloned()
    }

    pub fn tickets(&self) -> Vec<Ticket> {
        self.state().tickets.clone()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.state().transactions.clone()
    }

    pub fn audit_entries(&self) -> Vec<NewAuditEntry> {
        self.state().audit.clone()
    }

    /// Move a transaction's `created_at` into the past.
    pub fn backdate_transaction(&self, provider: ProviderKind, reference: &Reference, at: DateTime<Utc>) {
        let mut state = self.state();
        if let Some(t) = state
            .transactions
            .iter_mut()
            .find(|t| t.provider == provider && &t.reference == reference)
        {
            t.created_at = at;
        }
    }

    fn claim(&self, provider: ProviderKind, reference: &Reference, lease: Duration) -> ClaimOutcome {
        let now = Utc::now();
        let mut state = self.state();
        let Some(t) = state
            .transactions
            .iter_mut()
            .find(|t| t.provider == provider && &t.reference == reference)
        else {
            return ClaimOutcome::Missing;
        };

        match t.status {
            TransactionStatus::Successful => ClaimOutcome::AlreadySuccessful(t.clone()),
            status if status.is_terminal() => ClaimOutcome::Closed(status),
            TransactionStatus::Processing
                if t.claimed_at.is_some_and(|at| at > now - lease) =>
            {
                ClaimOutcome::InFlight
            }
            status => {
                if t.advance(TransactionStatus::Processing, now) {
                    ClaimOutcome::Claimed(t.clone())
                } else {
                    ClaimOutcome::Closed(status)
                }
            }
        }
    }

    fn commit(&self, batch: IssuanceBatch) -> Result<Vec<Ticket>, PipelineError> {
        let now = Utc::now();
        let mut state = self.state();

        // Stage counter changes on a copy so a failure leaves nothing applied.
        let mut events = state.events.clone();
        for delta in batch.sales() {
            increment_ticket_sales(&mut events, &delta, batch.bypass_capacity)?;
        }

        let settle_index = match &batch.settlement {
            Some(s) => Some(
                state
                    .transactions
                    .iter()
                    .position(|t| {
                        t.id == s.transaction_id && t.status == TransactionStatus::Processing
                    })
                    .ok_or_else(|| {
                        PipelineError::Conflict(format!(
                            "transaction {} is no longer claimed",
                            s.transaction_id
                        ))
                    })?,
            ),
            None => None,
        };

        state.events = events;
        let transaction_id = batch.settlement.as_ref().map(|s| s.transaction_id);
        if let (Some(index), Some(settlement)) = (settle_index, batch.settlement) {
            let t = &mut state.transactions[index];
            t.advance(TransactionStatus::Successful, now);
            t.trans_id = settlement.trans_id.or(t.trans_id.take());
            t.trans_reference = settlement.trans_reference.or(t.trans_reference.take());
            t.raw = settlement.raw;
        }

        let tickets: Vec<Ticket> = batch
            .tickets
            .into_iter()
            .map(|t| t.into_ticket(transaction_id, now))
            .collect();
        state.tickets.extend(tickets.iter().cloned());
        Ok(tickets)
    }

    fn cancel(&self, id: Uuid) -> Result<Option<Ticket>, PipelineError> {
        let mut state = self.state();
        let Some(index) = state
            .tickets
            .iter()
            .position(|t| t.id == id && t.status == TicketStatus::Active)
        else {
            return Ok(None);
        };
        let delta = state.tickets[index].sales_delta();
        decrement_ticket_sales(&mut state.events, &delta);
        let ticket = &mut state.tickets[index];
        ticket.status = TicketStatus::Cancelled;
        Ok(Some(ticket.clone()))
    }
}

fn increment_ticket_sales(
    events: &mut HashMap<EventId, Event>,
    delta: &SalesDelta,
    bypass_capacity: bool,
) -> Result<(), PipelineError> {
    let event = events
        .get_mut(&delta.event_id)
        .ok_or_else(|| PipelineError::NotFound(format!("event {}", delta.event_id)))?;

    if let Some(type_id) = &delta.ticket_type_id {
        let ticket_type = event
            .ticket_types
            .iter_mut()
            .find(|t| &t.id == type_id)
            .ok_or_else(|| PipelineError::NotFound(format!("ticket type {type_id}")))?;
        if !bypass_capacity && !ticket_type.has_capacity_for(delta.quantity) {
            return Err(PipelineError::CapacityExceeded {
                ticket_type: ticket_type.name.clone(),
                requested: delta.quantity,
                remaining: ticket_type.remaining().unwrap_or_default().max(0),
            });
        }
        ticket_type.sold_count += delta.quantity;
    }
    event.attendee_count += delta.quantity;
    Ok(())
}

fn decrement_ticket_sales(events: &mut HashMap<EventId, Event>, delta: &SalesDelta) {
    let Some(event) = events.get_mut(&delta.event_id) else {
        return;
    };
    if let Some(type_id) = &delta.ticket_type_id {
        if let Some(ticket_type) = event.ticket_types.iter_mut().find(|t| &t.id == type_id) {
            ticket_type.sold_count = ticket_type.sold_count.saturating_sub(delta.quantity);
        }
    }
    event.attendee_count = event.attendee_count.saturating_sub(delta.quantity);
}

impl Store for MemoryStore {
    fn insert_transaction<'a>(
        &'a self,
        transaction: &'a NewTransaction,
    ) -> BoxFuture<'a, Result<bool, PipelineError>> {
        let mut state = self.state();
        let exists = state.transactions.iter().any(|t| {
            t.provider == transaction.provider() && &t.reference == transaction.reference()
        });
        if !exists {
            state
                .transactions
                .push(transaction.clone().into_transaction(Utc::now()));
        }
        Box::pin(ready(Ok(!exists)))
    }

    fn find_transaction<'a>(
        &'a self,
        provider: ProviderKind,
        reference: &'a Reference,
    ) -> BoxFuture<'a, Result<Option<Transaction>, PipelineError>> {
        let found = self
            .state()
            .transactions
            .iter()
            .find(|t| t.provider == provider && &t.reference == reference)
            .cloned();
        Box::pin(ready(Ok(found)))
    }

    fn claim_transaction<'a>(
        &'a self,
        provider: ProviderKind,
        reference: &'a Reference,
        lease: Duration,
    ) -> BoxFuture<'a, Result<ClaimOutcome, PipelineError>> {
        Box::pin(ready(Ok(self.claim(provider, reference, lease))))
    }

    fn release_claim(
        &self,
        transaction_id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<(), PipelineError>> {
        let mut state = self.state();
        if let Some(t) = state.transactions.iter_mut().find(|t| {
            t.id == transaction_id
                && t.status == TransactionStatus::Processing
                && t.claimed_at == Some(claimed_at)
        }) {
            t.advance(TransactionStatus::Pending, Utc::now());
        }
        Box::pin(ready(Ok(())))
    }

    fn mark_transaction_failed(
        &self,
        transaction_id: Uuid,
        raw: serde_json::Value,
    ) -> BoxFuture<'_, Result<bool, PipelineError>> {
        let mut state = self.state();
        let updated = match state.transactions.iter_mut().find(|t| t.id == transaction_id) {
            Some(t) => {
                if t.advance(TransactionStatus::Failed, Utc::now()) {
                    t.raw = raw;
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        Box::pin(ready(Ok(updated)))
    }

    fn list_pending_transactions(
        &self,
        provider: ProviderKind,
        since: DateTime<Utc>,
        stale_claim_before: DateTime<Utc>,
        limit: i64,
    ) -> BoxFuture<'_, Result<Vec<Transaction>, PipelineError>> {
        let mut pending: Vec<Transaction> = self
            .state()
            .transactions
            .iter()
            .filter(|t| {
                let awaiting = match t.status {
                    TransactionStatus::Pending => true,
                    TransactionStatus::Processing => {
                        t.claimed_at.is_some_and(|at| at <= stale_claim_before)
                    }
                    _ => false,
                };
                t.provider == provider && awaiting && t.created_at >= since
            })
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.created_at);
        pending.truncate(usize::try_from(limit).unwrap_or(0));
        Box::pin(ready(Ok(pending)))
    }

    fn get_event<'a>(
        &'a self,
        id: &'a EventId,
    ) -> BoxFuture<'a, Result<Option<Event>, PipelineError>> {
        Box::pin(ready(Ok(self.event(id))))
    }

    fn get_user<'a>(
        &'a self,
        id: &'a UserId,
    ) -> BoxFuture<'a, Result<Option<UserProfile>, PipelineError>> {
        let user = self.state().users.get(id).cloned();
        Box::pin(ready(Ok(user)))
    }

    fn commit_issuance(
        &self,
        batch: IssuanceBatch,
    ) -> BoxFuture<'_, Result<Vec<Ticket>, PipelineError>> {
        Box::pin(ready(self.commit(batch)))
    }

    fn find_ticket(&self, id: Uuid) -> BoxFuture<'_, Result<Option<Ticket>, PipelineError>> {
        let ticket = self.state().tickets.iter().find(|t| t.id == id).cloned();
        Box::pin(ready(Ok(ticket)))
    }

    fn mark_ticket_used(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<bool, PipelineError>> {
        let mut state = self.state();
        let updated = match state
            .tickets
            .iter_mut()
            .find(|t| t.id == id && t.status == TicketStatus::Active)
        {
            Some(t) => {
                t.status = TicketStatus::Used;
                t.used_at = Some(at);
                true
            }
            None => false,
        };
        Box::pin(ready(Ok(updated)))
    }

    fn cancel_ticket(&self, id: Uuid) -> BoxFuture<'_, Result<Option<Ticket>, PipelineError>> {
        Box::pin(ready(self.cancel(id)))
    }

    fn record_audit<'a>(
        &'a self,
        entry: &'a NewAuditEntry,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        self.state().audit.push(entry.clone());
        Box::pin(ready(Ok(())))
    }
}
