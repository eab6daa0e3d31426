pub mod audit_repo;
pub mod event_repo;
pub mod ticket_repo;
pub mod transaction_repo;
pub mod user_repo;

use {
    crate::domain::{
        audit::NewAuditEntry,
        error::PipelineError,
        event::Event,
        id::{EventId, Reference, UserId},
        provider::{BoxFuture, ProviderKind},
        store::Store,
        ticket::{IssuanceBatch, Ticket},
        transaction::{ClaimOutcome, NewTransaction, Transaction},
        user::UserProfile,
    },
    chrono::{DateTime, Duration, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn commit(&self, batch: IssuanceBatch) -> Result<Vec<Ticket>, PipelineError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET LOCAL lock_timeout = '5s'")
            .execute(&mut *tx)
            .await?;

        for delta in batch.sales() {
            event_repo::increment_ticket_sales(&mut tx, &delta, batch.bypass_capacity).await?;
        }

        let transaction_id = batch.settlement.as_ref().map(|s| s.transaction_id);
        let mut tickets = Vec::with_capacity(batch.tickets.len());
        for ticket in &batch.tickets {
            tickets.push(ticket_repo::insert_ticket(&mut tx, ticket, transaction_id).await?);
        }

        if let Some(settlement) = &batch.settlement {
            transaction_repo::settle_transaction(&mut tx, settlement).await?;
        }

        tx.commit().await?;
        Ok(tickets)
    }

    async fn cancel(&self, id: Uuid) -> Result<Option<Ticket>, PipelineError> {
        let mut tx = self.pool.begin().await?;
        let Some(ticket) = ticket_repo::cancel_ticket(&mut tx, id).await? else {
            tx.rollback().await?;
            return Ok(None);
        };
        event_repo::decrement_ticket_sales(&mut tx, &ticket.sales_delta()).await?;
        tx.commit().await?;
        Ok(Some(ticket))
    }
}

impl Store for PgStore {
    fn insert_transaction<'a>(
        &'a self,
        transaction: &'a NewTransaction,
    ) -> BoxFuture<'a, Result<bool, PipelineError>> {
        Box::pin(transaction_repo::insert_transaction(&self.pool, transaction))
    }

    fn find_transaction<'a>(
        &'a self,
        provider: ProviderKind,
        reference: &'a Reference,
    ) -> BoxFuture<'a, Result<Option<Transaction>, PipelineError>> {
        Box::pin(transaction_repo::find_transaction(&self.pool, provider, reference))
    }

    fn claim_transaction<'a>(
        &'a self,
        provider: ProviderKind,
        reference: &'a Reference,
        lease: Duration,
    ) -> BoxFuture<'a, Result<ClaimOutcome, PipelineError>> {
        Box::pin(transaction_repo::claim_transaction(
            &self.pool, provider, reference, lease,
        ))
    }

    fn release_claim(
        &self,
        transaction_id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<(), PipelineError>> {
        Box::pin(transaction_repo::release_claim(&self.pool, transaction_id, claimed_at))
    }

    fn mark_transaction_failed(
        &self,
        transaction_id: Uuid,
        raw: serde_json::Value,
    ) -> BoxFuture<'_, Result<bool, PipelineError>> {
        Box::pin(async move { transaction_repo::mark_failed(&self.pool, transaction_id, &raw).await })
    }

    fn list_pending_transactions(
        &self,
        provider: ProviderKind,
        since: DateTime<Utc>,
        stale_claim_before: DateTime<Utc>,
        limit: i64,
    ) -> BoxFuture<'_, Result<Vec<Transaction>, PipelineError>> {
        Box::pin(transaction_repo::list_pending(
            &self.pool,
            provider,
            since,
            stale_claim_before,
            limit,
        ))
    }

    fn get_event<'a>(
        &'a self,
        id: &'a EventId,
    ) -> BoxFuture<'a, Result<Option<Event>, PipelineError>> {
        Box::pin(event_repo::get_event(&self.pool, id))
    }

    fn get_user<'a>(
        &'a self,
        id: &'a UserId,
    ) -> BoxFuture<'a, Result<Option<UserProfile>, PipelineError>> {
        Box::pin(user_repo::get_user(&self.pool, id))
    }

    fn commit_issuance(
        &self,
        batch: IssuanceBatch,
    ) -> BoxFuture<'_, Result<Vec<Ticket>, PipelineError>> {
        Box::pin(self.commit(batch))
    }

    fn find_ticket(&self, id: Uuid) -> BoxFuture<'_, Result<Option<Ticket>, PipelineError>> {
        Box::pin(ticket_repo::find_ticket(&self.pool, id))
    }

    fn mark_ticket_used(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<bool, PipelineError>> {
        Box::pin(ticket_repo::mark_used(&self.pool, id, at))
    }

    fn cancel_ticket(&self, id: Uuid) -> BoxFuture<'_, Result<Option<Ticket>, PipelineError>> {
        Box::pin(self.cancel(id))
    }

    fn record_audit<'a>(
        &'a self,
        entry: &'a NewAuditEntry,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(audit_repo::insert_audit_entry(&self.pool, entry))
    }
}
