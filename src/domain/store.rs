use {
    super::audit::NewAuditEntry,
    super::error::PipelineError,
    super::event::Event,
    super::id::{EventId, Reference, UserId},
    super::provider::{BoxFuture, ProviderKind},
    super::ticket::{IssuanceBatch, Ticket},
    super::transaction::{ClaimOutcome, NewTransaction, Transaction},
    super::user::UserProfile,
    chrono::{DateTime, Duration, Utc},
    uuid::Uuid,
};

/// Persistence seam for the reconciliation workflow. Implementations must make
/// `claim_transaction`, `commit_issuance` and `cancel_ticket` atomic with
/// respect to concurrent callers.
pub trait Store: Send + Sync {
    /// Insert a transaction. Returns `false` when (provider, reference) already exists.
    fn insert_transaction<'a>(
        &'a self,
        transaction: &'a NewTransaction,
    ) -> BoxFuture<'a, Result<bool, PipelineError>>;

    fn find_transaction<'a>(
        &'a self,
        provider: ProviderKind,
        reference: &'a Reference,
    ) -> BoxFuture<'a, Result<Option<Transaction>, PipelineError>>;

    /// Conditionally move `created|pending` (or a `processing` row whose lease
    /// is older than `lease`) to `processing`.
    fn claim_transaction<'a>(
        &'a self,
        provider: ProviderKind,
        reference: &'a Reference,
        lease: Duration,
    ) -> BoxFuture<'a, Result<ClaimOutcome, PipelineError>>;

    /// Return a claimed transaction to `pending` so a later pass can retry.
    /// Only the claim stamped at `claimed_at` is released; a newer claim by
    /// another pass is left alone.
    fn release_claim(
        &self,
        transaction_id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<(), PipelineError>>;

    /// `created|pending → failed`. Returns `false` if the row was in any other state.
    fn mark_transaction_failed(
        &self,
        transaction_id: Uuid,
        raw: serde_json::Value,
    ) -> BoxFuture<'_, Result<bool, PipelineError>>;

    /// Transactions created at or after `since` that still need an answer,
    /// oldest first: `pending` rows, plus `processing` rows whose claim was
    /// taken at or before `stale_claim_before` and so has lapsed.
    fn list_pending_transactions(
        &self,
        provider: ProviderKind,
        since: DateTime<Utc>,
        stale_claim_before: DateTime<Utc>,
        limit: i64,
    ) -> BoxFuture<'_, Result<Vec<Transaction>, PipelineError>>;

    fn get_event<'a>(&'a self, id: &'a EventId)
    -> BoxFuture<'a, Result<Option<Event>, PipelineError>>;

    fn get_user<'a>(
        &'a self,
        id: &'a UserId,
    ) -> BoxFuture<'a, Result<Option<UserProfile>, PipelineError>>;

    /// Apply an issuance batch all-or-nothing: increment ticket sales with a
    /// capacity recheck, insert tickets and settle the claimed transaction.
    fn commit_issuance(
        &self,
        batch: IssuanceBatch,
    ) -> BoxFuture<'_, Result<Vec<Ticket>, PipelineError>>;

    fn find_ticket(&self, id: Uuid) -> BoxFuture<'_, Result<Option<Ticket>, PipelineError>>;

    /// `active → used`. Returns `false` if the ticket was not active.
    fn mark_ticket_used(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<bool, PipelineError>>;

    /// `active → cancelled` and decrement ticket sales, atomically. `None`
    /// when the ticket was not active.
    fn cancel_ticket(&self, id: Uuid) -> BoxFuture<'_, Result<Option<Ticket>, PipelineError>>;

    fn record_audit<'a>(
        &'a self,
        entry: &'a NewAuditEntry,
    ) -> BoxFuture<'a, Result<(), PipelineError>>;
}
