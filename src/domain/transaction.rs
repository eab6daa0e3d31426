use {
    super::audit::NewAuditEntry,
    super::error::PipelineError,
    super::id::{EventId, Reference, TicketTypeId, UserId},
    super::money::Money,
    super::payment::PaymentMetadata,
    super::provider::ProviderKind,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Created,
    Pending,
    /// Claimed by a reconciliation pass; reverts to `Pending` if issuance fails.
    Processing,
    Successful,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Successful | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: &TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Created, Pending)
                | (Created | Pending | Processing, Processing)
                | (Processing, Pending)
                | (Processing, Successful)
                | (Created | Pending, Failed)
                | (Created | Pending, Cancelled)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TransactionStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "created" => Ok(Self::Created),
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "successful" => Ok(Self::Successful),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(PipelineError::Validation(format!(
                "unknown transaction status: {other}"
            ))),
        }
    }
}

/// Persisted payment attempt, keyed by (provider, reference).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub provider: ProviderKind,
    pub reference: Reference,
    pub trans_id: Option<String>,
    pub trans_reference: Option<String>,
    pub money: Money,
    pub status: TransactionStatus,
    pub user_id: UserId,
    pub event_id: EventId,
    pub ticket_type_id: Option<TicketTypeId>,
    pub quantity: u32,
    pub metadata: PaymentMetadata,
    pub raw: serde_json::Value,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Metadata as recorded at init time, with the row's own columns filled in.
    pub fn effective_metadata(&self) -> PaymentMetadata {
        let mut metadata = self.metadata.clone();
        metadata.event_id.get_or_insert_with(|| self.event_id.clone());
        metadata.user_id.get_or_insert_with(|| self.user_id.clone());
        if metadata.ticket_type_id.is_none() {
            metadata.ticket_type_id = self.ticket_type_id.clone();
        }
        if metadata.quantity.is_none() {
            metadata.quantity = Some(self.quantity);
        }
        metadata
    }

    /// Move to `next` if the lifecycle allows it. Entering `processing`
    /// stamps a fresh claim; any other move drops it.
    pub fn advance(&mut self, next: TransactionStatus, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(&next) {
            return false;
        }
        self.status = next;
        self.claimed_at = (next == TransactionStatus::Processing).then_some(now);
        self.updated_at = now;
        true
    }

    pub fn audit_entry(&self, actor: &str, action: &str) -> NewAuditEntry {
        NewAuditEntry {
            id: Uuid::now_v7(),
            entity_type: "transaction".to_string(),
            entity_id: Some(self.id),
            reference: Some(self.reference.as_str().to_string()),
            action: action.to_string(),
            actor: actor.to_string(),
            detail: serde_json::json!({
                "provider": self.provider.as_str(),
                "amount": self.money.amount().minor(),
                "currency": self.money.currency().as_str(),
                "status": self.status.as_str(),
            }),
        }
    }
}

pub struct NewTransactionParams {
    pub provider: ProviderKind,
    pub reference: Reference,
    pub trans_id: Option<String>,
    pub trans_reference: Option<String>,
    pub money: Money,
    pub status: TransactionStatus,
    pub user_id: UserId,
    pub event_id: EventId,
    pub ticket_type_id: Option<TicketTypeId>,
    pub quantity: u32,
    pub metadata: PaymentMetadata,
    pub raw: serde_json::Value,
}

/// Row to insert; the id is generated up front with `Uuid::now_v7()`.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    id: Uuid,
    provider: ProviderKind,
    reference: Reference,
    trans_id: Option<String>,
    trans_reference: Option<String>,
    money: Money,
    status: TransactionStatus,
    user_id: UserId,
    event_id: EventId,
    ticket_type_id: Option<TicketTypeId>,
    quantity: u32,
    metadata: PaymentMetadata,
    raw: serde_json::Value,
}

impl NewTransaction {
    pub fn new(p: NewTransactionParams) -> Self {
        Self {
            id: Uuid::now_v7(),
            provider: p.provider,
            reference: p.reference,
            trans_id: p.trans_id,
            trans_reference: p.trans_reference,
            money: p.money,
            status: p.status,
            user_id: p.user_id,
            event_id: p.event_id,
            ticket_type_id: p.ticket_type_id,
            quantity: p.quantity,
            metadata: p.metadata,
            raw: p.raw,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    pub fn trans_id(&self) -> Option<&str> {
        self.trans_id.as_deref()
    }

    pub fn trans_reference(&self) -> Option<&str> {
        self.trans_reference.as_deref()
    }

    pub fn money(&self) -> &Money {
        &self.money
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    pub fn ticket_type_id(&self) -> Option<&TicketTypeId> {
        self.ticket_type_id.as_ref()
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn metadata(&self) -> &PaymentMetadata {
        &self.metadata
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }

    /// Materialize the row as the store would return it right after insert.
    pub fn into_transaction(self, now: DateTime<Utc>) -> Transaction {
        Transaction {
            id: self.id,
            provider: self.provider,
            reference: self.reference,
            trans_id: self.trans_id,
            trans_reference: self.trans_reference,
            money: self.money,
            status: self.status,
            user_id: self.user_id,
            event_id: self.event_id,
            ticket_type_id: self.ticket_type_id,
            quantity: self.quantity,
            metadata: self.metadata,
            raw: self.raw,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Result of the atomic reconciliation claim on a transaction row.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// This caller now holds the processing lease.
    Claimed(Transaction),
    /// Tickets were already issued for this reference.
    AlreadySuccessful(Transaction),
    /// Another reconciliation pass holds an unexpired lease.
    InFlight,
    /// Transaction reached `failed` or `cancelled`.
    Closed(TransactionStatus),
    /// No row exists for (provider, reference).
    Missing,
}

/// Provider-side identifiers and payload recorded when a transaction settles.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub transaction_id: Uuid,
    pub trans_id: Option<String>,
    pub trans_reference: Option<String>,
    pub raw: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::domain::money::{Currency, MoneyAmount},
    };

    fn transaction(status: TransactionStatus) -> Transaction {
        NewTransaction::new(NewTransactionParams {
            provider: ProviderKind::Paystack,
            reference: Reference::new("ps_1").unwrap(),
            trans_id: None,
            trans_reference: None,
            money: Money::new(MoneyAmount::new(250_000).unwrap(), Currency::Ngn),
            status,
            user_id: UserId::new("U1").unwrap(),
            event_id: EventId::new("E1").unwrap(),
            ticket_type_id: None,
            quantity: 1,
            metadata: PaymentMetadata::default(),
            raw: serde_json::Value::Null,
        })
        .into_transaction(Utc::now())
    }

    #[test]
    fn claim_then_settle() {
        let now = Utc::now();
        let mut t = transaction(TransactionStatus::Pending);
        assert!(t.advance(TransactionStatus::Processing, now));
        assert_eq!(t.claimed_at, Some(now));
        assert!(t.advance(TransactionStatus::Successful, now));
        assert_eq!(t.status, TransactionStatus::Successful);
        assert!(t.claimed_at.is_none());
    }

    #[test]
    fn settled_transaction_cannot_move() {
        let now = Utc::now();
        let mut t = transaction(TransactionStatus::Successful);
        for next in [
            TransactionStatus::Pending,
            TransactionStatus::Processing,
            TransactionStatus::Failed,
        ] {
            assert!(!t.advance(next, now));
        }
        assert_eq!(t.status, TransactionStatus::Successful);
    }

    #[test]
    fn failure_needs_an_unclaimed_row() {
        let now = Utc::now();
        assert!(transaction(TransactionStatus::Created).advance(TransactionStatus::Failed, now));
        assert!(!transaction(TransactionStatus::Processing).advance(TransactionStatus::Failed, now));
    }
}
