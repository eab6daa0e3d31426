use {
    crate::domain::{
        error::PipelineError,
        id::{EventId, Reference, TicketTypeId, UserId},
        money::{Currency, Money, MoneyAmount},
        payment::PaymentMetadata,
        provider::ProviderKind,
        transaction::{ClaimOutcome, NewTransaction, Settlement, Transaction, TransactionStatus},
    },
    chrono::{DateTime, Duration, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

const COLUMNS: &str = "id, provider, reference, trans_id, trans_reference, amount, currency, \
     status, user_id, event_id, ticket_type_id, quantity, metadata, raw, claimed_at, \
     created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
pub struct TransactionRow {
    pub id: Uuid,
    pub provider: String,
    pub reference: String,
    pub trans_id: Option<String>,
    pub trans_reference: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub user_id: String,
    pub event_id: String,
    pub ticket_type_id: Option<String>,
    pub quantity: i32,
    pub metadata: serde_json::Value,
    pub raw: serde_json::Value,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = PipelineError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(Transaction {
            id: row.id,
            provider: ProviderKind::try_from(row.provider.as_str())?,
            reference: Reference::new(row.reference)?,
            trans_id: row.trans_id,
            trans_reference: row.trans_reference,
            money: Money::new(
                MoneyAmount::new(row.amount)?,
                Currency::try_from(row.currency.as_str())?,
            ),
            status: TransactionStatus::try_from(row.status.as_str())?,
            user_id: UserId::new(row.user_id)?,
            event_id: EventId::new(row.event_id)?,
            ticket_type_id: row.ticket_type_id.map(TicketTypeId::new).transpose()?,
            quantity: u32::try_from(row.quantity)
                .map_err(|_| PipelineError::Validation("negative quantity stored".into()))?,
            metadata: PaymentMetadata::from_value(&row.metadata),
            raw: row.raw,
            claimed_at: row.claimed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Insert a transaction. Returns `false` on (provider, reference) conflict.
pub async fn insert_transaction(pool: &PgPool, t: &NewTransaction) -> Result<bool, PipelineError> {
    let quantity = i32::try_from(t.quantity())
        .map_err(|_| PipelineError::Validation("quantity out of range".into()))?;

    let result = sqlx::query(
        r#"
        INSERT INTO transactions
            (id, provider, reference, trans_id, trans_reference, amount, currency,
             status, user_id, event_id, ticket_type_id, quantity, metadata, raw)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (provider, reference) DO NOTHING
        "#,
    )
    .bind(t.id())
    .bind(t.provider().as_str())
    .bind(t.reference().as_str())
    .bind(t.trans_id())
    .bind(t.trans_reference())
    .bind(t.money().amount().minor())
    .bind(t.money().currency().as_str())
    .bind(t.status().as_str())
    .bind(t.user_id().as_str())
    .bind(t.event_id().as_str())
    .bind(t.ticket_type_id().map(TicketTypeId::as_str))
    .bind(quantity)
    .bind(t.metadata().to_value())
    .bind(t.raw())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn find_transaction(
    pool: &PgPool,
    provider: ProviderKind,
    reference: &Reference,
) -> Result<Option<Transaction>, PipelineError> {
    let sql = format!("SELECT {COLUMNS} FROM transactions WHERE provider = $1 AND reference = $2");
    let row = sqlx::query_as::<_, TransactionRow>(&sql)
        .bind(provider.as_str())
        .bind(reference.as_str())
        .fetch_optional(pool)
        .await?;

    row.map(Transaction::try_from).transpose()
}

/// Single conditional UPDATE: only one caller can move a row into
/// `processing`, so webhook and poller cannot both issue tickets.
pub async fn claim_transaction(
    pool: &PgPool,
    provider: ProviderKind,
    reference: &Reference,
    lease: Duration,
) -> Result<ClaimOutcome, PipelineError> {
    let sql = format!(
        r#"
        UPDATE transactions
        SET status = 'processing', claimed_at = now(), updated_at = now()
        WHERE provider = $1 AND reference = $2
          AND (status IN ('created', 'pending')
               OR (status = 'processing' AND claimed_at < now() - make_interval(secs => $3)))
        RETURNING {COLUMNS}
        "#
    );
    let claimed = sqlx::query_as::<_, TransactionRow>(&sql)
        .bind(provider.as_str())
        .bind(reference.as_str())
        .bind(lease.num_seconds() as f64)
        .fetch_optional(pool)
        .await?;

    if let Some(row) = claimed {
        return Ok(ClaimOutcome::Claimed(Transaction::try_from(row)?));
    }

    Ok(match find_transaction(pool, provider, reference).await? {
        None => ClaimOutcome::Missing,
        Some(t) => match t.status {
            TransactionStatus::Successful => ClaimOutcome::AlreadySuccessful(t),
            TransactionStatus::Failed | TransactionStatus::Cancelled => {
                ClaimOutcome::Closed(t.status)
            }
            // Lost the race between our UPDATE and this SELECT, or the lease is live.
            _ => ClaimOutcome::InFlight,
        },
    })
}

pub async fn release_claim(
    pool: &PgPool,
    id: Uuid,
    claimed_at: DateTime<Utc>,
) -> Result<(), PipelineError> {
    sqlx::query(
        r#"
        UPDATE transactions
        SET status = 'pending', claimed_at = NULL, updated_at = now()
        WHERE id = $1 AND status = 'processing' AND claimed_at = $2
        "#,
    )
    .bind(id)
    .bind(claimed_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// `processing → successful`, inside the issuance transaction.
pub async fn settle_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    settlement: &Settlement,
) -> Result<(), PipelineError> {
    let result = sqlx::query(
        r#"
        UPDATE transactions
        SET status = 'successful',
            trans_id = COALESCE($2, trans_id),
            trans_reference = COALESCE($3, trans_reference),
            raw = $4,
            claimed_at = NULL,
            updated_at = now()
        WHERE id = $1 AND status = 'processing'
        "#,
    )
    .bind(settlement.transaction_id)
    .bind(settlement.trans_id.as_deref())
    .bind(settlement.trans_reference.as_deref())
    .bind(&settlement.raw)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(PipelineError::Conflict(format!(
            "transaction {} is no longer claimed",
            settlement.transaction_id
        )));
    }
    Ok(())
}

pub async fn mark_failed(
    pool: &PgPool,
    id: Uuid,
    raw: &serde_json::Value,
) -> Result<bool, PipelineError> {
    let result = sqlx::query(
        r#"
        UPDATE transactions
        SET status = 'failed', raw = $2, updated_at = now()
        WHERE id = $1 AND status IN ('created', 'pending')
        "#,
    )
    .bind(id)
    .bind(raw)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn list_pending(
    pool: &PgPool,
    provider: ProviderKind,
    since: DateTime<Utc>,
    stale_claim_before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Transaction>, PipelineError> {
    // A crashed pass leaves its row in `processing`; once the lease lapses it
    // is as good as pending.
    let sql = format!(
        r#"
        SELECT {COLUMNS} FROM transactions
        WHERE provider = $1 AND created_at >= $2
          AND (status = 'pending'
               OR (status = 'processing' AND claimed_at <= $3))
        ORDER BY created_at
        LIMIT $4
        "#
    );
    let rows = sqlx::query_as::<_, TransactionRow>(&sql)
        .bind(provider.as_str())
        .bind(since)
        .bind(stale_claim_before)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(Transaction::try_from).collect()
}
