use {
    crate::domain::{
        error::PipelineError,
        id::{EventId, TicketTypeId, UserId},
        money::MoneyAmount,
        payment::Assignee,
        ticket::{NewTicket, Ticket, TicketStatus},
    },
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

const COLUMNS: &str = "id, public_id, user_id, event_id, transaction_id, ticket_type_id, \
     ticket_type_name, price, quantity, qr_code, ticket_data, status, assigned_to, used_at, \
     created_at";

#[derive(Debug, sqlx::FromRow)]
pub struct TicketRow {
    pub id: Uuid,
    pub public_id: String,
    pub user_id: String,
    pub event_id: String,
    pub transaction_id: Option<Uuid>,
    pub ticket_type_id: Option<String>,
    pub ticket_type_name: Option<String>,
    pub price: i64,
    pub quantity: i32,
    pub qr_code: String,
    pub ticket_data: String,
    pub status: String,
    pub assigned_to: Option<serde_json::Value>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = PipelineError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let assigned_to = row
            .assigned_to
            .filter(|v| !v.is_null())
            .map(serde_json::from_value::<Assignee>)
            .transpose()?;

        Ok(Ticket {
            id: row.id,
            user_id: UserId::new(row.user_id)?,
            event_id: EventId::new(row.event_id)?,
            transaction_id: row.transaction_id,
            ticket_type_id: row.ticket_type_id.map(TicketTypeId::new).transpose()?,
            ticket_type_name: row.ticket_type_name,
            price: MoneyAmount::new(row.price)?,
            quantity: u32::try_from(row.quantity)
                .map_err(|_| PipelineError::Validation("negative quantity stored".into()))?,
            qr_code: row.qr_code,
            ticket_data: row.ticket_data,
            public_id: row.public_id,
            status: TicketStatus::try_from(row.status.as_str())?,
            assigned_to,
            used_at: row.used_at,
            created_at: row.created_at,
        })
    }
}

pub async fn insert_ticket(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ticket: &NewTicket,
    transaction_id: Option<Uuid>,
) -> Result<Ticket, PipelineError> {
    let quantity = i32::try_from(ticket.quantity)
        .map_err(|_| PipelineError::Validation("quantity out of range".into()))?;
    let assigned_to = ticket
        .assigned_to
        .as_ref()
        .map(serde_json::to_value)
        .transpose()?;

    let sql = format!(
        r#"
        INSERT INTO tickets
            (id, public_id, user_id, event_id, transaction_id, ticket_type_id,
             ticket_type_name, price, quantity, qr_code, ticket_data, status, assigned_to)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'active', $12)
        RETURNING {COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, TicketRow>(&sql)
        .bind(ticket.id)
        .bind(&ticket.public_id)
        .bind(ticket.user_id.as_str())
        .bind(ticket.event_id.as_str())
        .bind(transaction_id)
        .bind(ticket.ticket_type_id.as_ref().map(TicketTypeId::as_str))
        .bind(ticket.ticket_type_name.as_deref())
        .bind(ticket.price.minor())
        .bind(quantity)
        .bind(&ticket.qr_code)
        .bind(&ticket.ticket_data)
        .bind(assigned_to)
        .fetch_one(&mut **tx)
        .await?;

    Ticket::try_from(row)
}

pub async fn find_ticket(pool: &PgPool, id: Uuid) -> Result<Option<Ticket>, PipelineError> {
    let sql = format!("SELECT {COLUMNS} FROM tickets WHERE id = $1");
    sqlx::query_as::<_, TicketRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(Ticket::try_from)
        .transpose()
}

pub async fn mark_used(pool: &PgPool, id: Uuid, at: DateTime<Utc>) -> Result<bool, PipelineError> {
    let result = sqlx::query(
        "UPDATE tickets SET status = 'used', used_at = $2 WHERE id = $1 AND status = 'active'",
    )
    .bind(id)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn cancel_ticket(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
) -> Result<Option<Ticket>, PipelineError> {
    let sql = format!(
        "UPDATE tickets SET status = 'cancelled' WHERE id = $1 AND status = 'active' RETURNING {COLUMNS}"
    );
    sqlx::query_as::<_, TicketRow>(&sql)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .map(Ticket::try_from)
        .transpose()
}
