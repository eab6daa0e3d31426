use {
    crate::domain::{
        error::PipelineError,
        event::{Event, SalesDelta, TicketType},
        id::{EventId, TicketTypeId},
        money::MoneyAmount,
    },
    chrono::{DateTime, Utc},
    sqlx::PgPool,
};

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: String,
    title: String,
    starts_at: DateTime<Utc>,
    ends_at: Option<DateTime<Utc>>,
    venue: Option<String>,
    ticket_fee: Option<String>,
    attendee_count: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct TicketTypeRow {
    id: String,
    name: String,
    price: i64,
    capacity: Option<i32>,
    sold_count: i32,
    is_active: bool,
    sales_start_date: Option<DateTime<Utc>>,
    sales_end_date: Option<DateTime<Utc>>,
}

fn non_negative(value: i32, column: &str) -> Result<u32, PipelineError> {
    u32::try_from(value).map_err(|_| PipelineError::Validation(format!("negative {column} stored")))
}

fn to_i32(quantity: u32) -> Result<i32, PipelineError> {
    i32::try_from(quantity).map_err(|_| PipelineError::Validation("quantity out of range".into()))
}

impl TryFrom<TicketTypeRow> for TicketType {
    type Error = PipelineError;

    fn try_from(row: TicketTypeRow) -> Result<Self, Self::Error> {
        Ok(TicketType {
            id: TicketTypeId::new(row.id)?,
            name: row.name,
            price: MoneyAmount::new(row.price)?,
            capacity: row.capacity.map(|c| non_negative(c, "capacity")).transpose()?,
            sold_count: non_negative(row.sold_count, "sold_count")?,
            is_active: row.is_active,
            sales_start_date: row.sales_start_date,
            sales_end_date: row.sales_end_date,
        })
    }
}

pub async fn get_event(pool: &PgPool, id: &EventId) -> Result<Option<Event>, PipelineError> {
    let Some(row) = sqlx::query_as::<_, EventRow>(
        "SELECT id, title, starts_at, ends_at, venue, ticket_fee, attendee_count FROM events WHERE id = $1",
    )
    .bind(id.as_str())
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };

    let ticket_types = sqlx::query_as::<_, TicketTypeRow>(
        r#"
        SELECT id, name, price, capacity, sold_count, is_active, sales_start_date, sales_end_date
        FROM event_ticket_types
        WHERE event_id = $1
        ORDER BY position, id
        "#,
    )
    .bind(id.as_str())
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(TicketType::try_from)
    .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(Event {
        id: EventId::new(row.id)?,
        title: row.title,
        starts_at: row.starts_at,
        ends_at: row.ends_at,
        venue: row.venue,
        ticket_fee: row.ticket_fee,
        attendee_count: non_negative(row.attendee_count, "attendee_count")?,
        ticket_types,
    }))
}

/// Capacity check and increment happen in one conditional UPDATE on the
/// ticket type row, so concurrent sales cannot oversell.
pub async fn increment_ticket_sales(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    delta: &SalesDelta,
    bypass_capacity: bool,
) -> Result<(), PipelineError> {
    let quantity = to_i32(delta.quantity)?;

    if let Some(type_id) = &delta.ticket_type_id {
        let updated = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE event_ticket_types
            SET sold_count = sold_count + $3
            WHERE id = $1 AND event_id = $2
              AND ($4 OR capacity IS NULL OR sold_count + $3 <= capacity)
            RETURNING sold_count
            "#,
        )
        .bind(type_id.as_str())
        .bind(delta.event_id.as_str())
        .bind(quantity)
        .bind(bypass_capacity)
        .fetch_optional(&mut **tx)
        .await?;

        if updated.is_none() {
            let current = sqlx::query_as::<_, (String, Option<i32>, i32)>(
                "SELECT name, capacity, sold_count FROM event_ticket_types WHERE id = $1 AND event_id = $2",
            )
            .bind(type_id.as_str())
            .bind(delta.event_id.as_str())
            .fetch_optional(&mut **tx)
            .await?;

            return Err(match current {
                None => PipelineError::NotFound(format!("ticket type {type_id}")),
                Some((name, capacity, sold_count)) => PipelineError::CapacityExceeded {
                    ticket_type: name,
                    requested: delta.quantity,
                    remaining: (i64::from(capacity.unwrap_or_default()) - i64::from(sold_count))
                        .max(0),
                },
            });
        }
    }

    let result = sqlx::query(
        "UPDATE events SET attendee_count = attendee_count + $2, updated_at = now() WHERE id = $1",
    )
    .bind(delta.event_id.as_str())
    .bind(quantity)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(PipelineError::NotFound(format!("event {}", delta.event_id)));
    }
    Ok(())
}

pub async fn decrement_ticket_sales(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    delta: &SalesDelta,
) -> Result<(), PipelineError> {
    let quantity = to_i32(delta.quantity)?;

    if let Some(type_id) = &delta.ticket_type_id {
        sqlx::query(
            r#"
            UPDATE event_ticket_types
            SET sold_count = GREATEST(sold_count - $3, 0)
            WHERE id = $1 AND event_id = $2
            "#,
        )
        .bind(type_id.as_str())
        .bind(delta.event_id.as_str())
        .bind(quantity)
        .execute(&mut **tx)
        .await?;
    }

    sqlx::query(
        r#"
        UPDATE events
        SET attendee_count = GREATEST(attendee_count - $2, 0), updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(delta.event_id.as_str())
    .bind(quantity)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
