use {
    crate::domain::{error::PipelineError, id::UserId, user::UserProfile},
    sqlx::PgPool,
};

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    full_name: Option<String>,
    google_calendar_linked: bool,
    outlook_calendar_linked: bool,
}

pub async fn get_user(pool: &PgPool, id: &UserId) -> Result<Option<UserProfile>, PipelineError> {
    let row = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT id, email, full_name, google_calendar_linked, outlook_calendar_linked
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(id.as_str())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(UserProfile {
        id: UserId::new(row.id)?,
        email: row.email,
        full_name: row.full_name,
        google_calendar_linked: row.google_calendar_linked,
        outlook_calendar_linked: row.outlook_calendar_linked,
    }))
}
