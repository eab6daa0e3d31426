use {crate::domain::audit::NewAuditEntry, crate::domain::error::PipelineError};

pub async fn insert_audit_entry<'e, E>(executor: E, entry: &NewAuditEntry) -> Result<(), PipelineError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO audit_log (id, entity_type, entity_id, reference, action, actor, detail)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(entry.id)
    .bind(&entry.entity_type)
    .bind(entry.entity_id)
    .bind(entry.reference.as_deref())
    .bind(&entry.action)
    .bind(&entry.actor)
    .bind(&entry.detail)
    .execute(executor)
    .await?;

    Ok(())
}
