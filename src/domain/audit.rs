use uuid::Uuid;

/// Audit / dead-letter record. Webhook processing failures land here so they
/// are observable beyond the process log.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub reference: Option<String>,
    pub action: String,
    pub actor: String,
    pub detail: serde_json::Value,
}

impl NewAuditEntry {
    pub fn webhook_failure(
        provider: &str,
        reference: Option<&str>,
        reason: &str,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            entity_type: "webhook".to_string(),
            entity_id: None,
            reference: reference.map(str::to_string),
            action: "processing_failed".to_string(),
            actor: format!("webhook:{provider}"),
            detail: serde_json::json!({
                "reason": reason,
                "detail": detail,
            }),
        }
    }
}
