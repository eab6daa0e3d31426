use {
    super::id::{EventId, Reference, TicketTypeId, UserId},
    super::money::Money,
    super::provider::ProviderKind,
    serde::{Deserialize, Deserializer, Serialize},
};

/// Person a ticket is issued to on behalf of the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignee {
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
    #[serde(default, alias = "user_id")]
    pub user_id: Option<UserId>,
}

/// Purchase context attached to a payment at init time and echoed back by
/// the gateways.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMetadata {
    #[serde(default, alias = "event_id", skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    #[serde(default, alias = "user_id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default, alias = "ticket_type_id", skip_serializing_if = "Option::is_none")]
    pub ticket_type_id: Option<TicketTypeId>,
    #[serde(
        default,
        deserialize_with = "lenient_quantity",
        skip_serializing_if = "Option::is_none"
    )]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<Assignee>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PaymentMetadata {
    pub fn quantity(&self) -> u32 {
        self.quantity.unwrap_or(1)
    }

    /// Parse a provider metadata bag. Malformed bags become empty metadata so
    /// the stored transaction can still supply the purchase context.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let value = match value {
            // Some SDKs send metadata as a JSON-encoded string.
            serde_json::Value::String(s) => match serde_json::from_str(s) {
                Ok(v) => v,
                Err(_) => return Self::default(),
            },
            serde_json::Value::Null => return Self::default(),
            other => other.clone(),
        };
        match serde_json::from_value(value) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable payment metadata, ignoring");
                Self::default()
            }
        }
    }

    /// Fill fields the provider did not echo back from a fallback source.
    pub fn or_fill_from(mut self, fallback: PaymentMetadata) -> Self {
        if self.event_id.is_none() {
            self.event_id = fallback.event_id;
        }
        if self.user_id.is_none() {
            self.user_id = fallback.user_id;
        }
        if self.ticket_type_id.is_none() {
            self.ticket_type_id = fallback.ticket_type_id;
        }
        if self.quantity.is_none() {
            self.quantity = fallback.quantity;
        }
        if self.assignees.is_empty() {
            self.assignees = fallback.assignees;
        }
        for (k, v) in fallback.extra {
            self.extra.entry(k).or_insert(v);
        }
        self
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}

fn lenient_quantity<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Status as reported by the gateway's transaction lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderPaymentStatus {
    Success,
    Pending,
    Failed,
    Abandoned,
}

impl ProviderPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Pending => "pending",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }

    /// Gateway has definitively declined the payment.
    pub fn is_explicit_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Abandoned)
    }
}

/// Provider-neutral result of a transaction lookup. Every adapter converts
/// its own payload into this before anything reaches reconciliation.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub provider: ProviderKind,
    pub reference: Reference,
    pub status: ProviderPaymentStatus,
    pub money: Money,
    pub metadata: PaymentMetadata,
    pub provider_transaction_id: Option<String>,
    pub provider_reference: Option<String>,
    pub raw: serde_json::Value,
}
