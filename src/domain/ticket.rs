use {
    super::error::PipelineError,
    super::event::SalesDelta,
    super::id::{EventId, TicketTypeId, UserId},
    super::money::MoneyAmount,
    super::payment::Assignee,
    super::transaction::Settlement,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Active,
    Used,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Used => "used",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TicketStatus {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "active" => Ok(Self::Active),
            "used" => Ok(Self::Used),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(PipelineError::Validation(format!(
                "unknown ticket status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub user_id: UserId,
    pub event_id: EventId,
    pub transaction_id: Option<Uuid>,
    pub ticket_type_id: Option<TicketTypeId>,
    pub ticket_type_name: Option<String>,
    pub price: MoneyAmount,
    pub quantity: u32,
    pub qr_code: String,
    pub ticket_data: String,
    pub public_id: String,
    pub status: TicketStatus,
    pub assigned_to: Option<Assignee>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    pub fn sales_delta(&self) -> SalesDelta {
        SalesDelta {
            event_id: self.event_id.clone(),
            ticket_type_id: self.ticket_type_id.clone(),
            quantity: self.quantity,
        }
    }
}

/// Fully derived ticket ready for insert; token and QR are computed up front
/// and never regenerated.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub id: Uuid,
    pub public_id: String,
    pub user_id: UserId,
    pub event_id: EventId,
    pub ticket_type_id: Option<TicketTypeId>,
    pub ticket_type_name: Option<String>,
    pub price: MoneyAmount,
    pub quantity: u32,
    pub qr_code: String,
    pub ticket_data: String,
    pub assigned_to: Option<Assignee>,
}

impl NewTicket {
    pub fn sales_delta(&self) -> SalesDelta {
        SalesDelta {
            event_id: self.event_id.clone(),
            ticket_type_id: self.ticket_type_id.clone(),
            quantity: self.quantity,
        }
    }

    pub fn into_ticket(self, transaction_id: Option<Uuid>, now: DateTime<Utc>) -> Ticket {
        Ticket {
            id: self.id,
            user_id: self.user_id,
            event_id: self.event_id,
            transaction_id,
            ticket_type_id: self.ticket_type_id,
            ticket_type_name: self.ticket_type_name,
            price: self.price,
            quantity: self.quantity,
            qr_code: self.qr_code,
            ticket_data: self.ticket_data,
            public_id: self.public_id,
            status: TicketStatus::Active,
            assigned_to: self.assigned_to,
            used_at: None,
            created_at: now,
        }
    }
}

/// Everything one issuance pass writes. The store applies it all-or-nothing:
/// counters (capacity rechecked), ticket rows and, when present, the
/// transaction settlement.
#[derive(Debug, Clone)]
pub struct IssuanceBatch {
    pub tickets: Vec<NewTicket>,
    pub bypass_capacity: bool,
    pub settlement: Option<Settlement>,
}

impl IssuanceBatch {
    pub fn sales(&self) -> Vec<SalesDelta> {
        super::event::merge_sales(self.tickets.iter().map(NewTicket::sales_delta))
    }
}
