use {
    super::error::PipelineError,
    super::id::{EventId, TicketTypeId},
    super::money::MoneyAmount,
    chrono::{DateTime, Utc},
    serde::Serialize,
};

pub const MIN_TICKET_QUANTITY: u32 = 1;
pub const MAX_TICKET_QUANTITY: u32 = 10;

pub fn validate_quantity(quantity: u32) -> Result<(), PipelineError> {
    if !(MIN_TICKET_QUANTITY..=MAX_TICKET_QUANTITY).contains(&quantity) {
        return Err(PipelineError::Validation(format!(
            "quantity must be between {MIN_TICKET_QUANTITY} and {MAX_TICKET_QUANTITY}, got: {quantity}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SalesWindow {
    NotStarted,
    Open,
    Ended,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketType {
    pub id: TicketTypeId,
    pub name: String,
    pub price: MoneyAmount,
    /// `None` is unlimited.
    pub capacity: Option<u32>,
    pub sold_count: u32,
    pub is_active: bool,
    pub sales_start_date: Option<DateTime<Utc>>,
    pub sales_end_date: Option<DateTime<Utc>>,
}

impl TicketType {
    pub fn remaining(&self) -> Option<i64> {
        self.capacity
            .map(|c| i64::from(c) - i64::from(self.sold_count))
    }

    pub fn has_capacity_for(&self, quantity: u32) -> bool {
        self.remaining()
            .is_none_or(|remaining| remaining >= i64::from(quantity))
    }

    pub fn sales_window(&self, now: DateTime<Utc>) -> SalesWindow {
        if self.sales_start_date.is_some_and(|start| now < start) {
            SalesWindow::NotStarted
        } else if self.sales_end_date.is_some_and(|end| now > end) {
            SalesWindow::Ended
        } else {
            SalesWindow::Open
        }
    }

    fn is_on_sale(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.sales_window(now) == SalesWindow::Open
    }

    fn name_matches(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle)
    }
}

/// Legacy flat-fee pricing stored on events without typed inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketFee {
    Free,
    Flat(MoneyAmount),
    Unset,
    Invalid(String),
}

impl TicketFee {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => Self::Unset,
            Some(s) if s.eq_ignore_ascii_case("free") => Self::Free,
            Some(s) => match MoneyAmount::from_major(s) {
                Ok(amount) => Self::Flat(amount),
                Err(_) => Self::Invalid(s.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub venue: Option<String>,
    pub ticket_fee: Option<String>,
    pub attendee_count: u32,
    pub ticket_types: Vec<TicketType>,
}

impl Event {
    pub fn fee(&self) -> TicketFee {
        TicketFee::parse(self.ticket_fee.as_deref())
    }

    pub fn is_free(&self) -> bool {
        self.fee() == TicketFee::Free
    }

    pub fn has_typed_inventory(&self) -> bool {
        !self.ticket_types.is_empty()
    }

    pub fn ticket_type(&self, id: &TicketTypeId) -> Option<&TicketType> {
        self.ticket_types.iter().find(|t| &t.id == id)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PricingRequest<'a> {
    pub requested: Option<&'a TicketTypeId>,
    pub quantity: u32,
    pub complimentary: bool,
    pub bypass_capacity: bool,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPricing {
    pub ticket_type: Option<(TicketTypeId, String)>,
    pub unit_price: MoneyAmount,
}

/// Decide which ticket type a purchase draws from and what one unit costs.
///
/// Order: the event-level free flag, then typed inventory (explicit type or
/// Early Bird → Regular → first available), then the legacy flat fee.
/// `complimentary` zeroes the price but still draws from inventory.
pub fn resolve_pricing(
    event: &Event,
    req: PricingRequest<'_>,
) -> Result<ResolvedPricing, PipelineError> {
    validate_quantity(req.quantity)?;

    let mut resolved = if event.has_typed_inventory() {
        let ticket_type = match req.requested {
            Some(id) => requested_type(event, id, req)?,
            None => auto_select_type(event, req)?,
        };
        ResolvedPricing {
            ticket_type: Some((ticket_type.id.clone(), ticket_type.name.clone())),
            unit_price: ticket_type.price,
        }
    } else {
        let unit_price = match event.fee() {
            TicketFee::Free | TicketFee::Unset => MoneyAmount::ZERO,
            TicketFee::Flat(amount) => amount,
            TicketFee::Invalid(raw) => {
                return Err(PipelineError::Validation(format!(
                    "event {} has an invalid ticket fee: {raw}",
                    event.id
                )));
            }
        };
        ResolvedPricing {
            ticket_type: None,
            unit_price,
        }
    };

    if event.is_free() || req.complimentary {
        resolved.unit_price = MoneyAmount::ZERO;
    }
    Ok(resolved)
}

fn requested_type<'e>(
    event: &'e Event,
    id: &TicketTypeId,
    req: PricingRequest<'_>,
) -> Result<&'e TicketType, PipelineError> {
    let ticket_type = event
        .ticket_type(id)
        .ok_or_else(|| PipelineError::NotFound(format!("ticket type {id} on event {}", event.id)))?;

    if !ticket_type.is_active {
        return Err(PipelineError::Validation(format!(
            "ticket type {} is not active",
            ticket_type.name
        )));
    }
    match ticket_type.sales_window(req.now) {
        SalesWindow::NotStarted => {
            return Err(PipelineError::Validation(format!(
                "sales for {} have not started",
                ticket_type.name
            )));
        }
        SalesWindow::Ended => {
            return Err(PipelineError::Validation(format!(
                "sales for {} have ended",
                ticket_type.name
            )));
        }
        SalesWindow::Open => {}
    }
    if !req.bypass_capacity && !ticket_type.has_capacity_for(req.quantity) {
        return Err(PipelineError::CapacityExceeded {
            ticket_type: ticket_type.name.clone(),
            requested: req.quantity,
            remaining: ticket_type.remaining().unwrap_or_default().max(0),
        });
    }
    Ok(ticket_type)
}

/// With nothing able to take the quantity, the error names the type the
/// priority order would have picked had it not sold out.
fn auto_select_type<'e>(
    event: &'e Event,
    req: PricingRequest<'_>,
) -> Result<&'e TicketType, PipelineError> {
    let on_sale: Vec<&TicketType> = event
        .ticket_types
        .iter()
        .filter(|t| t.is_on_sale(req.now))
        .collect();
    let available: Vec<&TicketType> = on_sale
        .iter()
        .copied()
        .filter(|t| req.bypass_capacity || t.has_capacity_for(req.quantity))
        .collect();

    if let Some(picked) = by_priority(&available) {
        return Ok(picked);
    }
    match by_priority(&on_sale) {
        Some(sold_out) => Err(PipelineError::CapacityExceeded {
            ticket_type: sold_out.name.clone(),
            requested: req.quantity,
            remaining: sold_out.remaining().unwrap_or_default().max(0),
        }),
        None => Err(PipelineError::Validation(format!(
            "no ticket types on sale for event {}",
            event.id
        ))),
    }
}

/// Early Bird, then Regular, then whatever comes first.
fn by_priority<'e>(types: &[&'e TicketType]) -> Option<&'e TicketType> {
    types
        .iter()
        .find(|t| t.name_matches("early bird"))
        .or_else(|| types.iter().find(|t| t.name_matches("regular")))
        .or_else(|| types.first())
        .copied()
}

/// Change to an event's sold counters produced by issuing or cancelling tickets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesDelta {
    pub event_id: EventId,
    pub ticket_type_id: Option<TicketTypeId>,
    pub quantity: u32,
}

/// Collapse per-ticket deltas into one per (event, ticket type), in a stable
/// order so concurrent commits lock counter rows the same way.
pub fn merge_sales(deltas: impl IntoIterator<Item = SalesDelta>) -> Vec<SalesDelta> {
    let mut merged: Vec<SalesDelta> = Vec::new();
    for delta in deltas {
        match merged
            .iter_mut()
            .find(|m| m.event_id == delta.event_id && m.ticket_type_id == delta.ticket_type_id)
        {
            Some(existing) => existing.quantity += delta.quantity,
            None => merged.push(delta),
        }
    }
    merged.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
    merged
}

fn sort_key(delta: &SalesDelta) -> (&str, Option<&str>) {
    (
        delta.event_id.as_str(),
        delta.ticket_type_id.as_ref().map(TicketTypeId::as_str),
    )
}
