use {
    super::ticket_token::{TicketSigner, public_id, qr_data_url},
    crate::domain::{
        error::PipelineError,
        event::{Event, PricingRequest, resolve_pricing},
        id::{EventId, TicketTypeId, UserId},
        money::MoneyAmount,
        payment::Assignee,
        store::Store,
        ticket::{IssuanceBatch, NewTicket, Ticket, TicketStatus},
    },
    chrono::{DateTime, Utc},
    std::sync::Arc,
    uuid::Uuid,
};

/// Who a single issued ticket belongs to.
#[derive(Debug, Clone)]
pub struct TicketHolder {
    pub user_id: UserId,
    pub assigned_to: Option<Assignee>,
}

#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub event_id: EventId,
    pub ticket_type_id: Option<TicketTypeId>,
    pub quantity: u32,
    pub user_id: UserId,
    pub assigned_to: Option<Assignee>,
    pub complimentary: bool,
    pub bypass_capacity: bool,
}

#[derive(Clone)]
pub struct TicketIssuer {
    store: Arc<dyn Store>,
    signer: TicketSigner,
}

impl TicketIssuer {
    pub fn new(store: Arc<dyn Store>, signer: TicketSigner) -> Self {
        Self { store, signer }
    }

    pub fn signer(&self) -> &TicketSigner {
        &self.signer
    }

    /// Price, sign and render one quantity-1 ticket per holder. Pricing and
    /// the capacity pre-check cover the whole group; the store rechecks
    /// capacity when the batch is committed.
    pub fn prepare_tickets(
        &self,
        event: &Event,
        requested_type: Option<&TicketTypeId>,
        holders: &[TicketHolder],
        complimentary: bool,
        bypass_capacity: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<NewTicket>, PipelineError> {
        let quantity = u32::try_from(holders.len())
            .map_err(|_| PipelineError::Validation("too many tickets requested".into()))?;
        let pricing = resolve_pricing(
            event,
            PricingRequest {
                requested: requested_type,
                quantity,
                complimentary,
                bypass_capacity,
                now,
            },
        )?;

        holders
            .iter()
            .map(|holder| {
                self.render(
                    event,
                    pricing.ticket_type.as_ref(),
                    pricing.unit_price,
                    1,
                    holder.user_id.clone(),
                    holder.assigned_to.clone(),
                )
            })
            .collect()
    }

    fn render(
        &self,
        event: &Event,
        ticket_type: Option<&(TicketTypeId, String)>,
        price: MoneyAmount,
        quantity: u32,
        user_id: UserId,
        assigned_to: Option<Assignee>,
    ) -> Result<NewTicket, PipelineError> {
        let id = Uuid::now_v7();
        let token = self.signer.sign(id, &event.id, &user_id)?;
        let qr_code = qr_data_url(&token)?;
        let (ticket_type_id, ticket_type_name) = ticket_type
            .map(|(id, name)| (id.clone(), name.clone()))
            .unzip();

        Ok(NewTicket {
            id,
            public_id: public_id(),
            user_id,
            event_id: event.id.clone(),
            ticket_type_id,
            ticket_type_name,
            price,
            quantity,
            qr_code,
            ticket_data: token,
            assigned_to,
        })
    }

    /// Issue a single ticket outside the payment flow (complimentary and
    /// admin grants). One ticket row carries the whole quantity.
    #[tracing::instrument(skip_all, fields(event_id = %req.event_id, user_id = %req.user_id, quantity = req.quantity))]
    pub async fn create_ticket_internal(&self, req: IssueRequest) -> Result<Ticket, PipelineError> {
        let event = self
            .store
            .get_event(&req.event_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("event {}", req.event_id)))?;

        let pricing = resolve_pricing(
            &event,
            PricingRequest {
                requested: req.ticket_type_id.as_ref(),
                quantity: req.quantity,
                complimentary: req.complimentary,
                bypass_capacity: req.bypass_capacity,
                now: Utc::now(),
            },
        )?;
        let price = pricing
            .unit_price
            .checked_mul(req.quantity)
            .ok_or_else(|| PipelineError::Validation("ticket price overflow".into()))?;

        let ticket = self.render(
            &event,
            pricing.ticket_type.as_ref(),
            price,
            req.quantity,
            req.user_id,
            req.assigned_to,
        )?;

        let mut issued = self
            .store
            .commit_issuance(IssuanceBatch {
                tickets: vec![ticket],
                bypass_capacity: req.bypass_capacity,
                settlement: None,
            })
            .await?;

        let ticket = issued
            .pop()
            .ok_or_else(|| PipelineError::Conflict("ticket was not persisted".into()))?;
        tracing::info!(ticket_id = %ticket.id, public_id = %ticket.public_id, "ticket issued");
        Ok(ticket)
    }

    /// Check a scanned token and admit the holder once.
    pub async fn verify_ticket(&self, token: &str) -> Result<Ticket, PipelineError> {
        let claims = self.signer.verify(token)?;
        let mut ticket = self
            .store
            .find_ticket(claims.ticket_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("ticket {}", claims.ticket_id)))?;

        if ticket.event_id != claims.event_id || ticket.user_id != claims.user_id {
            return Err(PipelineError::Validation(
                "token does not match ticket".into(),
            ));
        }
        if ticket.status != TicketStatus::Active {
            return Err(PipelineError::Conflict(format!(
                "ticket is {}",
                ticket.status
            )));
        }

        let now = Utc::now();
        if !self.store.mark_ticket_used(ticket.id, now).await? {
            return Err(PipelineError::Conflict("ticket was admitted concurrently".into()));
        }
        ticket.status = TicketStatus::Used;
        ticket.used_at = Some(now);
        tracing::info!(ticket_id = %ticket.id, event_id = %ticket.event_id, "ticket admitted");
        Ok(ticket)
    }

    pub async fn cancel_ticket(&self, id: Uuid, user_id: &UserId) -> Result<Ticket, PipelineError> {
        let ticket = self
            .store
            .find_ticket(id)
            .await?
            .filter(|t| &t.user_id == user_id)
            .ok_or_else(|| PipelineError::NotFound(format!("ticket {id}")))?;

        if ticket.status != TicketStatus::Active {
            return Err(PipelineError::Conflict(format!("ticket is {}", ticket.status)));
        }

        let cancelled = self
            .store
            .cancel_ticket(id)
            .await?
            .ok_or_else(|| PipelineError::Conflict("ticket is no longer active".into()))?;
        tracing::info!(ticket_id = %id, "ticket cancelled");
        Ok(cancelled)
    }
}
