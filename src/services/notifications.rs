use {
    crate::domain::{error::PipelineError, provider::BoxFuture, ticket::Ticket},
    serde::Serialize,
    std::sync::Arc,
    tokio::sync::{mpsc, watch},
};

pub const EMAIL_QUEUE_CAPACITY: usize = 256;

const CALENDAR_GUIDANCE: &str = "Link Google Calendar or Outlook in the Jaaiye app to get \
     your tickets added to your calendar automatically.";

#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Ticket line rendered into a confirmation email.
#[derive(Debug, Clone)]
pub struct TicketLine {
    pub public_id: String,
    pub ticket_type_name: Option<String>,
    pub qr_code: String,
}

impl From<&Ticket> for TicketLine {
    fn from(t: &Ticket) -> Self {
        Self {
            public_id: t.public_id.clone(),
            ticket_type_name: t.ticket_type_name.clone(),
            qr_code: t.qr_code.clone(),
        }
    }
}

impl EmailMessage {
    pub fn ticket_confirmation(
        to: &str,
        recipient_name: &str,
        event_title: &str,
        tickets: &[TicketLine],
        calendar_guidance: bool,
    ) -> Self {
        let noun = if tickets.len() == 1 { "ticket" } else { "tickets" };
        let mut text = format!(
            "Hi {recipient_name},\n\nYour {} {noun} for {event_title}:\n",
            tickets.len()
        );
        let mut html = format!(
            "<p>Hi {recipient_name},</p><p>Your {} {noun} for <strong>{event_title}</strong>:</p>",
            tickets.len()
        );
        for t in tickets {
            let kind = t.ticket_type_name.as_deref().unwrap_or("General admission");
            text.push_str(&format!("- {} ({kind})\n", t.public_id));
            html.push_str(&format!(
                "<div><p>{} ({kind})</p><img src=\"{}\" alt=\"QR code {}\"/></div>",
                t.public_id, t.qr_code, t.public_id
            ));
        }
        if calendar_guidance {
            text.push_str(&format!("\n{CALENDAR_GUIDANCE}\n"));
            html.push_str(&format!("<p>{CALENDAR_GUIDANCE}</p>"));
        }

        Self {
            to: to.to_string(),
            subject: format!("Your {noun} for {event_title}"),
            text,
            html,
        }
    }
}

pub trait Mailer: Send + Sync {
    fn send<'a>(&'a self, message: &'a EmailMessage) -> BoxFuture<'a, Result<(), PipelineError>>;
}

/// Writes messages to the log instead of delivering them.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send<'a>(&'a self, message: &'a EmailMessage) -> BoxFuture<'a, Result<(), PipelineError>> {
        tracing::info!(to = %message.to, subject = %message.subject, "email (delivery disabled)");
        Box::pin(std::future::ready(Ok(())))
    }
}

/// Transactional email over a JSON HTTP API.
pub struct HttpMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(client: reqwest::Client, api_url: String, api_key: String, from: String) -> Self {
        Self {
            client,
            api_url,
            api_key,
            from,
        }
    }

    async fn deliver(&self, message: &EmailMessage) -> Result<(), PipelineError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "from": self.from,
                "to": [message.to],
                "subject": message.subject,
                "text": message.text,
                "html": message.html,
            }))
            .send()
            .await
            .map_err(|e| PipelineError::Provider(format!("email api: {e}")))?;

        if !response.status().is_success() {
            return Err(PipelineError::Provider(format!(
                "email api returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

impl Mailer for HttpMailer {
    fn send<'a>(&'a self, message: &'a EmailMessage) -> BoxFuture<'a, Result<(), PipelineError>> {
        Box::pin(self.deliver(message))
    }
}

/// Producer side of the email queue. Enqueueing never blocks the payment flow.
#[derive(Clone)]
pub struct EmailQueue {
    tx: mpsc::Sender<EmailMessage>,
}

impl EmailQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EmailMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Returns `false` when the message was dropped (queue full or closed).
    pub fn enqueue(&self, message: EmailMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(m)) => {
                tracing::error!(to = %m.to, subject = %m.subject, "email queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(m)) => {
                tracing::error!(to = %m.to, "email worker stopped, dropping message");
                false
            }
        }
    }
}

pub async fn run_email_worker(
    mut rx: mpsc::Receiver<EmailMessage>,
    mailer: Arc<dyn Mailer>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("email worker started");

    loop {
        let message = tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("email worker shutting down");
                return;
            }
            message = rx.recv() => match message {
                Some(m) => m,
                None => return,
            },
        };

        match mailer.send(&message).await {
            Ok(()) => tracing::info!(to = %message.to, "confirmation email sent"),
            Err(e) => tracing::warn!(to = %message.to, error = %e, "email delivery failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: &str) -> TicketLine {
        TicketLine {
            public_id: id.to_string(),
            ticket_type_name: Some("Regular".into()),
            qr_code: "data:image/svg+xml;base64,AAAA".into(),
        }
    }

    #[test]
    fn consolidated_email_lists_every_ticket() {
        let msg = EmailMessage::ticket_confirmation(
            "ada@example.com",
            "Ada",
            "Afrobeats Night",
            &[line("JY-1"), line("JY-2")],
            false,
        );
        assert_eq!(msg.subject, "Your tickets for Afrobeats Night");
        assert!(msg.text.contains("JY-1") && msg.text.contains("JY-2"));
        assert_eq!(msg.html.matches("<img").count(), 2);
        assert!(!msg.text.contains("Link Google Calendar"));
    }

    #[test]
    fn guidance_appended_when_requested() {
        let msg = EmailMessage::ticket_confirmation("a@b.c", "A", "Gig", &[line("JY-1")], true);
        assert!(msg.text.contains("Link Google Calendar"));
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let (queue, _rx) = EmailQueue::new(1);
        let msg = EmailMessage::ticket_confirmation("a@b.c", "A", "Gig", &[line("JY-1")], false);
        assert!(queue.enqueue(msg.clone()));
        assert!(!queue.enqueue(msg));
    }
}
