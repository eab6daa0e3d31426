pub mod calendar;
pub mod dispatcher;
pub mod notifications;
pub mod payments;
pub mod poller;
pub mod reconciliation;
pub mod ticket_issuance;
pub mod ticket_token;
pub mod webhook_processor;
