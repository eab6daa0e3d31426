use crate::domain::{error::PipelineError, event::Event, provider::BoxFuture, user::UserProfile};

/// Pushes a purchased event into the buyer's linked external calendar.
/// Callers treat every error as non-fatal.
pub trait CalendarSync: Send + Sync {
    fn add_event<'a>(
        &'a self,
        user: &'a UserProfile,
        event: &'a Event,
    ) -> BoxFuture<'a, Result<(), PipelineError>>;
}

/// Used when no calendar integration is wired in: records what would have
/// been synced.
pub struct LogCalendarSync;

impl CalendarSync for LogCalendarSync {
    fn add_event<'a>(
        &'a self,
        user: &'a UserProfile,
        event: &'a Event,
    ) -> BoxFuture<'a, Result<(), PipelineError>> {
        tracing::info!(
            user_id = %user.id,
            event_id = %event.id,
            google = user.google_calendar_linked,
            outlook = user.outlook_calendar_linked,
            "calendar sync skipped, no integration configured"
        );
        Box::pin(std::future::ready(Ok(())))
    }
}
