use {super::id::UserId, serde::Serialize};

/// Read-only slice of a Jaaiye account needed for notifications and calendar sync.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub full_name: Option<String>,
    pub google_calendar_linked: bool,
    pub outlook_calendar_linked: bool,
}

impl UserProfile {
    pub fn has_linked_calendar(&self) -> bool {
        self.google_calendar_linked || self.outlook_calendar_linked
    }

    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.email)
    }
}
