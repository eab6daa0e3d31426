use derive_more::Display;
use serde::{Deserialize, Serialize};

use super::error::PipelineError;

const MAX_REFERENCE_LEN: usize = 128;

/// Provider payment reference (`flw_1700000000000`, `ps_...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Reference(String);

impl Reference {
    pub fn new(reference: impl Into<String>) -> Result<Self, PipelineError> {
        let reference = reference.into();
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::Validation("reference must not be empty".into()));
        }
        if trimmed.len() > MAX_REFERENCE_LEN {
            return Err(PipelineError::Validation(format!(
                "reference longer than {MAX_REFERENCE_LEN} characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for Reference {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Reference> for String {
    fn from(value: Reference) -> Self {
        value.0
    }
}

// Events, users and ticket types are owned by the wider Jaaiye API and use
// its opaque string ids.
macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Result<Self, PipelineError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(PipelineError::Validation(format!(
                        "{} must not be empty",
                        $label
                    )));
                }
                Ok(Self(id.trim().to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = PipelineError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

opaque_id!(
    /// Calendar event identifier.
    EventId,
    "event id"
);
opaque_id!(UserId, "user id");
opaque_id!(TicketTypeId, "ticket type id");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_is_trimmed() {
        let r = Reference::new("  flw_1700000000000 ").unwrap();
        assert_eq!(r.as_str(), "flw_1700000000000");
    }

    #[test]
    fn empty_ids_are_rejected() {
        assert!(Reference::new("   ").is_err());
        assert!(EventId::new("").is_err());
        assert!(serde_json::from_str::<UserId>("\"\"").is_err());
    }

    #[test]
    fn ids_deserialize_from_plain_strings() {
        let id: EventId = serde_json::from_str("\"E1\"").unwrap();
        assert_eq!(id.as_str(), "E1");
    }
}
