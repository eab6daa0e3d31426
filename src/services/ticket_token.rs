use {
    crate::domain::{
        error::PipelineError,
        id::{EventId, UserId},
    },
    base64::{Engine, engine::general_purpose::STANDARD},
    jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation},
    qrcode::{QrCode, render::svg},
    serde::{Deserialize, Serialize},
    uuid::Uuid,
};

/// Claims embedded in a ticket's verification token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketClaims {
    pub ticket_id: Uuid,
    pub event_id: EventId,
    pub user_id: UserId,
    pub iat: i64,
}

/// Signs and checks ticket tokens (HS256). Tickets do not expire; a used or
/// cancelled ticket is rejected by status, not by token lifetime.
#[derive(Clone)]
pub struct TicketSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TicketSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn sign(
        &self,
        ticket_id: Uuid,
        event_id: &EventId,
        user_id: &UserId,
    ) -> Result<String, PipelineError> {
        let claims = TicketClaims {
            ticket_id,
            event_id: event_id.clone(),
            user_id: user_id.clone(),
            iat: chrono::Utc::now().timestamp(),
        };
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding,
        )?)
    }

    pub fn verify(&self, token: &str) -> Result<TicketClaims, PipelineError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Ok(jsonwebtoken::decode::<TicketClaims>(token.trim(), &self.decoding, &validation)?.claims)
    }
}

/// Render `data` as an SVG QR code wrapped in a data URL.
pub fn qr_data_url(data: &str) -> Result<String, PipelineError> {
    let code = QrCode::new(data.as_bytes())?;
    let image = code
        .render::<svg::Color<'_>>()
        .min_dimensions(240, 240)
        .build();
    Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(image)))
}

/// Short human-facing ticket code, e.g. `JY-3F9A1C0B7E`.
pub fn public_id() -> String {
    let hex = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("JY-{}", &hex[..10])
}
