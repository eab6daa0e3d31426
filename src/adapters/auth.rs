use {
    super::api_errors::ApiError,
    crate::{AppState, domain::id::UserId},
    axum::{
        extract::FromRequestParts,
        http::{header::AUTHORIZATION, request::Parts},
    },
    jsonwebtoken::{Algorithm, DecodingKey, Validation, decode},
    serde::Deserialize,
};

/// Verifies bearer tokens minted by the account service.
#[derive(Clone)]
pub struct AuthKeys {
    decoding: DecodingKey,
    validation: Validation,
}

impl AuthKeys {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["sub"]);
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn user_id(&self, token: &str) -> Result<UserId, ApiError> {
        let data = decode::<AccessClaims>(token, &self.decoding, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "bearer token rejected");
            ApiError::Unauthorized("invalid bearer token")
        })?;
        UserId::new(data.claims.sub).map_err(|_| ApiError::Unauthorized("invalid bearer token"))
    }
}

#[derive(Debug, Deserialize)]
struct AccessClaims {
    sub: String,
}

/// The authenticated caller, taken from `Authorization: Bearer <jwt>`.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized("missing bearer token"))?;
        state.auth.user_id(token.trim()).map(AuthUser)
    }
}
