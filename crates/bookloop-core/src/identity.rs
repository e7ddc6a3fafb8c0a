use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use bookloop_types::api::Claims;

use crate::error::{CoreError, CoreResult};

/// Issues and verifies bearer tokens. A valid token identifies a user id and
/// nothing else.
#[derive(Clone)]
pub struct IdentityResolver {
    secret: String,
    ttl: chrono::Duration,
}

impl IdentityResolver {
    pub fn new(secret: impl Into<String>, ttl_days: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl: chrono::Duration::days(ttl_days),
        }
    }

    pub fn issue(&self, user_id: Uuid) -> anyhow::Result<String> {
        let claims = Claims {
            sub: user_id,
            exp: (chrono::Utc::now() + self.ttl).timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;

        Ok(token)
    }

    /// Accepts a raw token or an `Authorization` style `Bearer <token>` value.
    pub fn resolve(&self, credential: &str) -> CoreResult<Uuid> {
        let token = strip_bearer(credential.trim());
        if token.is_empty() {
            return Err(CoreError::Unauthorized("Missing token".into()));
        }

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| CoreError::Unauthorized("Invalid token".into()))?;

        Ok(token_data.claims.sub)
    }
}

fn strip_bearer(credential: &str) -> &str {
    match credential.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("bearer ") => credential[7..].trim_start(),
        _ => credential,
    }
}
