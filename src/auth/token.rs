//! HS256 token verification.
//!
//! Tokens are issued by the user service: HMAC-SHA256 signed, audience
//! `fastapi-users:auth` by default, with the subject id in `sub` and the role in `group_id`.
//! [`TokenVerifier::verify`] never fails loudly: any decode or validation problem yields
//! `None`, which the enforcer turns into a deny.

use crate::core::config::AuthConfig;
use crate::core::types::SubjectClaims;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use tracing::debug;

/// Shared-secret token verifier
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str, audience: &str, leeway_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["sub", "aud"]);
        validation.leeway = leeway_secs;

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.jwt_secret, &config.audience, config.leeway.as_secs())
    }

    /// Decode and validate `token`. `exp` and `nbf` are checked when present.
    pub fn verify(&self, token: &str) -> Option<SubjectClaims> {
        match decode::<SubjectClaims>(token, &self.key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(e) => {
                debug!(error = %e, "Token rejected");
                None
            }
        }
    }

    /// Extract the credentials of an `Authorization: Bearer <token>` header
    pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let (scheme, token) = value.trim().split_once(' ')?;
        let token = token.trim();
        (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
    }
}
