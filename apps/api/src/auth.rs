//! Credential verification for the gateway identify handshake.
//!
//! The gateway never authenticates users itself; it verifies bearer tokens
//! minted by the account service and trusts the claims inside.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

use crate::models::user::UserClaims;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid or expired credential")]
    InvalidCredential,
}

/// A verified identity, plus the claims snapshot frozen at identify time.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub claims: UserClaims,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// HS256 bearer tokens, symmetric with the account service.
pub struct JwtVerifier {
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: String,
    name: String,
    #[serde(default)]
    avatar_url: Option<String>,
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<TokenClaims>(token, &self.decoding, &self.validation).map_err(|err| {
            tracing::debug!(%err, "credential rejected");
            AuthError::InvalidCredential
        })?;
        Ok(Identity {
            user_id: data.claims.sub,
            claims: UserClaims {
                name: data.claims.name,
                avatar_url: data.claims.avatar_url,
            },
        })
    }
}
