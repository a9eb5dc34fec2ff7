//! JWT token verification.
//!
//! Tokens are HS256-signed by the account service with claims
//! `{userId, username}`. `exp` is honoured when present.

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use lobby_core::{Identity, TokenVerifier, VerifyError};
use serde::Deserialize;

/// The account service issues numeric ids; accept either form.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UserId {
    Number(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(rename = "userId")]
    user_id: Option<UserId>,
    username: Option<String>,
}

/// Verifies HS256 tokens against a shared secret.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier for the given secret.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 60; // 60 second clock skew tolerance
        validation.required_spec_claims.clear();

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Decode and validate a token into an identity.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` for bad signatures, expired or malformed tokens,
    /// and `MissingClaim` if `userId` or `username` is absent.
    pub fn decode_identity(&self, token: &str) -> Result<Identity, VerifyError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => VerifyError::Invalid("token expired".into()),
                ErrorKind::InvalidSignature => VerifyError::Invalid("bad signature".into()),
                _ => VerifyError::Invalid(e.to_string()),
            })?;

        let id = match claims.user_id.ok_or(VerifyError::MissingClaim("userId"))? {
            UserId::Number(n) => n.to_string(),
            UserId::Text(s) => s,
        };
        let username = claims
            .username
            .filter(|name| !name.is_empty())
            .ok_or(VerifyError::MissingClaim("username"))?;

        Ok(Identity::new(id, username))
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, VerifyError> {
        self.decode_identity(token)
    }
}
