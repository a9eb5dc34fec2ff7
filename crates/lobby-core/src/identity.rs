//! Authenticated identities and the token verification seam.

use async_trait::async_trait;
use lobby_protocol::UserRef;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An authenticated user, as produced by a [`TokenVerifier`].
///
/// Bound to a connection at most once and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// User identifier assigned by the auth service.
    pub id: String,
    /// Display name.
    pub username: String,
}

impl Identity {
    #[must_use]
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
        }
    }

    /// The public view of this identity shown to other room members.
    #[must_use]
    pub fn to_user_ref(&self) -> UserRef {
        UserRef::new(self.username.clone())
    }
}

/// Token verification failures.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The token is malformed, expired, or signed with the wrong key.
    #[error("Invalid token: {0}")]
    Invalid(String),

    /// The token verified but lacks the fields needed to build an identity.
    #[error("Token is missing claim: {0}")]
    MissingClaim(&'static str),
}

/// Turns a bearer token into an [`Identity`].
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify a token.
    async fn verify(&self, token: &str) -> Result<Identity, VerifyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_ref_exposes_only_username() {
        let identity = Identity::new("42", "alice");
        let json = serde_json::to_value(identity.to_user_ref()).unwrap();
        assert_eq!(json, serde_json::json!({"username": "alice"}));
    }
}
