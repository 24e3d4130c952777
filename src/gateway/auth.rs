use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Driver,
    Customer,
}

/// Resolved identity of an authenticated connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub user_type: UserType,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("malformed token")]
    MalformedToken,
    #[error("token verification failed")]
    VerificationFailed,
}

/// Verifies bearer tokens minted by the trusted issuer. Token format:
/// `<user_type>:<user_id>:<secret>`, e.g. `driver:550e8400-...:s3cret`.
#[derive(Debug, Clone)]
pub struct Authenticator {
    secret: String,
}

impl Authenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let mut parts = token.splitn(3, ':');
        let user_type = match parts.next() {
            Some("driver") => UserType::Driver,
            Some("customer") => UserType::Customer,
            _ => return Err(AuthError::MalformedToken),
        };
        let user_id = parts
            .next()
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or(AuthError::MalformedToken)?;
        let secret = parts.next().ok_or(AuthError::MalformedToken)?;

        if secret != self.secret {
            return Err(AuthError::VerificationFailed);
        }

        Ok(Identity { user_id, user_type })
    }
}
