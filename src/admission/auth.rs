//! Bearer token authentication
//!
//! When token auth is enabled, every request must carry
//! `Authorization: Bearer <token>`. The token is checked by a
//! [`TokenVerifier`]; the resolved [`Principal`] feeds identity resolution.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt::Debug;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Token authentication failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing_auth")]
    MissingAuth,
    #[error("invalid_token")]
    InvalidToken,
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingAuth => "missing_auth",
            AuthError::InvalidToken => "invalid_token",
        }
    }
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
}

/// Checks bearer tokens
#[async_trait]
pub trait TokenVerifier: Send + Sync + Debug {
    async fn verify(&self, token: &str) -> Result<Principal, AuthError>;
}

/// Token from an `Authorization` header value
///
/// The scheme is case-sensitive, matching `Bearer ` exactly.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let token = header
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AuthError::MissingAuth)?;
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::InvalidToken);
    }
    Ok(token)
}

/// Accepts a fixed list of application tokens
#[derive(Clone)]
pub struct StaticTokenVerifier {
    tokens: Vec<String>,
}

impl Debug for StaticTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenVerifier")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

impl StaticTokenVerifier {
    pub fn new(tokens: Vec<String>) -> Self {
        Self {
            tokens: tokens.into_iter().filter(|t| !t.trim().is_empty()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Stable, non-reversible user id for a token
fn token_user_id(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("token:{}", hex::encode(&digest[..8]))
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        // Compare against every token so timing does not reveal which one matched
        let matched = self.tokens.iter().fold(false, |found, candidate| {
            let eq: bool = candidate.as_bytes().ct_eq(token.as_bytes()).into();
            found | eq
        });

        if matched {
            Ok(Principal {
                user_id: token_user_id(token),
            })
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}
