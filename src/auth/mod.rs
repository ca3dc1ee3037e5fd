//! Authentication module
//!
//! Resolves the requester identity handed to the access predicate. The
//! HTTP surface authenticates `/api/` calls with a bearer JWT whose `sub`
//! claim becomes the requester subject.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub mod jwt;

pub use jwt::JwtAuthenticator;

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// Authentication result containing claims
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub subject: String,
    pub claims: HashMap<String, serde_json::Value>,
}

/// Authenticator trait
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate a request
    async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResult, AuthError>;
}

/// Authentication request context
///
/// Header names are lower-cased.
#[derive(Debug, Default)]
pub struct AuthRequest {
    pub headers: HashMap<String, String>,
    pub method: String,
    pub path: String,
}

impl AuthRequest {
    /// Request carrying only an `Authorization: Bearer` header
    pub fn bearer(token: &str) -> Self {
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), format!("Bearer {}", token));
        Self {
            headers,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_result() {
        let result = AuthResult {
            subject: "user123".into(),
            claims: HashMap::new(),
        };
        assert_eq!(result.subject, "user123");
    }

    #[test]
    fn test_bearer_request() {
        let request = AuthRequest::bearer("abc");
        assert_eq!(
            request.headers.get("authorization").map(String::as_str),
            Some("Bearer abc")
        );
    }
}
