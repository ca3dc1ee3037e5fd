//! JWT Authentication
//!
//! Supports HS256, RS256 and ES256 bearer tokens.

use super::{AuthError, AuthRequest, AuthResult, Authenticator};
use crate::config::JwtConfig;
use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// JWT Claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub iat: Option<usize>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
}

/// JWT Authenticator
///
/// # Example
///
/// ```
/// use stream_ingestr::auth::jwt::JwtAuthenticator;
///
/// // HS256 with secret
/// let auth = JwtAuthenticator::new_hs256("my-secret");
///
/// // With issuer and audience validation
/// let auth = JwtAuthenticator::new_hs256("my-secret")
///     .with_issuer("https://auth.example.com")
///     .with_audience("media-admin");
/// ```
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    /// Create a new JWT authenticator with a secret key (HS256)
    pub fn new_hs256(secret: &str) -> Self {
        let decoding_key = DecodingKey::from_secret(secret.as_bytes());
        Self {
            decoding_key,
            validation: validation_for(Algorithm::HS256),
        }
    }

    /// Create a new JWT authenticator with an RSA public key (RS256)
    pub fn new_rs256(public_key_pem: &str) -> Result<Self, AuthError> {
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(Self {
            decoding_key,
            validation: validation_for(Algorithm::RS256),
        })
    }

    /// Create a new JWT authenticator with an EC public key (ES256)
    pub fn new_es256(public_key_pem: &str) -> Result<Self, AuthError> {
        let decoding_key = DecodingKey::from_ec_pem(public_key_pem.as_bytes())
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(Self {
            decoding_key,
            validation: validation_for(Algorithm::ES256),
        })
    }

    /// Build an authenticator from the `auth.jwt` configuration section
    pub fn from_config(config: &JwtConfig) -> Result<Self, AuthError> {
        let auth = match config.algorithm.to_ascii_uppercase().as_str() {
            "HS256" => Self::new_hs256(&config.secret),
            "RS256" => Self::new_rs256(&config.secret)?,
            "ES256" => Self::new_es256(&config.secret)?,
            other => return Err(AuthError::UnsupportedAlgorithm(other.to_string())),
        };

        let auth = match &config.issuer {
            Some(issuer) => auth.with_issuer(issuer),
            None => auth,
        };
        Ok(match &config.audience {
            Some(audience) => auth.with_audience(audience),
            None => auth,
        })
    }

    /// Set the required issuer (`iss` claim)
    #[must_use]
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    /// Set the required audience (`aud` claim)
    #[must_use]
    pub fn with_audience(mut self, audience: &str) -> Self {
        self.validation.set_audience(&[audience]);
        self.validation.validate_aud = true;
        self
    }

    fn extract_token(request: &AuthRequest) -> Option<&str> {
        request
            .headers
            .get("authorization")
            .and_then(|auth| auth.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

fn validation_for(algorithm: Algorithm) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = true;
    // Only validate aud when explicitly set
    validation.validate_aud = false;
    validation
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    #[tracing::instrument(
        name = "auth.jwt",
        skip(self, request),
        fields(
            auth.method = "jwt",
            auth.token_present = Self::extract_token(request).is_some()
        ),
        err
    )]
    async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResult, AuthError> {
        let token = Self::extract_token(request).ok_or(AuthError::MissingAuth)?;

        let token_data =
            decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        AuthError::InvalidSignature
                    }
                    _ => AuthError::InvalidToken(e.to_string()),
                }
            })?;

        let mut claims_map = std::collections::HashMap::new();
        if let Some(iss) = &token_data.claims.iss {
            claims_map.insert("iss".into(), serde_json::Value::String(iss.clone()));
        }
        if let Some(aud) = &token_data.claims.aud {
            claims_map.insert("aud".into(), serde_json::Value::String(aud.clone()));
        }

        tracing::debug!(subject = %token_data.claims.sub, "JWT authentication successful");

        Ok(AuthResult {
            subject: token_data.claims.sub,
            claims: claims_map,
        })
    }
}
