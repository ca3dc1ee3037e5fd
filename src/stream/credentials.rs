//! Stream API credentials
//!
//! Credentials come from the configuration file first and fall back to the
//! environment. Missing credentials are a setup-time failure that is never
//! retried.
//!
//! # Example
//!
//! ```
//! use stream_ingestr::stream::StreamCredentials;
//!
//! let creds = StreamCredentials::new("account-id", "api-token");
//! assert_eq!(creds.account_id(), "account-id");
//! assert_eq!(creds.api_token(), "api-token");
//! ```

use crate::config::StreamConfig;
use std::fmt;
use thiserror::Error;

/// Environment variable holding the account identifier
pub const ACCOUNT_ID_ENV: &str = "CF_ACCOUNT_ID";

/// Environment variable holding the API token
pub const API_TOKEN_ENV: &str = "CF_STREAM_API_TOKEN";

/// Credential loading errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),
}

/// Account-scoped API credentials
#[derive(Clone)]
pub struct StreamCredentials {
    account_id: String,
    api_token: String,
}

impl StreamCredentials {
    pub fn new(account_id: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            api_token: api_token.into(),
        }
    }

    /// Load credentials from configuration, falling back to the environment
    /// for any value that is empty or still an unexpanded `${VAR}` placeholder.
    pub fn from_config(config: &StreamConfig) -> Result<Self, CredentialsError> {
        let account_id = resolve(&config.account_id, ACCOUNT_ID_ENV)?;
        let api_token = resolve(&config.api_token, API_TOKEN_ENV)?;
        Ok(Self::new(account_id, api_token))
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn api_token(&self) -> &str {
        &self.api_token
    }
}

impl fmt::Debug for StreamCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCredentials")
            .field("account_id", &self.account_id)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

fn resolve(configured: &str, env_var: &str) -> Result<String, CredentialsError> {
    let configured = configured.trim();
    if !configured.is_empty() && !configured.starts_with("${") {
        return Ok(configured.to_string());
    }

    match std::env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(CredentialsError::MissingCredentials(format!(
            "{} not set in config or environment",
            env_var
        ))),
    }
}
