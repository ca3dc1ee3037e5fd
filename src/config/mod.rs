//! Configuration module for Stream Ingestr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and comprehensive validation. Every option
//! the ingestion pipeline recognizes is enumerated here with its default.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Upper bound the hosting platform accepts for `maxDurationSeconds`
pub const MAX_DURATION_LIMIT_SECONDS: u32 = 21_600;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// let result = expand_env_vars("prefix-${MY_VAR}-suffix");
/// assert_eq!(result, "prefix-value-suffix");
///
/// let result = expand_env_vars("${MISSING:-default}");
/// assert_eq!(result, "default");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);

    result
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    pub collections: Vec<CollectionConfig>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collections.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one collection must be configured".into(),
            ));
        }

        let mut seen = HashSet::new();
        for collection in &self.collections {
            if collection.key.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "Collection key cannot be empty".into(),
                ));
            }
            if !seen.insert(collection.key.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Collection '{}' is registered more than once",
                    collection.key
                )));
            }
            if collection.max_duration_seconds == 0
                || collection.max_duration_seconds > MAX_DURATION_LIMIT_SECONDS
            {
                return Err(ConfigError::ValidationError(format!(
                    "Collection '{}' has max_duration_seconds {}: must be between 1 and {}",
                    collection.key, collection.max_duration_seconds, MAX_DURATION_LIMIT_SECONDS
                )));
            }
            if let AccessConfig::Subjects { subjects } = &collection.access {
                if subjects.is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "Collection '{}' uses subject access with an empty subject list",
                        collection.key
                    )));
                }
            }
        }

        if !is_valid_http_url(&self.stream.api_base_url) {
            return Err(ConfigError::ValidationError(
                "Invalid stream.api_base_url: must start with http:// or https://".into(),
            ));
        }
        if !is_valid_http_url(&self.stream.playback_base_url) {
            return Err(ConfigError::ValidationError(
                "Invalid stream.playback_base_url: must start with http:// or https://".into(),
            ));
        }

        if self.upload.resumable_threshold_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "upload.resumable_threshold_bytes must be greater than zero".into(),
            ));
        }
        if self.upload.chunk_size_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "upload.chunk_size_bytes must be greater than zero".into(),
            ));
        }
        if self.upload.retry_delays_ms.is_empty() {
            return Err(ConfigError::ValidationError(
                "upload.retry_delays_ms must contain at least one entry".into(),
            ));
        }
        if self.upload.progress_step_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "upload.progress_step_bytes must be greater than zero".into(),
            ));
        }

        if self.reconcile.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "reconcile.poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.reconcile.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "reconcile.max_attempts must be greater than zero".into(),
            ));
        }

        if self.auth.enabled {
            match &self.auth.jwt {
                Some(jwt) if jwt.secret.trim().is_empty() => {
                    return Err(ConfigError::ValidationError(
                        "auth.jwt.secret cannot be empty when auth is enabled".into(),
                    ));
                }
                Some(_) => {}
                None => {
                    return Err(ConfigError::ValidationError(
                        "auth.enabled requires an auth.jwt section".into(),
                    ));
                }
            }
        }

        match self.logging.format.as_str() {
            "json" | "pretty" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid logging format '{}': must be 'json' or 'pretty'",
                    other
                )))
            }
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
}

/// Remote video platform configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Account identifier. Empty falls back to `CF_ACCOUNT_ID`.
    #[serde(default)]
    pub account_id: String,
    /// API token. Empty falls back to `CF_STREAM_API_TOKEN`.
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_playback_base_url")]
    pub playback_base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            api_token: String::new(),
            api_base_url: default_api_base_url(),
            playback_base_url: default_playback_base_url(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

fn default_playback_base_url() -> String {
    "https://iframe.videodelivery.net".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// Upload strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Files strictly larger than this use the resumable protocol
    #[serde(default = "default_resumable_threshold")]
    pub resumable_threshold_bytes: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
    /// Delay before each attempt of a chunk; attempt 0 uses index 0
    #[serde(default = "default_retry_delays")]
    pub retry_delays_ms: Vec<u64>,
    #[serde(default = "default_progress_step")]
    pub progress_step_bytes: usize,
}

impl UploadConfig {
    /// Retry schedule as durations
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            resumable_threshold_bytes: default_resumable_threshold(),
            chunk_size_bytes: default_chunk_size(),
            retry_delays_ms: default_retry_delays(),
            progress_step_bytes: default_progress_step(),
        }
    }
}

fn default_resumable_threshold() -> u64 {
    209715200 // 200MB
}

fn default_chunk_size() -> usize {
    52428800 // 50MB
}

fn default_retry_delays() -> Vec<u64> {
    vec![0, 3000, 5000, 10000, 20000]
}

fn default_progress_step() -> usize {
    1048576 // 1MB
}

/// Status reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl ReconcileConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_poll_interval() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    12
}

/// Per-collection ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub key: String,
    #[serde(default = "default_max_duration")]
    pub max_duration_seconds: u32,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub require_signed_urls: bool,
    #[serde(default)]
    pub prepare_downloads: bool,
    #[serde(default)]
    pub access: AccessConfig,
}

impl CollectionConfig {
    /// Collection with default options
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            max_duration_seconds: default_max_duration(),
            allowed_origins: Vec::new(),
            require_signed_urls: false,
            prepare_downloads: false,
            access: AccessConfig::default(),
        }
    }
}

fn default_max_duration() -> u32 {
    3600
}

/// Who may request upload targets for a collection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AccessConfig {
    #[serde(rename = "public")]
    Public,
    #[default]
    #[serde(rename = "authenticated")]
    Authenticated,
    #[serde(rename = "subjects")]
    Subjects { subjects: Vec<String> },
}

/// Authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub jwt: Option<JwtConfig>,
}

/// JWT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// HMAC secret or PEM public key, depending on `algorithm`
    pub secret: String,
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}
