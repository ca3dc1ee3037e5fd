//! Stream API client
//!
//! Thin typed client for the hosted video platform's account-scoped API.
//! All calls go to `{api_base_url}/accounts/{account_id}/stream...` with a
//! bearer token; JSON responses use the `{success, errors, messages, result}`
//! envelope.
//!
//! # Tracing
//!
//! | Operation | Span Name | Method / Path |
//! |-----------|-----------|---------------|
//! | Create one-time upload URL | `stream.direct_upload` | `POST /stream/direct_upload` |
//! | Create resumable session | `stream.create_resumable` | `POST /stream` (tus creation) |
//! | Set allowed origins | `stream.update_allowed_origins` | `POST /stream/{uid}` |
//! | Fetch video details | `stream.get_video` | `GET /stream/{uid}` |
//! | Delete video | `stream.delete_video` | `DELETE /stream/{uid}` |
//! | Prepare downloads | `stream.create_downloads` | `POST /stream/{uid}/downloads` |
//! | Fetch downloads | `stream.get_downloads` | `GET /stream/{uid}/downloads` |
//!
//! # Example
//!
//! ```no_run
//! use stream_ingestr::stream::{StreamClient, StreamClientConfig, StreamCredentials};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = StreamClient::new(StreamClientConfig {
//!     api_base_url: "https://api.cloudflare.com/client/v4".into(),
//!     playback_base_url: "https://iframe.videodelivery.net".into(),
//!     credentials: StreamCredentials::new("account", "token"),
//!     timeout: None,
//! })?;
//! let video = client
//!     .get_video(&"ea95132c15732412d22c1476fa83f27a".parse()?)
//!     .await?;
//! println!("state: {}", video.status.state);
//! # Ok(())
//! # }
//! ```

pub mod credentials;
pub mod id;

pub use credentials::{CredentialsError, StreamCredentials};
pub use id::{InvalidStreamId, StreamId};

use crate::config::StreamConfig;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Resumable protocol version spoken by the platform
pub const TUS_VERSION: &str = "1.0.0";

/// Default API request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest raw body excerpt carried into an error message
const MAX_ERROR_BODY: usize = 512;

/// Stream client errors
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Upstream API error (status {status}): {}", .messages.join("; "))]
    Upstream { status: u16, messages: Vec<String> },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl StreamError {
    fn upstream(status: StatusCode, message: impl Into<String>) -> Self {
        StreamError::Upstream {
            status: status.as_u16(),
            messages: vec![message.into()],
        }
    }

    /// HTTP status of an upstream failure
    pub fn status(&self) -> Option<u16> {
        match self {
            StreamError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<CredentialsError> for StreamError {
    fn from(e: CredentialsError) -> Self {
        StreamError::Configuration(e.to_string())
    }
}

/// Stream client configuration
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    pub api_base_url: String,
    pub playback_base_url: String,
    pub credentials: StreamCredentials,
    pub timeout: Option<Duration>,
}

impl StreamClientConfig {
    /// Build client configuration, resolving credentials
    pub fn from_config(config: &StreamConfig) -> Result<Self, StreamError> {
        Ok(Self {
            api_base_url: config.api_base_url.clone(),
            playback_base_url: config.playback_base_url.clone(),
            credentials: StreamCredentials::from_config(config)?,
            timeout: Some(Duration::from_secs(config.request_timeout_seconds)),
        })
    }
}

/// Body of a one-time upload URL request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectUploadRequest {
    pub max_duration_seconds: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_origins: Vec<String>,
    #[serde(rename = "requireSignedURLs")]
    pub require_signed_urls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<VideoMeta>,
}

/// User metadata attached to a video
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMeta {
    pub name: String,
}

/// One-time upload URL plus the identifier it will produce
#[derive(Debug, Clone)]
pub struct DirectUploadTicket {
    pub upload_url: String,
    pub stream_id: StreamId,
}

#[derive(Debug, Deserialize)]
struct DirectUploadResult {
    #[serde(rename = "uploadURL")]
    upload_url: String,
    uid: String,
}

/// Headers for a resumable session creation call
#[derive(Debug, Clone)]
pub struct ResumableUploadRequest {
    /// Total byte count (`Upload-Length`)
    pub upload_length: u64,
    /// Pre-encoded `Upload-Metadata` header value
    pub upload_metadata: String,
}

/// Newly created resumable resource
#[derive(Debug, Clone)]
pub struct ResumableSession {
    /// Absolute resource URL (from the `Location` header)
    pub location: String,
    /// Status code of the creation response
    pub status: u16,
}

/// Processing state reported by the platform
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub pct_complete: Option<String>,
    #[serde(default)]
    pub error_reason_code: Option<String>,
    #[serde(default)]
    pub error_reason_text: Option<String>,
}

/// Video details from `GET /stream/{uid}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetails {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub status: ProcessingStatus,
    /// Seconds; the platform reports -1 while unknown
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default)]
    pub uploaded: Option<String>,
    #[serde(default)]
    pub ready_to_stream: Option<bool>,
}

/// Downloadable asset state
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadInfo {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub percent_complete: Option<f64>,
}

impl DownloadInfo {
    /// Direct download URL, once the asset is ready
    pub fn ready_url(&self) -> Option<&str> {
        if self.status == "ready" {
            self.url.as_deref().filter(|u| !u.is_empty())
        } else {
            None
        }
    }
}

/// Result of the downloads endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadsResult {
    #[serde(default)]
    pub default: Option<DownloadInfo>,
}

/// Result of a remote delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The platform answered 404
    AlreadyAbsent,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: String,
}

impl ApiMessage {
    fn render(&self) -> String {
        match self.code {
            Some(code) => format!("{}: {}", code, self.message),
            None => self.message.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    errors: Vec<ApiMessage>,
    #[serde(default)]
    messages: Vec<ApiMessage>,
}

/// Collect human-readable messages from an error response body
fn error_messages(status: StatusCode, body: &str) -> Vec<String> {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        let messages: Vec<String> = envelope
            .errors
            .iter()
            .chain(envelope.messages.iter())
            .map(ApiMessage::render)
            .filter(|m| !m.is_empty())
            .collect();
        if !messages.is_empty() {
            return messages;
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        vec![status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()]
    } else {
        vec![trimmed.chars().take(MAX_ERROR_BODY).collect()]
    }
}

/// Stream API client
pub struct StreamClient {
    config: StreamClientConfig,
    http: reqwest::Client,
    account_url: String,
}

impl StreamClient {
    /// Create a new client
    pub fn new(config: StreamClientConfig) -> Result<Self, StreamError> {
        if config.credentials.account_id().is_empty() || config.credentials.api_token().is_empty()
        {
            return Err(StreamError::Configuration(
                "account id and API token are required".into(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .map_err(|e| StreamError::Configuration(e.to_string()))?;

        let account_url = format!(
            "{}/accounts/{}",
            config.api_base_url.trim_end_matches('/'),
            config.credentials.account_id()
        );

        Ok(Self {
            config,
            http,
            account_url,
        })
    }

    /// Build a client from the `stream` configuration section
    pub fn from_config(config: &StreamConfig) -> Result<Self, StreamError> {
        Self::new(StreamClientConfig::from_config(config)?)
    }

    /// Account-scoped API root
    pub fn account_url(&self) -> &str {
        &self.account_url
    }

    /// Public playback URL for a video
    pub fn view_url(&self, id: &StreamId) -> String {
        format!(
            "{}/{}",
            self.config.playback_base_url.trim_end_matches('/'),
            id
        )
    }

    fn video_url(&self, id: &StreamId) -> String {
        format!("{}/stream/{}", self.account_url, id)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(self.config.credentials.api_token())
    }

    /// Send a request and unwrap the JSON envelope
    async fn send_envelope<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, StreamError> {
        let response = request.send().await?;
        let status = response.status();
        tracing::Span::current().record("http.status_code", status.as_u16());
        let body = response.text().await?;

        if !status.is_success() {
            return Err(StreamError::Upstream {
                status: status.as_u16(),
                messages: error_messages(status, &body),
            });
        }

        let envelope: ApiEnvelope<T> = serde_json::from_str(&body).map_err(|e| {
            StreamError::upstream(status, format!("malformed response body: {}", e))
        })?;

        if !envelope.success {
            let mut messages: Vec<String> = envelope.errors.iter().map(ApiMessage::render).collect();
            if messages.is_empty() {
                messages.push("request was not successful".into());
            }
            return Err(StreamError::Upstream {
                status: status.as_u16(),
                messages,
            });
        }

        envelope
            .result
            .ok_or_else(|| StreamError::upstream(status, "response envelope has no result"))
    }

    /// Request a one-time upload URL
    #[tracing::instrument(
        name = "stream.direct_upload",
        skip(self, request),
        fields(
            http.method = "POST",
            stream.max_duration_seconds = request.max_duration_seconds,
            stream.uid = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    pub async fn create_direct_upload(
        &self,
        request: &DirectUploadRequest,
    ) -> Result<DirectUploadTicket, StreamError> {
        let url = format!("{}/stream/direct_upload", self.account_url);
        let result: DirectUploadResult = self
            .send_envelope(self.authorized(self.http.post(url)).json(request))
            .await?;

        let stream_id = StreamId::parse(&result.uid).map_err(|e| StreamError::Upstream {
            status: StatusCode::OK.as_u16(),
            messages: vec![e.to_string()],
        })?;
        tracing::Span::current().record("stream.uid", stream_id.as_str());

        tracing::info!(uid = %stream_id, "One-time upload URL issued");

        Ok(DirectUploadTicket {
            upload_url: result.upload_url,
            stream_id,
        })
    }

    /// Create a resumable upload resource
    ///
    /// The resource URL comes back in the `Location` header; relative
    /// locations are resolved against the API base URL.
    #[tracing::instrument(
        name = "stream.create_resumable",
        skip(self, request),
        fields(
            http.method = "POST",
            upload.length = request.upload_length,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    pub async fn create_resumable_upload(
        &self,
        request: &ResumableUploadRequest,
    ) -> Result<ResumableSession, StreamError> {
        let url = format!("{}/stream?direct_user=true", self.account_url);
        let response = self
            .authorized(self.http.post(&url))
            .header("Tus-Resumable", TUS_VERSION)
            .header("Upload-Length", request.upload_length.to_string())
            .header("Upload-Metadata", &request.upload_metadata)
            .send()
            .await?;

        let status = response.status();
        tracing::Span::current().record("http.status_code", status.as_u16());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::Upstream {
                status: status.as_u16(),
                messages: error_messages(status, &body),
            });
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| StreamError::upstream(status, "missing Location header"))?;

        let location = match reqwest::Url::parse(&location) {
            Ok(absolute) => absolute.to_string(),
            Err(_) => reqwest::Url::parse(&self.account_url)
                .and_then(|base| base.join(&location))
                .map(|u| u.to_string())
                .map_err(|e| {
                    StreamError::upstream(status, format!("invalid Location header: {}", e))
                })?,
        };

        tracing::info!(location = %location, "Resumable upload resource created");

        Ok(ResumableSession {
            location,
            status: status.as_u16(),
        })
    }

    /// Replace the origin allowlist of an existing video
    #[tracing::instrument(
        name = "stream.update_allowed_origins",
        skip(self, origins),
        fields(
            http.method = "POST",
            stream.uid = %id,
            origins.count = origins.len(),
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    pub async fn update_allowed_origins(
        &self,
        id: &StreamId,
        origins: &[String],
    ) -> Result<(), StreamError> {
        let body = serde_json::json!({
            "uid": id.as_str(),
            "allowedOrigins": origins,
        });
        let _: serde_json::Value = self
            .send_envelope(self.authorized(self.http.post(self.video_url(id))).json(&body))
            .await?;
        Ok(())
    }

    /// Fetch the current details of a video
    #[tracing::instrument(
        name = "stream.get_video",
        skip(self),
        fields(
            http.method = "GET",
            stream.uid = %id,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    pub async fn get_video(&self, id: &StreamId) -> Result<VideoDetails, StreamError> {
        self.send_envelope(self.authorized(self.http.get(self.video_url(id))))
            .await
    }

    /// Delete a video
    ///
    /// A 404 answer is reported as [`DeleteOutcome::AlreadyAbsent`].
    #[tracing::instrument(
        name = "stream.delete_video",
        skip(self),
        fields(
            http.method = "DELETE",
            stream.uid = %id,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    pub async fn delete_video(&self, id: &StreamId) -> Result<DeleteOutcome, StreamError> {
        let response = self
            .authorized(self.http.delete(self.video_url(id)))
            .send()
            .await?;
        let status = response.status();
        tracing::Span::current().record("http.status_code", status.as_u16());

        if status.is_success() {
            return Ok(DeleteOutcome::Deleted);
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(DeleteOutcome::AlreadyAbsent);
        }

        let body = response.text().await.unwrap_or_default();
        Err(StreamError::Upstream {
            status: status.as_u16(),
            messages: error_messages(status, &body),
        })
    }

    /// Ask the platform to prepare a downloadable MP4
    #[tracing::instrument(
        name = "stream.create_downloads",
        skip(self),
        fields(
            http.method = "POST",
            stream.uid = %id,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    pub async fn create_downloads(&self, id: &StreamId) -> Result<DownloadsResult, StreamError> {
        let url = format!("{}/downloads", self.video_url(id));
        self.send_envelope(
            self.authorized(self.http.post(url))
                .json(&serde_json::json!({})),
        )
        .await
    }

    /// Fetch the state of the downloadable MP4
    #[tracing::instrument(
        name = "stream.get_downloads",
        skip(self),
        fields(
            http.method = "GET",
            stream.uid = %id,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    pub async fn get_downloads(&self, id: &StreamId) -> Result<DownloadsResult, StreamError> {
        let url = format!("{}/downloads", self.video_url(id));
        self.send_envelope(self.authorized(self.http.get(url))).await
    }
}
