//! Upload module
//!
//! Strategy selection, target issuance and the two transfer clients.
//!
//! Files at or below the resumable threshold go to a one-time upload URL in
//! a single request; larger files use the resumable chunked protocol.
//!
//! # Example
//!
//! ```
//! use stream_ingestr::upload::{decide, UploadMode};
//!
//! const MIB: u64 = 1024 * 1024;
//! assert_eq!(decide(50 * MIB, 200 * MIB), UploadMode::Direct);
//! assert_eq!(decide(200 * MIB, 200 * MIB), UploadMode::Direct);
//! assert_eq!(decide(300 * MIB, 200 * MIB), UploadMode::Resumable);
//! ```

use crate::store::StoreError;
use crate::stream::{StreamError, StreamId};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod direct;
pub mod issuer;
pub mod metadata;
pub mod origins;
pub mod progress;
pub mod resumable;

pub use direct::DirectTransferClient;
pub use issuer::TargetIssuer;
pub use progress::{progress_channel, ProgressReceiver, ProgressReporter, TransferProgress};
pub use resumable::ResumableTransferClient;

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not authorized to upload to collection '{collection}'")]
    Authorization { collection: String },

    #[error("Upstream API error (status {status}): {}", .messages.join("; "))]
    Upstream { status: u16, messages: Vec<String> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),
}

impl UploadError {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::Configuration(_) => "configuration",
            UploadError::Authorization { .. } => "authorization",
            UploadError::Upstream { .. } => "upstream",
            UploadError::Network(_) => "network",
            UploadError::Store(_) => "store",
        }
    }
}

impl From<StreamError> for UploadError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Configuration(msg) => UploadError::Configuration(msg),
            StreamError::Upstream { status, messages } => {
                UploadError::Upstream { status, messages }
            }
            StreamError::Network(err) => UploadError::Network(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        UploadError::Network(e.to_string())
    }
}

/// Upload strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// Single request to a one-time upload URL
    Direct,
    /// Offset-addressed chunked transfer
    Resumable,
}

impl UploadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadMode::Direct => "direct",
            UploadMode::Resumable => "resumable",
        }
    }
}

impl fmt::Display for UploadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadMode {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(UploadMode::Direct),
            "resumable" | "tus" => Ok(UploadMode::Resumable),
            other => Err(UploadError::Configuration(format!(
                "unknown upload mode '{}'",
                other
            ))),
        }
    }
}

/// Select the upload strategy for a file
///
/// Resumable iff `total_bytes > threshold_bytes`.
pub fn decide(total_bytes: u64, threshold_bytes: u64) -> UploadMode {
    if total_bytes > threshold_bytes {
        UploadMode::Resumable
    } else {
        UploadMode::Direct
    }
}

/// What the caller wants to upload. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadIntent {
    pub collection_key: String,
    pub filename: String,
    pub mime_type: String,
    pub total_bytes: u64,
    pub mode: UploadMode,
}

impl UploadIntent {
    /// Build an intent, selecting the mode from the size threshold
    pub fn new(
        collection_key: impl Into<String>,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        total_bytes: u64,
        threshold_bytes: u64,
    ) -> Self {
        Self {
            collection_key: collection_key.into(),
            filename: filename.into(),
            mime_type: mime_type.into(),
            total_bytes,
            mode: decide(total_bytes, threshold_bytes),
        }
    }

    /// Override the selected mode
    #[must_use]
    pub fn with_mode(mut self, mode: UploadMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Where the transfer client sends the bytes
///
/// Exactly one URL exists per target and it always matches the mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTarget {
    Direct {
        upload_url: String,
        stream_id: StreamId,
    },
    Resumable {
        resource_url: String,
        stream_id: StreamId,
    },
}

impl UploadTarget {
    pub fn mode(&self) -> UploadMode {
        match self {
            UploadTarget::Direct { .. } => UploadMode::Direct,
            UploadTarget::Resumable { .. } => UploadMode::Resumable,
        }
    }

    pub fn stream_id(&self) -> &StreamId {
        match self {
            UploadTarget::Direct { stream_id, .. } | UploadTarget::Resumable { stream_id, .. } => {
                stream_id
            }
        }
    }

    /// The one-time URL or resumable resource URL
    pub fn url(&self) -> &str {
        match self {
            UploadTarget::Direct { upload_url, .. } => upload_url,
            UploadTarget::Resumable { resource_url, .. } => resource_url,
        }
    }
}

/// File contents handed to a transfer client
#[derive(Debug, Clone)]
pub struct UploadPayload {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl UploadPayload {
    pub fn new(
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A client that moves a payload to an issued target
///
/// Progress goes to `progress`; the reporter is finished before the call
/// returns, so no progress event follows the returned result.
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Mode this client handles
    fn mode(&self) -> UploadMode;

    /// Transfer the payload, returning the remote identifier on success
    async fn transfer(
        &self,
        target: &UploadTarget,
        payload: &UploadPayload,
        progress: ProgressReporter,
    ) -> Result<StreamId, UploadError>;
}
