//! Local video records
//!
//! A [`VideoRecord`] is created in `processing` when a transfer begins and is
//! updated once more when reconciliation observes a terminal state. Status
//! only ever moves `processing -> ready` or `processing -> error`.
//!
//! Persistence sits behind the [`RecordStore`] trait. [`MemoryRecordStore`]
//! keeps records in a concurrent map and is what the service runs with.
//! Writes are last-write-wins: a reconciler merge and a concurrent edit of
//! the same record are not isolated from each other.
//!
//! # Example
//!
//! ```
//! use stream_ingestr::store::{MemoryRecordStore, RecordPatch, RecordStore, VideoRecord, VideoStatus};
//! use stream_ingestr::stream::StreamId;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryRecordStore::new();
//! let id = StreamId::parse("ea95132c15732412d22c1476fa83f27a")?;
//! store
//!     .insert(VideoRecord::provisional(id.clone(), "videos", "https://watch.example.com/x"))
//!     .await?;
//!
//! let record = store
//!     .update(&id, RecordPatch::status(VideoStatus::Ready).with_size(1024))
//!     .await?;
//! assert_eq!(record.status, VideoStatus::Ready);
//! # Ok(())
//! # }
//! ```

use crate::stream::StreamId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Record store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(StreamId),

    #[error("Record already exists: {0}")]
    AlreadyExists(StreamId),

    #[error("Record status is terminal ({current}); cannot change to {requested}")]
    TerminalStatus {
        current: VideoStatus,
        requested: VideoStatus,
    },

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Processing status of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Processing,
    Ready,
    Error,
}

impl VideoStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, VideoStatus::Processing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Processing => "processing",
            VideoStatus::Ready => "ready",
            VideoStatus::Error => "error",
        }
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local record of an ingested video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub stream_id: StreamId,
    pub collection: String,
    #[serde(rename = "viewURL")]
    pub view_url: String,
    pub status: VideoStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, rename = "thumbnailURL", skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, rename = "downloadURL", skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoRecord {
    /// New record in `processing`
    pub fn provisional(
        stream_id: StreamId,
        collection: impl Into<String>,
        view_url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            stream_id,
            collection: collection.into(),
            view_url: view_url.into(),
            status: VideoStatus::Processing,
            size_bytes: None,
            duration_seconds: None,
            thumbnail_url: None,
            download_url: None,
            error_reason: None,
            uploaded_at: now,
            updated_at: now,
        }
    }
}

/// Partial update merged into a record
///
/// Only fields that are `Some` are written; everything else keeps its
/// stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub status: Option<VideoStatus>,
    pub size_bytes: Option<u64>,
    pub duration_seconds: Option<f64>,
    pub thumbnail_url: Option<String>,
    pub download_url: Option<String>,
    pub error_reason: Option<String>,
}

impl RecordPatch {
    /// Patch that only sets the status
    pub fn status(status: VideoStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = Some(size_bytes);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge into `record`, enforcing monotonic status
    pub fn apply(&self, record: &mut VideoRecord) -> Result<(), StoreError> {
        if let Some(requested) = self.status {
            if record.status.is_terminal() && requested != record.status {
                return Err(StoreError::TerminalStatus {
                    current: record.status,
                    requested,
                });
            }
            record.status = requested;
        }
        if let Some(size) = self.size_bytes {
            record.size_bytes = Some(size);
        }
        if let Some(duration) = self.duration_seconds {
            record.duration_seconds = Some(duration);
        }
        if let Some(thumbnail) = &self.thumbnail_url {
            record.thumbnail_url = Some(thumbnail.clone());
        }
        if let Some(download) = &self.download_url {
            record.download_url = Some(download.clone());
        }
        if let Some(reason) = &self.error_reason {
            record.error_reason = Some(reason.clone());
        }
        record.updated_at = Utc::now();
        Ok(())
    }
}

/// Key-addressable record storage
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new record
    async fn insert(&self, record: VideoRecord) -> Result<(), StoreError>;

    /// Fetch a record
    async fn get(&self, id: &StreamId) -> Result<Option<VideoRecord>, StoreError>;

    /// Merge a patch into an existing record and return the result
    async fn update(&self, id: &StreamId, patch: RecordPatch) -> Result<VideoRecord, StoreError>;

    /// Remove a record, returning it if it existed
    async fn remove(&self, id: &StreamId) -> Result<Option<VideoRecord>, StoreError>;

    /// All records
    async fn list(&self) -> Result<Vec<VideoRecord>, StoreError>;
}

/// In-memory record store
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: DashMap<StreamId, VideoRecord>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, record: VideoRecord) -> Result<(), StoreError> {
        match self.records.entry(record.stream_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(record.stream_id)),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &StreamId) -> Result<Option<VideoRecord>, StoreError> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn update(&self, id: &StreamId, patch: RecordPatch) -> Result<VideoRecord, StoreError> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        // Apply to a copy so a rejected patch leaves the record untouched
        let mut updated = entry.value().clone();
        patch.apply(&mut updated)?;
        *entry.value_mut() = updated.clone();
        Ok(updated)
    }

    async fn remove(&self, id: &StreamId) -> Result<Option<VideoRecord>, StoreError> {
        Ok(self.records.remove(id).map(|(_, record)| record))
    }

    async fn list(&self) -> Result<Vec<VideoRecord>, StoreError> {
        let mut records: Vec<VideoRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        Ok(records)
    }
}
