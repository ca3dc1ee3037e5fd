//! Remote deletion
//!
//! The remote video is deleted only when its local record is permanently
//! removed. Replacing or editing a record never touches the remote side,
//! so an identifier is never lost to a partial update.
//!
//! A `404` from the platform means the video is already gone and counts as
//! success, which makes deletion idempotent.

use crate::metrics;
use crate::reconcile::ReconcileScheduler;
use crate::store::{RecordStore, StoreError, VideoRecord};
use crate::stream::{DeleteOutcome, StreamClient, StreamError, StreamId};
use std::sync::Arc;
use thiserror::Error;

/// Deletion errors
#[derive(Error, Debug)]
pub enum DeletionError {
    #[error("Record not found: {0}")]
    NotFound(StreamId),

    #[error("Upstream API error (status {status}): {}", .messages.join("; "))]
    Upstream { status: u16, messages: Vec<String> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),
}

impl From<StreamError> for DeletionError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Upstream { status, messages } => {
                DeletionError::Upstream { status, messages }
            }
            StreamError::Network(err) => DeletionError::Network(err.to_string()),
            StreamError::Configuration(msg) => DeletionError::Configuration(msg),
        }
    }
}

/// Deletes remote videos on permanent record removal
pub struct DeletionGuard {
    client: Arc<StreamClient>,
    store: Arc<dyn RecordStore>,
    scheduler: Option<Arc<ReconcileScheduler>>,
}

impl DeletionGuard {
    pub fn new(client: Arc<StreamClient>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            client,
            store,
            scheduler: None,
        }
    }

    /// Cancel a record's poller when the record is removed
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<ReconcileScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Delete the remote video
    #[tracing::instrument(name = "deletion.remote", skip(self, id), fields(stream.uid = %id), err)]
    pub async fn delete_remote(&self, id: &StreamId) -> Result<DeleteOutcome, DeletionError> {
        match self.client.delete_video(id).await {
            Ok(outcome) => {
                let label = match outcome {
                    DeleteOutcome::Deleted => "deleted",
                    DeleteOutcome::AlreadyAbsent => "already_absent",
                };
                metrics::record_remote_delete(label);
                tracing::info!(uid = %id, result = label, "Remote video deleted");
                Ok(outcome)
            }
            Err(e) => {
                metrics::record_remote_delete("failure");
                metrics::record_error("remote_delete");
                Err(e.into())
            }
        }
    }

    /// Permanently remove a record and its remote video
    ///
    /// The remote delete runs first. If it fails the local record and its
    /// poller are left as they were, so the removal can be retried.
    pub async fn remove_record(&self, id: &StreamId) -> Result<VideoRecord, DeletionError> {
        if self.store.get(id).await?.is_none() {
            return Err(DeletionError::NotFound(id.clone()));
        }

        self.delete_remote(id).await?;

        if let Some(scheduler) = &self.scheduler {
            scheduler.cancel(id);
        }

        self.store
            .remove(id)
            .await?
            .ok_or_else(|| DeletionError::NotFound(id.clone()))
    }
}
