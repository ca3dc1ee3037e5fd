//! Status reconciliation
//!
//! After a transfer completes the platform still has to process the video.
//! [`Reconciler::run`] polls the video's status on a fixed interval until a
//! terminal state shows up or the attempt budget runs out, then merges the
//! result into the local record with a single write.
//!
//! ```text
//! Polling ──ready──▶ Completed(ready)   (one merge-write)
//!    │    ──error──▶ Completed(error)   (one merge-write)
//!    │    ──budget─▶ GaveUp             (no write, record stays processing)
//!    └────cancel───▶ Cancelled          (no write)
//! ```
//!
//! Every tick consumes one attempt, including ticks whose status query or
//! record write failed. Ticks never overlap: each query and write finishes
//! before the next sleep starts.

pub mod scheduler;

pub use scheduler::{ReconcileScheduler, ReconcileTicket};

use crate::config::ReconcileConfig;
use crate::metrics;
use crate::store::{RecordPatch, RecordStore, StoreError, VideoStatus};
use crate::stream::{StreamClient, StreamId, VideoDetails};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Map the platform's state vocabulary onto the local status
///
/// Only `ready` and `error` are terminal; every other value, known
/// (`queued`, `inprogress`, `downloading`, ...) or not, is `processing`.
///
/// ```
/// use stream_ingestr::reconcile::map_remote_state;
/// use stream_ingestr::store::VideoStatus;
///
/// assert_eq!(map_remote_state("ready"), VideoStatus::Ready);
/// assert_eq!(map_remote_state("inprogress"), VideoStatus::Processing);
/// assert_eq!(map_remote_state("something-new"), VideoStatus::Processing);
/// ```
pub fn map_remote_state(state: &str) -> VideoStatus {
    let state = state.trim();
    if state.eq_ignore_ascii_case("ready") {
        VideoStatus::Ready
    } else if state.eq_ignore_ascii_case("error") {
        VideoStatus::Error
    } else {
        VideoStatus::Processing
    }
}

/// Attempt bookkeeping for one in-flight record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollState {
    pub stream_id: StreamId,
    pub attempt: u32,
    pub attempt_limit: u32,
    pub interval: Duration,
}

impl PollState {
    pub fn new(stream_id: StreamId, attempt_limit: u32, interval: Duration) -> Self {
        Self {
            stream_id,
            attempt: 0,
            attempt_limit,
            interval,
        }
    }

    /// Consume one attempt; `false` once the budget is spent
    pub fn begin_attempt(&mut self) -> bool {
        if self.attempt >= self.attempt_limit {
            return false;
        }
        self.attempt += 1;
        true
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.attempt_limit
    }

    pub fn remaining(&self) -> u32 {
        self.attempt_limit.saturating_sub(self.attempt)
    }
}

/// How a reconciliation ended
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Terminal status observed and written
    Completed { status: VideoStatus, attempts: u32 },
    /// Budget exhausted while still processing; nothing written
    GaveUp { attempts: u32 },
    /// Stopped by cancellation; nothing written
    Cancelled { attempts: u32 },
    /// Record vanished or was already terminal; nothing written
    Abandoned { reason: String },
}

impl ReconcileOutcome {
    /// Short label for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Completed {
                status: VideoStatus::Ready,
                ..
            } => "ready",
            ReconcileOutcome::Completed {
                status: VideoStatus::Error,
                ..
            } => "error",
            ReconcileOutcome::Completed { .. } => "completed",
            ReconcileOutcome::GaveUp { .. } => "gave_up",
            ReconcileOutcome::Cancelled { .. } => "cancelled",
            ReconcileOutcome::Abandoned { .. } => "abandoned",
        }
    }

    /// Terminal status, if one was written
    pub fn status(&self) -> Option<VideoStatus> {
        match self {
            ReconcileOutcome::Completed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileOutcome::Completed { status, attempts } => {
                write!(f, "completed with status {} after {} attempts", status, attempts)
            }
            ReconcileOutcome::GaveUp { attempts } => {
                write!(f, "gave up after {} attempts", attempts)
            }
            ReconcileOutcome::Cancelled { attempts } => {
                write!(f, "cancelled after {} attempts", attempts)
            }
            ReconcileOutcome::Abandoned { reason } => write!(f, "abandoned: {}", reason),
        }
    }
}

/// One record to reconcile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileJob {
    pub stream_id: StreamId,
    /// Fold a direct download URL into the ready write
    pub prepare_downloads: bool,
}

impl ReconcileJob {
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            prepare_downloads: false,
        }
    }

    #[must_use]
    pub fn with_downloads(mut self, prepare_downloads: bool) -> Self {
        self.prepare_downloads = prepare_downloads;
        self
    }
}

/// Polls the platform and merges the terminal state into the store
pub struct Reconciler {
    client: Arc<StreamClient>,
    store: Arc<dyn RecordStore>,
    config: ReconcileConfig,
}

/// Cancellation observed mid-wait
struct Interrupted;

impl Reconciler {
    pub fn new(
        client: Arc<StreamClient>,
        store: Arc<dyn RecordStore>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Poll until terminal, exhausted or cancelled
    #[tracing::instrument(
        name = "reconcile.run",
        skip(self, job, cancel),
        fields(
            stream.uid = %job.stream_id,
            reconcile.max_attempts = self.config.max_attempts,
            reconcile.outcome = tracing::field::Empty
        )
    )]
    pub async fn run(&self, job: &ReconcileJob, cancel: CancellationToken) -> ReconcileOutcome {
        let outcome = self.poll(job, &cancel).await;

        tracing::Span::current().record("reconcile.outcome", outcome.label());
        metrics::record_reconcile_outcome(outcome.label());
        match &outcome {
            ReconcileOutcome::GaveUp { attempts } => {
                metrics::record_error("polling_budget_exhausted");
                tracing::warn!(
                    uid = %job.stream_id,
                    attempts,
                    "Polling budget exhausted; record left in processing"
                );
            }
            ReconcileOutcome::Abandoned { reason } => {
                tracing::info!(uid = %job.stream_id, reason = %reason, "Reconciliation abandoned");
            }
            other => {
                tracing::info!(uid = %job.stream_id, outcome = %other, "Reconciliation finished");
            }
        }
        outcome
    }

    async fn poll(&self, job: &ReconcileJob, cancel: &CancellationToken) -> ReconcileOutcome {
        let id = &job.stream_id;
        let mut state = PollState::new(
            id.clone(),
            self.config.max_attempts,
            self.config.poll_interval(),
        );

        while state.begin_attempt() {
            if self.wait(state.interval, cancel).await.is_err() {
                return ReconcileOutcome::Cancelled {
                    attempts: state.attempt - 1,
                };
            }

            let details = tokio::select! {
                _ = cancel.cancelled() => {
                    return ReconcileOutcome::Cancelled { attempts: state.attempt };
                }
                result = self.client.get_video(id) => result,
            };

            let details = match details {
                Ok(details) => details,
                Err(e) => {
                    metrics::record_reconcile_poll("query_failed");
                    tracing::warn!(
                        uid = %id,
                        attempt = state.attempt,
                        error = %e,
                        "Status query failed"
                    );
                    continue;
                }
            };

            let status = map_remote_state(&details.status.state);
            metrics::record_reconcile_poll(status.as_str());
            tracing::debug!(
                uid = %id,
                attempt = state.attempt,
                remote_state = %details.status.state,
                "Status polled"
            );

            if !status.is_terminal() {
                continue;
            }

            let download_url = if status == VideoStatus::Ready && job.prepare_downloads {
                match self.await_download(id, cancel).await {
                    Ok(url) => url,
                    Err(Interrupted) => {
                        return ReconcileOutcome::Cancelled {
                            attempts: state.attempt,
                        }
                    }
                }
            } else {
                None
            };

            let patch = terminal_patch(status, &details, download_url);
            match self.merge(id, patch).await {
                Ok(()) => {
                    return ReconcileOutcome::Completed {
                        status,
                        attempts: state.attempt,
                    }
                }
                Err(MergeError::Abandon(reason)) => return ReconcileOutcome::Abandoned { reason },
                Err(MergeError::Retry(e)) => {
                    metrics::record_reconcile_poll("write_failed");
                    tracing::warn!(
                        uid = %id,
                        attempt = state.attempt,
                        error = %e,
                        "Record write failed; retrying on next tick"
                    );
                }
            }
        }

        ReconcileOutcome::GaveUp {
            attempts: state.attempt,
        }
    }

    async fn wait(&self, interval: Duration, cancel: &CancellationToken) -> Result<(), Interrupted> {
        tokio::select! {
            _ = cancel.cancelled() => Err(Interrupted),
            _ = tokio::time::sleep(interval) => Ok(()),
        }
    }

    /// The single write of a reconciliation
    async fn merge(&self, id: &StreamId, patch: RecordPatch) -> Result<(), MergeError> {
        match self.store.get(id).await {
            Ok(None) => return Err(MergeError::Abandon("record no longer exists".into())),
            Ok(Some(record)) if record.status.is_terminal() => {
                return Err(MergeError::Abandon(format!(
                    "record is already {}",
                    record.status
                )))
            }
            Ok(Some(_)) => {}
            Err(e) => return Err(MergeError::Retry(e)),
        }

        match self.store.update(id, patch).await {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound(_)) => {
                Err(MergeError::Abandon("record no longer exists".into()))
            }
            Err(e @ StoreError::TerminalStatus { .. }) => Err(MergeError::Abandon(e.to_string())),
            Err(e) => Err(MergeError::Retry(e)),
        }
    }

    /// Request a downloadable asset and poll until its URL is ready
    ///
    /// Uses its own budget of the same size and interval. Failure or
    /// exhaustion yields `None`; the terminal status is still written.
    #[tracing::instrument(name = "reconcile.downloads", skip(self, id, cancel), fields(stream.uid = %id))]
    async fn await_download(
        &self,
        id: &StreamId,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, Interrupted> {
        let created = tokio::select! {
            _ = cancel.cancelled() => return Err(Interrupted),
            result = self.client.create_downloads(id) => result,
        };
        match created {
            Ok(result) => {
                if let Some(url) = result.default.as_ref().and_then(|d| d.ready_url()) {
                    return Ok(Some(url.to_string()));
                }
            }
            Err(e) => {
                tracing::warn!(uid = %id, error = %e, "Download preparation request failed");
                return Ok(None);
            }
        }

        let mut state = PollState::new(
            id.clone(),
            self.config.max_attempts,
            self.config.poll_interval(),
        );
        while state.begin_attempt() {
            self.wait(state.interval, cancel).await?;

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(Interrupted),
                result = self.client.get_downloads(id) => result,
            };
            match result {
                Ok(result) => match result.default {
                    Some(info) if info.status == "error" => {
                        tracing::warn!(uid = %id, "Download preparation failed remotely");
                        return Ok(None);
                    }
                    Some(info) => {
                        if let Some(url) = info.ready_url() {
                            return Ok(Some(url.to_string()));
                        }
                    }
                    None => {}
                },
                Err(e) => {
                    tracing::warn!(uid = %id, attempt = state.attempt, error = %e, "Download status query failed");
                }
            }
        }

        tracing::warn!(uid = %id, attempts = state.attempt, "Download URL not ready within budget");
        Ok(None)
    }
}

enum MergeError {
    /// Stop without writing
    Abandon(String),
    /// Try again on the next tick
    Retry(StoreError),
}

/// Build the merge-write for a terminal observation
///
/// `error` carries only the status and the platform's reason text. `ready`
/// carries duration (negative means unknown), size, thumbnail and the
/// optional download URL.
pub fn terminal_patch(
    status: VideoStatus,
    details: &VideoDetails,
    download_url: Option<String>,
) -> RecordPatch {
    match status {
        VideoStatus::Error => RecordPatch {
            status: Some(VideoStatus::Error),
            error_reason: details
                .status
                .error_reason_text
                .clone()
                .filter(|r| !r.is_empty()),
            ..RecordPatch::default()
        },
        _ => RecordPatch {
            status: Some(status),
            duration_seconds: details.duration.filter(|d| *d >= 0.0),
            size_bytes: details.size,
            thumbnail_url: details.thumbnail.clone().filter(|t| !t.is_empty()),
            download_url,
            ..RecordPatch::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::ProcessingStatus;

    #[test]
    fn test_map_remote_state_is_total() {
        assert_eq!(map_remote_state("queued"), VideoStatus::Processing);
        assert_eq!(map_remote_state("inprogress"), VideoStatus::Processing);
        assert_eq!(map_remote_state("pendingupload"), VideoStatus::Processing);
        assert_eq!(map_remote_state("ready"), VideoStatus::Ready);
        assert_eq!(map_remote_state(" READY "), VideoStatus::Ready);
        assert_eq!(map_remote_state("error"), VideoStatus::Error);
        assert_eq!(map_remote_state(""), VideoStatus::Processing);
        assert_eq!(map_remote_state("ready-ish"), VideoStatus::Processing);
    }

    #[test]
    fn test_poll_state_budget() {
        let id = StreamId::parse("ea95132c15732412d22c1476fa83f27a").unwrap();
        let mut state = PollState::new(id, 3, Duration::from_millis(10));
        assert_eq!(state.remaining(), 3);
        assert!(state.begin_attempt());
        assert!(state.begin_attempt());
        assert!(state.begin_attempt());
        assert!(state.is_exhausted());
        assert!(!state.begin_attempt());
        assert_eq!(state.attempt, 3);
    }

    fn details(state: &str) -> VideoDetails {
        VideoDetails {
            uid: None,
            status: ProcessingStatus {
                state: state.into(),
                pct_complete: None,
                error_reason_code: Some("ERR_DURATION_EXCEED_CONSTRAINT".into()),
                error_reason_text: Some("Duration exceeds limit".into()),
            },
            duration: Some(-1.0),
            size: Some(2048),
            thumbnail: Some("https://thumb".into()),
            preview: None,
            uploaded: None,
            ready_to_stream: None,
        }
    }

    #[test]
    fn test_error_patch_omits_media_fields() {
        let patch = terminal_patch(VideoStatus::Error, &details("error"), None);
        assert_eq!(patch.status, Some(VideoStatus::Error));
        assert_eq!(patch.error_reason.as_deref(), Some("Duration exceeds limit"));
        assert_eq!(patch.size_bytes, None);
        assert_eq!(patch.duration_seconds, None);
        assert_eq!(patch.thumbnail_url, None);
    }

    #[test]
    fn test_ready_patch_drops_unknown_duration() {
        let patch = terminal_patch(
            VideoStatus::Ready,
            &details("ready"),
            Some("https://dl".into()),
        );
        assert_eq!(patch.duration_seconds, None);
        assert_eq!(patch.size_bytes, Some(2048));
        assert_eq!(patch.thumbnail_url.as_deref(), Some("https://thumb"));
        assert_eq!(patch.download_url.as_deref(), Some("https://dl"));
        assert_eq!(patch.error_reason, None);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(
            ReconcileOutcome::Completed {
                status: VideoStatus::Ready,
                attempts: 3
            }
            .label(),
            "ready"
        );
        assert_eq!(ReconcileOutcome::GaveUp { attempts: 12 }.label(), "gave_up");
        assert_eq!(
            ReconcileOutcome::GaveUp { attempts: 12 }.status(),
            None
        );
    }
}
