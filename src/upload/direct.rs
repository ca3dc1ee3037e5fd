//! Single-shot transfer to a one-time upload URL
//!
//! The whole payload goes out as one `multipart/form-data` request with a
//! `file` field. Progress is reported while the request body streams, in
//! steps of `progress_step` bytes. There is no automatic retry: a one-time
//! URL may already be consumed after a failed attempt, so the caller decides
//! whether to request a fresh target.

use super::progress::ProgressReporter;
use super::{TransferClient, UploadError, UploadMode, UploadPayload, UploadTarget};
use crate::config::UploadConfig;
use crate::metrics;
use crate::stream::StreamId;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use std::time::Instant;

/// Multipart field carrying the file
pub const FILE_FIELD: &str = "file";

/// Default progress granularity
const DEFAULT_PROGRESS_STEP: usize = 1024 * 1024;

/// Longest response body excerpt carried into an error
const MAX_ERROR_BODY: usize = 512;

/// Direct transfer client
pub struct DirectTransferClient {
    http: reqwest::Client,
    progress_step: usize,
}

impl DirectTransferClient {
    pub fn new(progress_step: usize) -> Result<Self, UploadError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| UploadError::Configuration(e.to_string()))?;
        Ok(Self {
            http,
            progress_step: if progress_step == 0 {
                DEFAULT_PROGRESS_STEP
            } else {
                progress_step
            },
        })
    }

    pub fn from_config(config: &UploadConfig) -> Result<Self, UploadError> {
        Self::new(config.progress_step_bytes)
    }

    /// Split the payload into body frames, reporting as each frame is pulled
    fn body_stream(
        &self,
        bytes: &Bytes,
        progress: ProgressReporter,
    ) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync + 'static {
        let total = bytes.len() as u64;
        let step = self.progress_step;
        let frames: Vec<Bytes> = (0..bytes.len())
            .step_by(step)
            .map(|start| bytes.slice(start..(start + step).min(bytes.len())))
            .collect();

        let mut sent = 0u64;
        futures::stream::iter(frames.into_iter().map(move |frame| {
            sent += frame.len() as u64;
            progress.report(sent, total);
            Ok(frame)
        }))
    }

    async fn send(
        &self,
        upload_url: &str,
        payload: &UploadPayload,
        progress: ProgressReporter,
    ) -> Result<(), UploadError> {
        let body = reqwest::Body::wrap_stream(self.body_stream(&payload.bytes, progress));
        let part = Part::stream_with_length(body, payload.len())
            .file_name(payload.filename.clone())
            .mime_str(&payload.mime_type)
            .map_err(|e| {
                UploadError::Configuration(format!(
                    "invalid mime type '{}': {}",
                    payload.mime_type, e
                ))
            })?;
        let form = Form::new().part(FILE_FIELD, part);

        let response = self.http.post(upload_url).multipart(form).send().await?;
        let status = response.status();
        tracing::Span::current().record("http.status_code", status.as_u16());

        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = match body.trim() {
            "" => status
                .canonical_reason()
                .unwrap_or("upload rejected")
                .to_string(),
            text => text.chars().take(MAX_ERROR_BODY).collect(),
        };
        Err(UploadError::Upstream {
            status: status.as_u16(),
            messages: vec![message],
        })
    }
}

#[async_trait]
impl TransferClient for DirectTransferClient {
    fn mode(&self) -> UploadMode {
        UploadMode::Direct
    }

    #[tracing::instrument(
        name = "upload.direct",
        skip(self, target, payload, progress),
        fields(
            stream.uid = %target.stream_id(),
            upload.size = payload.len(),
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn transfer(
        &self,
        target: &UploadTarget,
        payload: &UploadPayload,
        progress: ProgressReporter,
    ) -> Result<StreamId, UploadError> {
        let UploadTarget::Direct {
            upload_url,
            stream_id,
        } = target
        else {
            progress.finish();
            return Err(UploadError::Configuration(
                "direct transfer requires a one-time upload URL target".into(),
            ));
        };

        let start = Instant::now();
        let result = self.send(upload_url, payload, progress.clone()).await;
        progress.finish();

        match result {
            Ok(()) => {
                metrics::record_transfer_success(
                    UploadMode::Direct.as_str(),
                    payload.len(),
                    start.elapsed().as_secs_f64(),
                );
                tracing::info!(uid = %stream_id, bytes = payload.len(), "Direct transfer complete");
                Ok(stream_id.clone())
            }
            Err(e) => {
                metrics::record_transfer_failure(UploadMode::Direct.as_str());
                Err(e)
            }
        }
    }
}
