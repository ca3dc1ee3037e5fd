//! Resumable chunked transfer
//!
//! Client half of the offset-addressed resumable protocol (tus 1.0.0):
//!
//! - chunks of `chunk_size` bytes are sent one at a time with `PATCH`,
//!   always starting at the offset the server last acknowledged
//! - the server answers with the new `Upload-Offset`
//! - a chunk that fails transiently is retried after the next delay in the
//!   retry schedule; before each retry the offset is re-read with `HEAD` so
//!   bytes the server already received are never sent twice
//! - one progress event per acknowledgment, then exactly one terminal result
//!
//! Transport faults and `5xx`/`409`/`423`/`429` answers are retried. Any
//! other `4xx` answer, and an acknowledgment that is missing or moves the
//! offset backwards or past the sent range, ends the transfer immediately.

use super::progress::ProgressReporter;
use super::{TransferClient, UploadError, UploadMode, UploadPayload, UploadTarget};
use crate::config::UploadConfig;
use crate::metrics;
use crate::stream::{StreamId, TUS_VERSION};
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use std::time::{Duration, Instant};

/// Content type of a `PATCH` body
pub const OFFSET_CONTENT_TYPE: &str = "application/offset+octet-stream";

const HEADER_TUS_RESUMABLE: &str = "Tus-Resumable";
const HEADER_UPLOAD_OFFSET: &str = "Upload-Offset";

/// Why a single request failed
#[derive(Debug)]
enum Failure {
    /// Worth another attempt within the schedule
    Transient(UploadError),
    /// Ends the transfer
    Fatal(UploadError),
}

impl Failure {
    fn into_error(self) -> UploadError {
        match self {
            Failure::Transient(e) | Failure::Fatal(e) => e,
        }
    }

    fn cause(&self) -> &'static str {
        match self {
            Failure::Transient(UploadError::Network(_)) => "network",
            _ => "upstream",
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || matches!(
            status,
            StatusCode::CONFLICT | StatusCode::LOCKED | StatusCode::TOO_MANY_REQUESTS
        )
}

fn classify_transport(e: reqwest::Error) -> Failure {
    if e.is_builder() {
        Failure::Fatal(UploadError::Configuration(e.to_string()))
    } else {
        Failure::Transient(UploadError::Network(e.to_string()))
    }
}

async fn classify_status(response: Response) -> Failure {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = match body.trim() {
        "" => status
            .canonical_reason()
            .unwrap_or("request rejected")
            .to_string(),
        text => text.to_string(),
    };
    let error = UploadError::Upstream {
        status: status.as_u16(),
        messages: vec![message],
    };
    if is_retryable_status(status) {
        Failure::Transient(error)
    } else {
        Failure::Fatal(error)
    }
}

fn protocol_violation(status: StatusCode, message: String) -> Failure {
    Failure::Fatal(UploadError::Upstream {
        status: status.as_u16(),
        messages: vec![message],
    })
}

fn read_offset(response: &Response) -> Result<u64, Failure> {
    response
        .headers()
        .get(HEADER_UPLOAD_OFFSET)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| {
            protocol_violation(
                response.status(),
                "response is missing a valid Upload-Offset header".into(),
            )
        })
}

/// Resumable transfer client
pub struct ResumableTransferClient {
    http: reqwest::Client,
    chunk_size: usize,
    retry_delays: Vec<Duration>,
}

impl ResumableTransferClient {
    /// Create a client
    ///
    /// `retry_delays[k]` is waited before attempt `k` of a chunk; attempt 0
    /// is never delayed. The schedule length is the attempt count per chunk.
    pub fn new(chunk_size: usize, retry_delays: Vec<Duration>) -> Result<Self, UploadError> {
        if chunk_size == 0 {
            return Err(UploadError::Configuration(
                "chunk size must be greater than zero".into(),
            ));
        }
        if retry_delays.is_empty() {
            return Err(UploadError::Configuration(
                "retry schedule must contain at least one entry".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| UploadError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            chunk_size,
            retry_delays,
        })
    }

    pub fn from_config(config: &UploadConfig) -> Result<Self, UploadError> {
        Self::new(config.chunk_size_bytes, config.retry_delays())
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Attempts available for each chunk
    pub fn max_attempts(&self) -> usize {
        self.retry_delays.len()
    }

    /// Ask the server for its current offset
    #[tracing::instrument(name = "upload.resumable.offset", skip(self), err(Debug))]
    async fn query_offset(&self, resource_url: &str) -> Result<u64, Failure> {
        let response = self
            .http
            .head(resource_url)
            .header(HEADER_TUS_RESUMABLE, TUS_VERSION)
            .send()
            .await
            .map_err(classify_transport)?;

        if !response.status().is_success() {
            return Err(classify_status(response).await);
        }
        read_offset(&response)
    }

    /// Send `payload[offset..end]`, returning the acknowledged offset
    #[tracing::instrument(
        name = "upload.resumable.chunk",
        skip(self, payload),
        fields(chunk.len = end - offset),
        err(Debug)
    )]
    async fn send_chunk(
        &self,
        resource_url: &str,
        payload: &UploadPayload,
        offset: u64,
        end: u64,
    ) -> Result<u64, Failure> {
        let chunk = payload.bytes.slice(offset as usize..end as usize);
        let response = self
            .http
            .patch(resource_url)
            .header(HEADER_TUS_RESUMABLE, TUS_VERSION)
            .header(HEADER_UPLOAD_OFFSET, offset.to_string())
            .header(reqwest::header::CONTENT_TYPE, OFFSET_CONTENT_TYPE)
            .body(chunk)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(response).await);
        }

        let acknowledged = read_offset(&response)?;
        if acknowledged <= offset || acknowledged > end {
            return Err(protocol_violation(
                status,
                format!(
                    "server acknowledged offset {} for a chunk covering {}..{}",
                    acknowledged, offset, end
                ),
            ));
        }
        Ok(acknowledged)
    }

    /// Drive one chunk to acknowledgment, retrying within the schedule
    ///
    /// Returns the new acknowledged offset. An offset advance discovered by
    /// the pre-retry `HEAD` counts as the acknowledgment.
    async fn transfer_chunk(
        &self,
        resource_url: &str,
        payload: &UploadPayload,
        offset: u64,
    ) -> Result<u64, UploadError> {
        let total = payload.len();
        let end = (offset + self.chunk_size as u64).min(total);

        let mut last_failure: Option<Failure> = None;
        for (attempt, delay) in self.retry_delays.iter().enumerate() {
            if attempt > 0 {
                if let Some(failure) = &last_failure {
                    metrics::record_chunk_retry(failure.cause());
                }
                tracing::warn!(
                    offset,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying chunk"
                );
                tokio::time::sleep(*delay).await;

                match self.query_offset(resource_url).await {
                    Ok(server_offset) if server_offset < offset || server_offset > total => {
                        return Err(protocol_violation(
                            StatusCode::OK,
                            format!(
                                "server offset {} is outside the acknowledged range {}..={}",
                                server_offset, offset, total
                            ),
                        )
                        .into_error());
                    }
                    Ok(server_offset) if server_offset > offset => {
                        tracing::debug!(offset, server_offset, "Server already holds part of the chunk");
                        return Ok(server_offset);
                    }
                    Ok(_) => {}
                    Err(Failure::Fatal(e)) => return Err(e),
                    Err(failure) => {
                        last_failure = Some(failure);
                        continue;
                    }
                }
            }

            match self.send_chunk(resource_url, payload, offset, end).await {
                Ok(acknowledged) => return Ok(acknowledged),
                Err(Failure::Fatal(e)) => return Err(e),
                Err(failure) => last_failure = Some(failure),
            }
        }

        Err(last_failure
            .map(Failure::into_error)
            .unwrap_or_else(|| UploadError::Configuration("empty retry schedule".into())))
    }

    async fn run(
        &self,
        resource_url: &str,
        payload: &UploadPayload,
        progress: &ProgressReporter,
    ) -> Result<(), UploadError> {
        let total = payload.len();
        let mut offset = 0u64;

        while offset < total {
            offset = self.transfer_chunk(resource_url, payload, offset).await?;
            progress.report(offset, total);
        }
        Ok(())
    }
}

#[async_trait]
impl TransferClient for ResumableTransferClient {
    fn mode(&self) -> UploadMode {
        UploadMode::Resumable
    }

    #[tracing::instrument(
        name = "upload.resumable",
        skip(self, target, payload, progress),
        fields(
            stream.uid = %target.stream_id(),
            upload.size = payload.len(),
            upload.chunk_size = self.chunk_size
        ),
        err
    )]
    async fn transfer(
        &self,
        target: &UploadTarget,
        payload: &UploadPayload,
        progress: ProgressReporter,
    ) -> Result<StreamId, UploadError> {
        let UploadTarget::Resumable {
            resource_url,
            stream_id,
        } = target
        else {
            progress.finish();
            return Err(UploadError::Configuration(
                "resumable transfer requires a resumable resource target".into(),
            ));
        };

        let start = Instant::now();
        let result = self.run(resource_url, payload, &progress).await;
        progress.finish();

        match result {
            Ok(()) => {
                metrics::record_transfer_success(
                    UploadMode::Resumable.as_str(),
                    payload.len(),
                    start.elapsed().as_secs_f64(),
                );
                tracing::info!(uid = %stream_id, bytes = payload.len(), "Resumable transfer complete");
                Ok(stream_id.clone())
            }
            Err(e) => {
                metrics::record_transfer_failure(UploadMode::Resumable.as_str());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::CONFLICT));
        assert!(is_retryable_status(StatusCode::LOCKED));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));

        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::GONE));
    }

    #[test]
    fn test_new_validates_inputs() {
        assert!(ResumableTransferClient::new(0, vec![Duration::ZERO]).is_err());
        assert!(ResumableTransferClient::new(1024, vec![]).is_err());

        let client = ResumableTransferClient::from_config(&UploadConfig::default()).unwrap();
        assert_eq!(client.chunk_size(), 50 * 1024 * 1024);
        assert_eq!(client.max_attempts(), 5);
    }

    #[tokio::test]
    async fn test_empty_payload_completes_without_requests() {
        let client = ResumableTransferClient::new(1024, vec![Duration::ZERO]).unwrap();
        let target = UploadTarget::Resumable {
            // Nothing listens here; no request may be made
            resource_url: "http://127.0.0.1:1/tus/ea95132c15732412d22c1476fa83f27a".into(),
            stream_id: StreamId::parse("ea95132c15732412d22c1476fa83f27a").unwrap(),
        };
        let payload = UploadPayload::new("a.mp4", "video/mp4", Vec::<u8>::new());
        let id = client
            .transfer(&target, &payload, ProgressReporter::noop())
            .await
            .unwrap();
        assert_eq!(id.as_str(), "ea95132c15732412d22c1476fa83f27a");
    }
}
