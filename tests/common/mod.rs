//! Shared test infrastructure
//!
//! - a wiremock-backed platform API (`PlatformMock`)
//! - a stateful fake of the resumable upload endpoint (`FakeTus`)
//! - a record store wrapper that counts writes (`CountingStore`)
//! - configuration builders

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stream_ingestr::config::{
    CollectionConfig, Config, LoggingConfig, MetricsConfig, ReconcileConfig, ServerConfig,
    StreamConfig, UploadConfig,
};
use stream_ingestr::store::{
    MemoryRecordStore, RecordPatch, RecordStore, StoreError, VideoRecord,
};
use stream_ingestr::stream::{StreamClient, StreamClientConfig, StreamCredentials, StreamId};
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const ACCOUNT: &str = "acc-123";
pub const API_TOKEN: &str = "test-token";
pub const UID: &str = "ea95132c15732412d22c1476fa83f27a";
pub const OTHER_UID: &str = "0123456789abcdef0123456789abcdef";
pub const PLAYBACK: &str = "https://watch.example.com";

pub fn uid() -> StreamId {
    StreamId::parse(UID).unwrap()
}

/// Successful API envelope
pub fn envelope(result: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "success": true,
        "errors": [],
        "messages": [],
        "result": result,
    })
}

/// Failed API envelope
pub fn error_envelope(code: i64, message: &str) -> serde_json::Value {
    serde_json::json!({
        "success": false,
        "errors": [{ "code": code, "message": message }],
        "messages": [],
        "result": null,
    })
}

/// Video details in a given processing state
pub fn video_json(state: &str) -> serde_json::Value {
    serde_json::json!({
        "uid": UID,
        "status": { "state": state, "pctComplete": "100.000000", "errorReasonCode": "", "errorReasonText": "" },
        "duration": 12.5,
        "size": 4096,
        "thumbnail": format!("https://videodelivery.example.com/{}/thumbnails/thumbnail.jpg", UID),
        "readyToStream": state == "ready",
    })
}

/// Configuration pointing at the mock platform with fast schedules
pub fn test_config(api_base_url: &str) -> Config {
    Config {
        server: ServerConfig {
            address: "127.0.0.1:0".into(),
        },
        stream: StreamConfig {
            account_id: ACCOUNT.into(),
            api_token: API_TOKEN.into(),
            api_base_url: api_base_url.into(),
            playback_base_url: PLAYBACK.into(),
            request_timeout_seconds: 5,
        },
        upload: UploadConfig {
            resumable_threshold_bytes: 64,
            chunk_size_bytes: 32,
            retry_delays_ms: vec![0, 5, 5, 5],
            progress_step_bytes: 16,
        },
        reconcile: ReconcileConfig {
            poll_interval_ms: 10,
            max_attempts: 5,
        },
        collections: vec![CollectionConfig {
            allowed_origins: vec!["https://app.example.com/".into()],
            ..CollectionConfig::new("videos")
        }],
        auth: Default::default(),
        metrics: MetricsConfig {
            enabled: false,
            port: 0,
        },
        logging: LoggingConfig::default(),
    }
}

/// Mock of the hosted video platform
pub struct PlatformMock {
    pub server: MockServer,
}

impl PlatformMock {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// API base URL as configured in `stream.api_base_url`
    pub fn api_base(&self) -> String {
        format!("{}/client/v4", self.server.uri())
    }

    pub fn account_path(&self) -> String {
        format!("/client/v4/accounts/{}", ACCOUNT)
    }

    pub fn video_path(&self, id: &str) -> String {
        format!("{}/stream/{}", self.account_path(), id)
    }

    pub fn tus_url(&self, id: &str) -> String {
        format!("{}/tus/{}", self.server.uri(), id)
    }

    pub fn upload_url(&self) -> String {
        format!("{}/upload/one-time", self.server.uri())
    }

    pub fn config(&self) -> Config {
        test_config(&self.api_base())
    }

    pub fn client(&self) -> Arc<StreamClient> {
        Arc::new(
            StreamClient::new(StreamClientConfig {
                api_base_url: self.api_base(),
                playback_base_url: PLAYBACK.into(),
                credentials: StreamCredentials::new(ACCOUNT, API_TOKEN),
                timeout: Some(Duration::from_secs(5)),
            })
            .unwrap(),
        )
    }

    /// One-time URL issuance returning `UID`
    pub async fn mount_direct_upload(&self) {
        Mock::given(method("POST"))
            .and(path(format!("{}/stream/direct_upload", self.account_path())))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(serde_json::json!({
                "uploadURL": self.upload_url(),
                "uid": UID,
            }))))
            .mount(&self.server)
            .await;
    }

    /// The one-time URL itself
    pub async fn mount_upload_sink(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path("/upload/one-time"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Resumable resource creation returning `/tus/UID`
    pub async fn mount_resumable_creation(&self) {
        Mock::given(method("POST"))
            .and(path(format!("{}/stream", self.account_path())))
            .and(query_param("direct_user", "true"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", self.tus_url(UID).as_str())
                    .insert_header("Tus-Resumable", "1.0.0"),
            )
            .mount(&self.server)
            .await;
    }

    /// Origin allowlist update
    pub async fn mount_origin_update(&self) {
        Mock::given(method("POST"))
            .and(path(self.video_path(UID)))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(video_json("queued"))))
            .mount(&self.server)
            .await;
    }

    /// The resumable resource, backed by `fake`
    pub async fn mount_tus(&self, fake: &FakeTus) {
        Mock::given(path_regex("^/tus/[0-9a-f]{32}$"))
            .respond_with(fake.clone())
            .mount(&self.server)
            .await;
    }

    /// Status sequence for `GET /stream/UID`; the last state repeats
    pub async fn mount_status_sequence(&self, states: &[&str]) -> StatusSequence {
        let sequence = StatusSequence::new(states);
        Mock::given(method("GET"))
            .and(path(self.video_path(UID)))
            .respond_with(sequence.clone())
            .mount(&self.server)
            .await;
        sequence
    }

    pub async fn mount_delete(&self, status: u16) {
        Mock::given(method("DELETE"))
            .and(path(self.video_path(UID)))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Requests received for a method and path
    pub async fn count(&self, http_method: &str, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.method.as_str() == http_method && r.url.path() == request_path)
            .count()
    }
}

/// Replays processing states, one per request
#[derive(Clone)]
pub struct StatusSequence {
    states: Arc<Vec<String>>,
    served: Arc<AtomicUsize>,
}

impl StatusSequence {
    pub fn new(states: &[&str]) -> Self {
        Self {
            states: Arc::new(states.iter().map(|s| s.to_string()).collect()),
            served: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

impl Respond for StatusSequence {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.served.fetch_add(1, Ordering::SeqCst);
        let state = self
            .states
            .get(n)
            .or_else(|| self.states.last())
            .cloned()
            .unwrap_or_else(|| "queued".into());
        ResponseTemplate::new(200).set_body_json(envelope(video_json(&state)))
    }
}

/// Scripted misbehaviour of the resumable endpoint for a `PATCH` at an offset
#[derive(Debug, Clone, Copy)]
pub enum ChunkFault {
    /// Reject without storing anything
    Status(u16),
    /// Store the bytes, then answer with an error as if the reply was lost
    AcceptThenFail(u16),
    /// Store the bytes and acknowledge a bogus offset
    BogusAck(u64),
}

#[derive(Debug, Default)]
pub struct TusState {
    pub received: Vec<u8>,
    /// Claimed offset of every `PATCH`
    pub patches: Vec<u64>,
    pub heads: usize,
    faults: HashMap<u64, VecDeque<ChunkFault>>,
    head_faults: VecDeque<u16>,
}

/// In-memory tus server: tracks the stored bytes and replays scripted faults
#[derive(Clone, Default)]
pub struct FakeTus {
    state: Arc<Mutex<TusState>>,
}

impl FakeTus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fault for the next `PATCH` claiming `offset`
    pub fn fail_at(&self, offset: u64, fault: ChunkFault) -> &Self {
        self.state
            .lock()
            .unwrap()
            .faults
            .entry(offset)
            .or_default()
            .push_back(fault);
        self
    }

    /// Queue a failing status for the next `HEAD`
    pub fn fail_head(&self, status: u16) -> &Self {
        self.state.lock().unwrap().head_faults.push_back(status);
        self
    }

    pub fn received(&self) -> Vec<u8> {
        self.state.lock().unwrap().received.clone()
    }

    pub fn patches(&self) -> Vec<u64> {
        self.state.lock().unwrap().patches.clone()
    }

    pub fn heads(&self) -> usize {
        self.state.lock().unwrap().heads
    }
}

fn tus_reply(status: u16, offset: u64) -> ResponseTemplate {
    ResponseTemplate::new(status)
        .insert_header("Tus-Resumable", "1.0.0")
        .insert_header("Upload-Offset", offset.to_string().as_str())
}

impl Respond for FakeTus {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut state = self.state.lock().unwrap();
        match request.method.as_str() {
            "HEAD" => {
                state.heads += 1;
                if let Some(status) = state.head_faults.pop_front() {
                    return ResponseTemplate::new(status);
                }
                tus_reply(200, state.received.len() as u64)
            }
            "PATCH" => {
                let claimed = request
                    .headers
                    .get("Upload-Offset")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                let Some(claimed) = claimed else {
                    return ResponseTemplate::new(400);
                };
                state.patches.push(claimed);
                if claimed != state.received.len() as u64 {
                    return ResponseTemplate::new(409);
                }

                let fault = state
                    .faults
                    .get_mut(&claimed)
                    .and_then(|queue| queue.pop_front());
                match fault {
                    Some(ChunkFault::Status(status)) => ResponseTemplate::new(status),
                    Some(ChunkFault::AcceptThenFail(status)) => {
                        state.received.extend_from_slice(&request.body);
                        ResponseTemplate::new(status)
                    }
                    Some(ChunkFault::BogusAck(offset)) => {
                        state.received.extend_from_slice(&request.body);
                        tus_reply(204, offset)
                    }
                    None => {
                        state.received.extend_from_slice(&request.body);
                        tus_reply(204, state.received.len() as u64)
                    }
                }
            }
            _ => ResponseTemplate::new(405),
        }
    }
}

/// Deterministic payload of `len` bytes
pub fn payload_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Record store that counts writes and can be told to fail them
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryRecordStore,
    pub updates: AtomicUsize,
    pub removes: AtomicUsize,
    failing_updates: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` updates with a backend error
    pub fn fail_next_updates(&self, n: usize) {
        self.failing_updates.store(n, Ordering::SeqCst);
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for CountingStore {
    async fn insert(&self, record: VideoRecord) -> Result<(), StoreError> {
        self.inner.insert(record).await
    }

    async fn get(&self, id: &StreamId) -> Result<Option<VideoRecord>, StoreError> {
        self.inner.get(id).await
    }

    async fn update(&self, id: &StreamId, patch: RecordPatch) -> Result<VideoRecord, StoreError> {
        let failing = self.failing_updates.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_updates.store(failing - 1, Ordering::SeqCst);
            return Err(StoreError::Backend("injected write failure".into()));
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update(id, patch).await
    }

    async fn remove(&self, id: &StreamId) -> Result<Option<VideoRecord>, StoreError> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(id).await
    }

    async fn list(&self) -> Result<Vec<VideoRecord>, StoreError> {
        self.inner.list().await
    }
}
