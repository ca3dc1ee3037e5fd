//! End-to-end ingestion
//!
//! Wires the pieces together for one file:
//!
//! 1. pick the mode from the file size
//! 2. issue a target for the collection
//! 3. create the provisional `processing` record
//! 4. run the matching transfer client
//! 5. hand the record to the reconciliation scheduler
//!
//! If the transfer fails the provisional record is removed again.

use crate::authz::Authorizer;
use crate::config::Config;
use crate::reconcile::{ReconcileJob, ReconcileScheduler, ReconcileTicket, Reconciler};
use crate::registry::CollectionRegistry;
use crate::store::{RecordStore, VideoRecord};
use crate::stream::{StreamClient, StreamId};
use crate::upload::{
    DirectTransferClient, ProgressReporter, ResumableTransferClient, TargetIssuer,
    TransferClient, UploadError, UploadIntent, UploadMode, UploadPayload,
};
use std::sync::Arc;

/// A file to ingest
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub collection: String,
    pub payload: UploadPayload,
    pub requester: Option<String>,
    /// Force a mode instead of deciding from the size
    pub mode: Option<UploadMode>,
}

impl IngestRequest {
    pub fn new(collection: impl Into<String>, payload: UploadPayload) -> Self {
        Self {
            collection: collection.into(),
            payload,
            requester: None,
            mode: None,
        }
    }

    #[must_use]
    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = Some(requester.into());
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: UploadMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// A transferred file whose record is being reconciled
#[derive(Debug)]
pub struct Ingestion {
    pub mode: UploadMode,
    /// The provisional record as written
    pub record: VideoRecord,
    pub ticket: ReconcileTicket,
}

/// Ingestion pipeline
pub struct Ingestor {
    client: Arc<StreamClient>,
    issuer: TargetIssuer,
    direct: Arc<dyn TransferClient>,
    resumable: Arc<dyn TransferClient>,
    store: Arc<dyn RecordStore>,
    scheduler: Arc<ReconcileScheduler>,
    resumable_threshold: u64,
}

impl Ingestor {
    /// Assemble the pipeline from configuration
    pub fn from_config(
        config: &Config,
        client: Arc<StreamClient>,
        store: Arc<dyn RecordStore>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Result<Self, UploadError> {
        let registry = CollectionRegistry::new(config);
        let issuer = TargetIssuer::new(Arc::clone(&client), registry, authorizer);
        let reconciler = Reconciler::new(
            Arc::clone(&client),
            Arc::clone(&store),
            config.reconcile.clone(),
        );

        Ok(Self {
            issuer,
            direct: Arc::new(DirectTransferClient::from_config(&config.upload)?),
            resumable: Arc::new(ResumableTransferClient::from_config(&config.upload)?),
            scheduler: Arc::new(ReconcileScheduler::new(Arc::new(reconciler))),
            store,
            client,
            resumable_threshold: config.upload.resumable_threshold_bytes,
        })
    }

    pub fn client(&self) -> &Arc<StreamClient> {
        &self.client
    }

    pub fn issuer(&self) -> &TargetIssuer {
        &self.issuer
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<ReconcileScheduler> {
        &self.scheduler
    }

    pub fn resumable_threshold(&self) -> u64 {
        self.resumable_threshold
    }

    fn transfer_client(&self, mode: UploadMode) -> &Arc<dyn TransferClient> {
        match mode {
            UploadMode::Direct => &self.direct,
            UploadMode::Resumable => &self.resumable,
        }
    }

    /// Run the whole pipeline for one file
    #[tracing::instrument(
        name = "ingest",
        skip(self, request, progress),
        fields(
            upload.collection = %request.collection,
            upload.size = request.payload.len(),
            stream.uid = tracing::field::Empty
        ),
        err
    )]
    pub async fn ingest(
        &self,
        request: IngestRequest,
        progress: ProgressReporter,
    ) -> Result<Ingestion, UploadError> {
        let mut intent = UploadIntent::new(
            &request.collection,
            &request.payload.filename,
            &request.payload.mime_type,
            request.payload.len(),
            self.resumable_threshold,
        );
        if let Some(mode) = request.mode {
            intent = intent.with_mode(mode);
        }

        let target = self
            .issuer
            .request_target(&intent, request.requester.as_deref())
            .await?;
        let stream_id = target.stream_id().clone();
        tracing::Span::current().record("stream.uid", stream_id.as_str());

        let record = VideoRecord::provisional(
            stream_id.clone(),
            &request.collection,
            self.client.view_url(&stream_id),
        );
        self.store.insert(record.clone()).await?;

        let transferred = self
            .transfer_client(intent.mode)
            .transfer(&target, &request.payload, progress)
            .await;

        if let Err(e) = transferred {
            if let Err(cleanup) = self.store.remove(&stream_id).await {
                tracing::warn!(uid = %stream_id, error = %cleanup, "Failed to remove provisional record");
            }
            return Err(e);
        }

        let ticket = self.track(&stream_id, &request.collection)?;
        Ok(Ingestion {
            mode: intent.mode,
            record,
            ticket,
        })
    }

    /// Create the provisional record for a transfer done elsewhere and
    /// start reconciling it
    pub async fn register(
        &self,
        collection: &str,
        stream_id: StreamId,
    ) -> Result<(VideoRecord, ReconcileTicket), UploadError> {
        if !self.issuer.registry().contains(collection) {
            return Err(UploadError::Configuration(format!(
                "collection '{}' is not registered",
                collection
            )));
        }

        let record = VideoRecord::provisional(
            stream_id.clone(),
            collection,
            self.client.view_url(&stream_id),
        );
        self.store.insert(record.clone()).await?;
        let ticket = self.track(&stream_id, collection)?;
        Ok((record, ticket))
    }

    /// Start reconciling an existing record
    pub fn track(
        &self,
        stream_id: &StreamId,
        collection: &str,
    ) -> Result<ReconcileTicket, UploadError> {
        let settings = self.issuer.registry().get(collection).ok_or_else(|| {
            UploadError::Configuration(format!("collection '{}' is not registered", collection))
        })?;

        let job = ReconcileJob::new(stream_id.clone()).with_downloads(settings.prepare_downloads);
        Ok(self.scheduler.schedule(job))
    }

    /// Stop every reconciliation task
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
