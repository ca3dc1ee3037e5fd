//! Upload target issuance
//!
//! Turns an [`UploadIntent`] into an [`UploadTarget`] by asking the platform
//! for either a one-time upload URL or a resumable upload resource.
//!
//! Checks run in this order:
//! 1. the collection must be registered (`Configuration`)
//! 2. the access predicate must allow the requester (`Authorization`)
//! 3. the remote call must succeed (`Upstream` / `Network`)

use super::metadata::UploadMetadata;
use super::{UploadError, UploadIntent, UploadMode, UploadTarget};
use crate::authz::{AuthzRequest, Authorizer, ACTION_UPLOAD};
use crate::metrics;
use crate::registry::{CollectionRegistry, CollectionSettings};
use crate::stream::{
    DirectUploadRequest, ResumableUploadRequest, StreamClient, StreamId, VideoMeta,
};
use std::sync::Arc;

/// Issues upload targets for registered collections
pub struct TargetIssuer {
    client: Arc<StreamClient>,
    registry: CollectionRegistry,
    authorizer: Arc<dyn Authorizer>,
}

impl TargetIssuer {
    pub fn new(
        client: Arc<StreamClient>,
        registry: CollectionRegistry,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            client,
            registry,
            authorizer,
        }
    }

    pub fn registry(&self) -> &CollectionRegistry {
        &self.registry
    }

    /// Obtain a target for the intent
    #[tracing::instrument(
        name = "upload.request_target",
        skip(self, intent),
        fields(
            upload.collection = %intent.collection_key,
            upload.mode = %intent.mode,
            upload.total_bytes = intent.total_bytes,
            stream.uid = tracing::field::Empty
        ),
        err
    )]
    pub async fn request_target(
        &self,
        intent: &UploadIntent,
        requester: Option<&str>,
    ) -> Result<UploadTarget, UploadError> {
        let result = self.issue(intent, requester).await;

        metrics::record_target_issued(&intent.collection_key, intent.mode.as_str(), result.is_ok());
        match &result {
            Ok(target) => {
                tracing::Span::current().record("stream.uid", target.stream_id().as_str());
                tracing::info!(uid = %target.stream_id(), "Upload target issued");
            }
            Err(e) => metrics::record_error(e.kind()),
        }

        result
    }

    async fn issue(
        &self,
        intent: &UploadIntent,
        requester: Option<&str>,
    ) -> Result<UploadTarget, UploadError> {
        let settings = self.registry.get(&intent.collection_key).ok_or_else(|| {
            UploadError::Configuration(format!(
                "collection '{}' is not registered",
                intent.collection_key
            ))
        })?;

        let request = AuthzRequest::new(requester, ACTION_UPLOAD, &intent.collection_key);
        let allowed = match self.authorizer.authorize(&request).await {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::warn!(error = %e, "Access predicate failed, denying");
                false
            }
        };
        if !allowed {
            return Err(UploadError::Authorization {
                collection: intent.collection_key.clone(),
            });
        }

        match intent.mode {
            UploadMode::Direct => self.issue_direct(intent, &settings).await,
            UploadMode::Resumable => self.issue_resumable(intent, &settings).await,
        }
    }

    async fn issue_direct(
        &self,
        intent: &UploadIntent,
        settings: &CollectionSettings,
    ) -> Result<UploadTarget, UploadError> {
        let request = DirectUploadRequest {
            max_duration_seconds: settings.max_duration_seconds,
            allowed_origins: settings.allowed_origins.clone(),
            require_signed_urls: settings.require_signed_urls,
            meta: (!intent.filename.is_empty()).then(|| VideoMeta {
                name: intent.filename.clone(),
            }),
        };

        let ticket = self.client.create_direct_upload(&request).await?;
        Ok(UploadTarget::Direct {
            upload_url: ticket.upload_url,
            stream_id: ticket.stream_id,
        })
    }

    async fn issue_resumable(
        &self,
        intent: &UploadIntent,
        settings: &CollectionSettings,
    ) -> Result<UploadTarget, UploadError> {
        let request = ResumableUploadRequest {
            upload_length: intent.total_bytes,
            upload_metadata: UploadMetadata::for_intent(intent, settings).encode(),
        };

        let session = self.client.create_resumable_upload(&request).await?;
        let stream_id =
            StreamId::from_location(&session.location).ok_or_else(|| UploadError::Upstream {
                status: session.status,
                messages: vec![format!(
                    "resource location '{}' does not contain a stream id",
                    session.location
                )],
            })?;

        // Creation does not take an origin allowlist
        if !settings.allowed_origins.is_empty() {
            self.client
                .update_allowed_origins(&stream_id, &settings.allowed_origins)
                .await?;
        }

        Ok(UploadTarget::Resumable {
            resource_url: session.location,
            stream_id,
        })
    }
}
