//! HTTP server module
//!
//! Assembles the ingestion pipeline from configuration and serves the
//! internal API until interrupted.

pub mod http;

use crate::auth::{Authenticator, JwtAuthenticator};
use crate::authz::{AllowAllAuthorizer, Authorizer, CollectionAccessAuthorizer};
use crate::config::Config;
use crate::deletion::DeletionGuard;
use crate::ingest::Ingestor;
use crate::metrics::server::MetricsServer;
use crate::registry::CollectionRegistry;
use crate::store::{MemoryRecordStore, RecordStore};
use crate::stream::StreamClient;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub use http::{ApiServer, AppState};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Failed to assemble service: {0}")]
    SetupError(String),

    #[error("Server error: {0}")]
    RuntimeError(String),
}

/// HTTP Server
pub struct Server {
    config: Config,
    addr: SocketAddr,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .server
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("{}", e)))?;

        Ok(Self { config, addr })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Build the handler state: remote client, in-memory store, access
    /// predicate and the ingestion pipeline
    pub fn build_state(config: &Config) -> Result<Arc<AppState>, ServerError> {
        let client = Arc::new(
            StreamClient::from_config(&config.stream)
                .map_err(|e| ServerError::SetupError(e.to_string()))?,
        );
        let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());

        let (authenticator, authorizer): (Option<Arc<dyn Authenticator>>, Arc<dyn Authorizer>) =
            if config.auth.enabled {
                let jwt = config.auth.jwt.as_ref().ok_or_else(|| {
                    ServerError::SetupError("auth.enabled requires an auth.jwt section".into())
                })?;
                let authenticator = JwtAuthenticator::from_config(jwt)
                    .map_err(|e| ServerError::SetupError(e.to_string()))?;
                (
                    Some(Arc::new(authenticator)),
                    Arc::new(CollectionAccessAuthorizer::new(CollectionRegistry::new(config))),
                )
            } else {
                warn!("Authentication disabled, every request may upload and delete");
                (None, Arc::new(AllowAllAuthorizer))
            };

        let ingestor = Arc::new(
            Ingestor::from_config(
                config,
                Arc::clone(&client),
                Arc::clone(&store),
                Arc::clone(&authorizer),
            )
            .map_err(|e| ServerError::SetupError(e.to_string()))?,
        );
        let deletion = DeletionGuard::new(client, store)
            .with_scheduler(Arc::clone(ingestor.scheduler()));

        Ok(Arc::new(AppState {
            ingestor,
            deletion,
            authenticator,
            authorizer,
        }))
    }

    /// Run the server until Ctrl-C
    pub async fn run(&self) -> Result<(), ServerError> {
        let state = Self::build_state(&self.config)?;

        let mut metrics_server = if self.config.metrics.enabled {
            let mut server = MetricsServer::from_config(&self.config.metrics);
            server
                .start()
                .await
                .map_err(|e| ServerError::BindError(e.to_string()))?;
            Some(server)
        } else {
            None
        };

        info!(
            collections = self.config.collections.len(),
            auth = self.config.auth.enabled,
            "Starting server on {}",
            self.addr
        );

        let api = ApiServer::bind(&self.addr.to_string(), Arc::clone(&state)).await?;
        api.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await?;

        info!("Shutting down server");
        state.ingestor.shutdown().await;
        if let Some(server) = metrics_server.as_mut() {
            server.shutdown().await;
        }
        Ok(())
    }
}
