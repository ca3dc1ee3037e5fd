//! Stream Ingestr Library
//!
//! Video ingestion orchestrator for a hosted video platform.
//!
//! # Features
//!
//! - **Two Upload Modes**: one-shot direct upload below a size threshold,
//!   resumable tus upload above it
//! - **Chunk Retries**: fixed per-chunk delay schedule with offset re-query
//! - **Collection Policies**: duration limit, allowed origins and signed URLs
//!   per collection
//! - **Reconciliation**: bounded, cancellable status polling into a local
//!   record that never leaves a terminal state
//! - **Safe Deletion**: remote videos are deleted only on permanent record
//!   removal
//!
//! # Example
//!
//! ```no_run
//! use stream_ingestr::{config::Config, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let server = Server::new(config)?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod authz;
pub mod config;
pub mod deletion;
pub mod ingest;
pub mod metrics;
pub mod reconcile;
pub mod registry;
pub mod router;
pub mod server;
pub mod store;
pub mod stream;
pub mod telemetry;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
