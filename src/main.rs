//! Stream Ingestr - video ingestion orchestrator
//!
//! Serves the internal upload API, or runs a single upload or deletion from
//! the command line.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stream_ingestr::authz::{AllowAllAuthorizer, Authorizer, CollectionAccessAuthorizer};
use stream_ingestr::deletion::DeletionGuard;
use stream_ingestr::ingest::{IngestRequest, Ingestor};
use stream_ingestr::registry::CollectionRegistry;
use stream_ingestr::store::{MemoryRecordStore, RecordStore};
use stream_ingestr::stream::{DeleteOutcome, StreamClient, StreamId};
use stream_ingestr::upload::{progress_channel, UploadMode, UploadPayload};
use stream_ingestr::{config::Config, server::Server, telemetry};
use tracing::info;

/// Stream Ingestr - direct and resumable video uploads with status reconciliation
#[derive(Parser, Debug)]
#[command(name = "stream-ingestr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,

    /// Upload one file into a collection and wait for it to settle
    Upload {
        /// Collection key
        #[arg(long)]
        collection: String,

        /// File to upload
        #[arg(long)]
        file: PathBuf,

        /// MIME type; guessed from the extension when omitted
        #[arg(long)]
        mime_type: Option<String>,

        /// Force a mode instead of deciding from the file size
        #[arg(long)]
        mode: Option<UploadMode>,

        /// Subject checked against the collection's access rule
        #[arg(long)]
        requester: Option<String>,

        /// Return after the transfer without waiting for processing
        #[arg(long)]
        no_wait: bool,
    },

    /// Delete a remote video
    Delete {
        /// Stream identifier
        stream_id: StreamId,
    },
}

fn guess_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("mpg") | Some("mpeg") => "video/mpeg",
        _ => "application/octet-stream",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;

    telemetry::init_subscriber(&config.logging, args.log_level.as_deref())?;

    info!("Starting Stream Ingestr v{}", stream_ingestr::VERSION);
    info!("Loaded configuration from {:?}", args.config);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let server = Server::new(config)?;
            server.run().await?;
        }
        Command::Upload {
            collection,
            file,
            mime_type,
            mode,
            requester,
            no_wait,
        } => {
            upload(
                &config, collection, &file, mime_type, mode, requester, no_wait,
            )
            .await?;
        }
        Command::Delete { stream_id } => {
            let client = Arc::new(StreamClient::from_config(&config.stream)?);
            let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
            let outcome = DeletionGuard::new(client, store)
                .delete_remote(&stream_id)
                .await?;
            match outcome {
                DeleteOutcome::Deleted => println!("deleted {}", stream_id),
                DeleteOutcome::AlreadyAbsent => println!("{} was already absent", stream_id),
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn upload(
    config: &Config,
    collection: String,
    file: &Path,
    mime_type: Option<String>,
    mode: Option<UploadMode>,
    requester: Option<String>,
    no_wait: bool,
) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {:?}", file))?;
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();
    let mime_type = mime_type.unwrap_or_else(|| guess_mime_type(file).to_string());

    let client = Arc::new(StreamClient::from_config(&config.stream)?);
    let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
    let authorizer: Arc<dyn Authorizer> = if config.auth.enabled {
        Arc::new(CollectionAccessAuthorizer::new(CollectionRegistry::new(
            config,
        )))
    } else {
        Arc::new(AllowAllAuthorizer)
    };
    let ingestor = Ingestor::from_config(config, client, Arc::clone(&store), authorizer)?;

    let mut request = IngestRequest::new(
        collection,
        UploadPayload::new(filename, mime_type, bytes),
    );
    if let Some(requester) = requester {
        request = request.with_requester(requester);
    }
    if let Some(mode) = mode {
        request = request.with_mode(mode);
    }

    let (reporter, mut progress) = progress_channel();
    let printer = tokio::spawn(async move {
        while let Some(p) = progress.recv().await {
            info!(
                sent = p.bytes_sent,
                total = p.bytes_total,
                "Upload {:.0}%",
                p.fraction() * 100.0
            );
        }
    });

    let ingestion = ingestor.ingest(request, reporter).await;
    let _ = printer.await;
    let ingestion = ingestion?;
    let stream_id = ingestion.record.stream_id.clone();
    info!(uid = %stream_id, mode = %ingestion.mode, "Transfer complete");

    if no_wait {
        println!("{}", serde_json::to_string_pretty(&ingestion.record)?);
        ingestor.shutdown().await;
        return Ok(());
    }

    let outcome = ingestion.ticket.outcome().await;
    info!(uid = %stream_id, outcome = %outcome, "Reconciliation finished");

    if let Some(record) = store.get(&stream_id).await? {
        println!("{}", serde_json::to_string_pretty(&record)?);
    }
    ingestor.shutdown().await;
    Ok(())
}
