//! Roster Worker - staff directory import service
//!
//! This worker connects to NATS and handles teacher imports and directory
//! lookups from the frontend.

mod auth;
mod cli;
mod config;
mod db;
mod handlers;
mod services;
mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::db::{MemoryTeacherStore, PgTeacherStore, TeacherStore};
use crate::services::blob_store::{BlobStore, FsBlobStore, MemoryBlobStore};
use crate::services::import::{ImportCaller, ImportPipeline, StagingArea};
use crate::types::{CommitOptions, ImportOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs directory - use LOGS_DIR env var or default to ../logs (relative to worker)
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "../logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,roster_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    info!("Configuration loaded");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Migrate => {
            let pool = db::create_pool(config.database_url()?, config.database_max_connections).await?;
            db::run_migrations(&pool).await
        }
        Command::Import {
            csv,
            zip,
            replace_all,
            all_or_nothing,
            dry_run,
        } => {
            let options = cli::commit_options(replace_all, all_or_nothing);
            import_files(&config, &csv, zip.as_deref(), options, dry_run).await
        }
        Command::PurgeStaging => {
            let staging = StagingArea::new(&config.staging_dir, config.staging_ttl());
            let purged = staging.purge_expired().await?;
            info!(purged, "Expired staged imports removed");
            Ok(())
        }
    }
}

fn build_pipeline(
    config: &Config,
    store: Arc<dyn TeacherStore>,
    blobs: Arc<dyn BlobStore>,
) -> ImportPipeline {
    let staging = StagingArea::new(&config.staging_dir, config.staging_ttl());
    info!("Staged imports kept in {}", staging.root().display());

    ImportPipeline::new(store, blobs, staging, config.archive_limits)
}

async fn open_media(config: &Config) -> Result<Arc<dyn BlobStore>> {
    let blobs = FsBlobStore::open(&config.media_dir).await?;
    info!("Profile pictures stored in {}", blobs.root().display());
    Ok(Arc::new(blobs))
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting Roster Worker...");
    config.jwt_secret()?;

    // Connect to database
    let pool = db::create_pool(config.database_url()?, config.database_max_connections).await?;
    info!("Connected to PostgreSQL");

    db::run_migrations(&pool).await?;

    let store: Arc<dyn TeacherStore> = Arc::new(PgTeacherStore::new(pool));
    let blobs = open_media(&config).await?;
    let pipeline = Arc::new(build_pipeline(&config, store.clone(), blobs));

    // Connect to NATS (supports optional NATS_USER/NATS_PASSWORD auth).
    let nats_client = match (std::env::var("NATS_USER"), std::env::var("NATS_PASSWORD")) {
        (Ok(user), Ok(password)) if !user.is_empty() => {
            async_nats::ConnectOptions::new()
                .user_and_password(user, password)
                .connect(&config.nats_url)
                .await?
        }
        _ => async_nats::connect(&config.nats_url).await?,
    };
    info!("Connected to NATS at {}", config.nats_url);

    let services = handlers::Services { store, pipeline };
    let handler_result = handlers::start_handlers(nats_client, services, &config).await;

    if let Err(e) = handler_result {
        error!("Handler error: {}", e);
        return Err(e);
    }

    Ok(())
}

/// One-shot import from local files. Nothing is committed unless the whole
/// file validates cleanly.
async fn import_files(
    config: &Config,
    csv_path: &Path,
    zip_path: Option<&Path>,
    options: CommitOptions,
    dry_run: bool,
) -> Result<()> {
    let csv = tokio::fs::read(csv_path)
        .await
        .with_context(|| format!("Failed to read {}", csv_path.display()))?;
    let zip = match zip_path {
        Some(path) => Some(
            tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        None => None,
    };

    let pipeline = if dry_run {
        info!("Dry run: importing into an in-memory directory");
        build_pipeline(
            config,
            Arc::new(MemoryTeacherStore::new()),
            Arc::new(MemoryBlobStore::new()),
        )
    } else {
        let pool = db::create_pool(config.database_url()?, config.database_max_connections).await?;
        db::run_migrations(&pool).await?;
        build_pipeline(config, Arc::new(PgTeacherStore::new(pool)), open_media(config).await?)
    };

    let operator = ImportCaller::authenticated(Uuid::nil());
    let filename = csv_path.file_name().map(|name| name.to_string_lossy().into_owned());

    let outcome = pipeline
        .import_now(operator, filename, &csv, zip.as_deref(), options)
        .await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    match outcome {
        ImportOutcome::Committed { summary, .. } => {
            info!(
                created = summary.created_count,
                updated = summary.updated_count,
                pictures = summary.pictures_attached,
                failed = summary.failed.len(),
                "Import committed"
            );
            Ok(())
        }
        ImportOutcome::Pending { report } => {
            for message in &report.messages {
                warn!("{}", message);
            }
            if let Some(staging_id) = report.staging_id {
                pipeline.discard(operator, staging_id).await?;
            }
            anyhow::bail!(
                "{} problem(s) found in {}; nothing was imported",
                report.messages.len(),
                csv_path.display()
            )
        }
    }
}
