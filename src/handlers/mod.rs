//! NATS message handlers

pub mod import;
pub mod ping;
pub mod teacher;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_nats::{Client, Subject};
use serde::Serialize;
use tokio::select;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::TeacherStore;
use crate::services::import::ImportPipeline;

/// How often expired staged imports are looked for
const STAGING_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Shared state the handlers run against
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn TeacherStore>,
    pub pipeline: Arc<ImportPipeline>,
}

/// Serialize and publish a reply. Serialization and publish failures are
/// logged and the subscriber loop keeps running.
pub(crate) async fn reply_json<T: Serialize>(client: &Client, reply: Subject, value: &T) -> Result<()> {
    let payload = match encode_reply(value) {
        Some(payload) => payload,
        None => return Ok(()),
    };
    if let Err(e) = client.publish(reply, payload.into()).await {
        warn!("Failed to publish reply: {}", e);
    }
    Ok(())
}

fn encode_reply<T: Serialize>(value: &T) -> Option<Vec<u8>> {
    match serde_json::to_vec(value) {
        Ok(payload) => Some(payload),
        Err(e) => {
            error!("Failed to serialize reply: {}", e);
            None
        }
    }
}

/// Periodically drop staged imports that were never confirmed
async fn sweep_staging(pipeline: Arc<ImportPipeline>) -> Result<()> {
    let mut interval = tokio::time::interval(STAGING_SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = pipeline.purge_expired().await {
            warn!("Staging sweep failed: {}", e);
        }
    }
}

/// Start all message handlers
pub async fn start_handlers(client: Client, services: Services, config: &Config) -> Result<()> {
    info!("Starting message handlers...");

    let jwt_secret: Arc<str> = Arc::from(config.jwt_secret()?);

    // Subscribe to all subjects
    let ping_sub = client.subscribe("roster.ping").await?;
    let import_validate_sub = client.subscribe("roster.import.validate").await?;
    let import_confirm_sub = client.subscribe("roster.import.confirm").await?;
    let import_discard_sub = client.subscribe("roster.import.discard").await?;
    let import_run_sub = client.subscribe("roster.import.run").await?;
    let teacher_list_sub = client.subscribe("roster.teacher.list").await?;
    let teacher_get_sub = client.subscribe("roster.teacher.get").await?;

    info!("Subscribed to NATS subjects");

    let ping_handle = tokio::spawn(ping::handle_ping(client.clone(), ping_sub));

    let import_validate_handle = tokio::spawn(import::handle_validate(
        client.clone(),
        import_validate_sub,
        services.pipeline.clone(),
        jwt_secret.clone(),
    ));
    let import_confirm_handle = tokio::spawn(import::handle_confirm(
        client.clone(),
        import_confirm_sub,
        services.pipeline.clone(),
        jwt_secret.clone(),
    ));
    let import_discard_handle = tokio::spawn(import::handle_discard(
        client.clone(),
        import_discard_sub,
        services.pipeline.clone(),
        jwt_secret.clone(),
    ));
    let import_run_handle = tokio::spawn(import::handle_run(
        client.clone(),
        import_run_sub,
        services.pipeline.clone(),
        jwt_secret,
    ));

    let teacher_list_handle = tokio::spawn(teacher::handle_list(
        client.clone(),
        teacher_list_sub,
        services.store.clone(),
    ));
    let teacher_get_handle = tokio::spawn(teacher::handle_get(
        client.clone(),
        teacher_get_sub,
        services.store.clone(),
    ));

    let sweeper_handle = tokio::spawn(sweep_staging(services.pipeline.clone()));

    info!("All handlers started");

    // Wait for any handler to finish (which indicates an error)
    select! {
        result = ping_handle => {
            error!("Ping handler finished: {:?}", result);
        }
        result = import_validate_handle => {
            error!("Import validate handler finished: {:?}", result);
        }
        result = import_confirm_handle => {
            error!("Import confirm handler finished: {:?}", result);
        }
        result = import_discard_handle => {
            error!("Import discard handler finished: {:?}", result);
        }
        result = import_run_handle => {
            error!("Import run handler finished: {:?}", result);
        }
        result = teacher_list_handle => {
            error!("Teacher list handler finished: {:?}", result);
        }
        result = teacher_get_handle => {
            error!("Teacher get handler finished: {:?}", result);
        }
        result = sweeper_handle => {
            error!("Staging sweeper finished: {:?}", result);
        }
    }

    Ok(())
}
