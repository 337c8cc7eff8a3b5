//! Import message handlers: validate, confirm, discard and one-shot run.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_nats::{Client, Subscriber};
use base64::Engine;
use futures::StreamExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::reply_json;
use crate::auth;
use crate::services::import::{ImportCaller, ImportError, ImportPipeline};
use crate::types::{
    ConfirmImportRequest, DiscardImportRequest, DiscardImportResponse, ErrorResponse, Request,
    RunImportRequest, SuccessResponse, ValidateImportRequest,
};

/// Decoded upload bytes
#[derive(Debug)]
struct Upload {
    csv: Vec<u8>,
    zip: Option<Vec<u8>>,
}

fn decode_upload(payload: &ValidateImportRequest) -> Result<Upload> {
    let engine = &base64::engine::general_purpose::STANDARD;
    let csv = engine
        .decode(payload.csv_content_base64.trim())
        .context("csvContentBase64 is not valid base64")?;
    let zip = payload
        .zip_content_base64
        .as_deref()
        .map(str::trim)
        .filter(|z| !z.is_empty())
        .map(|z| engine.decode(z))
        .transpose()
        .context("zipContentBase64 is not valid base64")?;
    Ok(Upload { csv, zip })
}

/// Callers without a valid token are anonymous; the pipeline rejects them.
fn caller_for<T>(request: &Request<T>, jwt_secret: &str) -> ImportCaller {
    match auth::extract_auth(request, jwt_secret) {
        Ok(info) => {
            debug!(user_id = %info.user_id, email = ?info.email, "Import request authenticated");
            info.caller()
        }
        Err(e) => {
            debug!("Import request not authenticated: {}", e);
            ImportCaller::anonymous()
        }
    }
}

fn import_error_response(request_id: Uuid, err: &ImportError) -> ErrorResponse {
    let response = ErrorResponse::new(request_id, err.code(), err.to_string());
    match err {
        ImportError::RowImport(row) => response.with_details(serde_json::json!({
            "rowIndex": row.row_index,
            "cause": row.cause,
        })),
        ImportError::Archive(archive) => match serde_json::to_value(archive) {
            Ok(details) => response.with_details(details),
            Err(_) => response,
        },
        _ => response,
    }
}

fn log_import_error(operation: &str, err: &ImportError) {
    match err {
        ImportError::Unauthorized | ImportError::StagingNotFound(_) => {
            warn!("Import {} rejected: {}", operation, err)
        }
        _ => error!("Import {} failed: {}", operation, err),
    }
}

/// Handle roster.import.validate messages
pub async fn handle_validate(
    client: Client,
    mut subscriber: Subscriber,
    pipeline: Arc<ImportPipeline>,
    jwt_secret: Arc<str>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received roster.import.validate message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<ValidateImportRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                reply_json(&client, reply, &error).await?;
                continue;
            }
        };

        let upload = match decode_upload(&request.payload) {
            Ok(upload) => upload,
            Err(e) => {
                let error = ErrorResponse::new(request.id, "INVALID_REQUEST", format!("{e:#}"));
                reply_json(&client, reply, &error).await?;
                continue;
            }
        };

        let caller = caller_for(&request, &jwt_secret);
        match pipeline
            .validate(caller, request.payload.filename.clone(), &upload.csv, upload.zip.as_deref())
            .await
        {
            Ok(report) => {
                reply_json(&client, reply, &SuccessResponse::new(request.id, report)).await?;
            }
            Err(e) => {
                log_import_error("validate", &e);
                reply_json(&client, reply, &import_error_response(request.id, &e)).await?;
            }
        }
    }

    Ok(())
}

/// Handle roster.import.confirm messages
pub async fn handle_confirm(
    client: Client,
    mut subscriber: Subscriber,
    pipeline: Arc<ImportPipeline>,
    jwt_secret: Arc<str>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received roster.import.confirm message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<ConfirmImportRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                reply_json(&client, reply, &error).await?;
                continue;
            }
        };

        let caller = caller_for(&request, &jwt_secret);
        match pipeline
            .confirm(caller, request.payload.staging_id, request.payload.options)
            .await
        {
            Ok(summary) => {
                reply_json(&client, reply, &SuccessResponse::new(request.id, summary)).await?;
            }
            Err(e) => {
                log_import_error("confirm", &e);
                reply_json(&client, reply, &import_error_response(request.id, &e)).await?;
            }
        }
    }

    Ok(())
}

/// Handle roster.import.discard messages
pub async fn handle_discard(
    client: Client,
    mut subscriber: Subscriber,
    pipeline: Arc<ImportPipeline>,
    jwt_secret: Arc<str>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received roster.import.discard message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<DiscardImportRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                reply_json(&client, reply, &error).await?;
                continue;
            }
        };

        let caller = caller_for(&request, &jwt_secret);
        match pipeline.discard(caller, request.payload.staging_id).await {
            Ok(discarded) => {
                let response = SuccessResponse::new(request.id, DiscardImportResponse { discarded });
                reply_json(&client, reply, &response).await?;
            }
            Err(e) => {
                log_import_error("discard", &e);
                reply_json(&client, reply, &import_error_response(request.id, &e)).await?;
            }
        }
    }

    Ok(())
}

/// Handle roster.import.run messages: validate, and commit when clean
pub async fn handle_run(
    client: Client,
    mut subscriber: Subscriber,
    pipeline: Arc<ImportPipeline>,
    jwt_secret: Arc<str>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received roster.import.run message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<RunImportRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                reply_json(&client, reply, &error).await?;
                continue;
            }
        };

        let upload = match decode_upload(&request.payload.upload) {
            Ok(upload) => upload,
            Err(e) => {
                let error = ErrorResponse::new(request.id, "INVALID_REQUEST", format!("{e:#}"));
                reply_json(&client, reply, &error).await?;
                continue;
            }
        };

        let caller = caller_for(&request, &jwt_secret);
        match pipeline
            .import_now(
                caller,
                request.payload.upload.filename.clone(),
                &upload.csv,
                upload.zip.as_deref(),
                request.payload.options,
            )
            .await
        {
            Ok(outcome) => {
                reply_json(&client, reply, &SuccessResponse::new(request.id, outcome)).await?;
            }
            Err(e) => {
                log_import_error("run", &e);
                reply_json(&client, reply, &import_error_response(request.id, &e)).await?;
            }
        }
    }

    Ok(())
}
