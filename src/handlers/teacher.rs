//! Teacher directory message handlers

use std::sync::Arc;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::reply_json;
use crate::db::TeacherStore;
use crate::types::{
    ErrorResponse, GetTeacherRequest, ListRequest, ListResponse, Request, SuccessResponse,
    TeacherQuery,
};

/// Handle roster.teacher.list messages
pub async fn handle_list(
    client: Client,
    mut subscriber: Subscriber,
    store: Arc<dyn TeacherStore>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received roster.teacher.list message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<ListRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                reply_json(&client, reply, &error).await?;
                continue;
            }
        };

        let payload = &request.payload;
        let query = TeacherQuery::new(payload.search.as_deref(), payload.limit, payload.offset);
        match store.list(&query).await {
            Ok((items, total)) => {
                let response = SuccessResponse::new(
                    request.id,
                    ListResponse {
                        items,
                        total,
                        limit: query.limit,
                        offset: query.offset,
                    },
                );
                reply_json(&client, reply, &response).await?;
            }
            Err(e) => {
                error!("Failed to list teachers: {:#}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                reply_json(&client, reply, &error).await?;
            }
        }
    }

    Ok(())
}

/// Handle roster.teacher.get messages
pub async fn handle_get(
    client: Client,
    mut subscriber: Subscriber,
    store: Arc<dyn TeacherStore>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received roster.teacher.get message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<GetTeacherRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                reply_json(&client, reply, &error).await?;
                continue;
            }
        };

        match store.get(request.payload.id).await {
            Ok(Some(teacher)) => {
                reply_json(&client, reply, &SuccessResponse::new(request.id, teacher)).await?;
            }
            Ok(None) => {
                let error = ErrorResponse::new(request.id, "NOT_FOUND", "Teacher not found");
                reply_json(&client, reply, &error).await?;
            }
            Err(e) => {
                error!("Failed to get teacher: {:#}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                reply_json(&client, reply, &error).await?;
            }
        }
    }

    Ok(())
}
