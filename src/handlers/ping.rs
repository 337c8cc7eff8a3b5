//! Ping handler for health checks

use anyhow::Result;
use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use super::reply_json;
use crate::types::ErrorResponse;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PingRequest {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PongResponse {
    message: String,
    timestamp: String,
}

fn pong(request: PingRequest) -> PongResponse {
    PongResponse {
        message: request
            .message
            .map(|m| format!("Pong: {}", m))
            .unwrap_or_else(|| "Pong".to_string()),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

/// Handle roster.ping messages
pub async fn handle_ping(client: Client, mut subscriber: Subscriber) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received ping message");

        let Some(reply) = msg.reply.clone() else {
            error!("Ping message without reply subject");
            continue;
        };

        // An empty body is a plain ping
        let request = if msg.payload.is_empty() {
            Ok(PingRequest::default())
        } else {
            serde_json::from_slice::<PingRequest>(&msg.payload)
        };

        match request {
            Ok(request) => reply_json(&client, reply, &pong(request)).await?,
            Err(e) => {
                error!("Failed to parse ping request: {}", e);
                let error = ErrorResponse::new(
                    Uuid::nil(),
                    "INVALID_REQUEST",
                    format!("Failed to parse request: {}", e),
                );
                reply_json(&client, reply, &error).await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pong_echoes_message() {
        assert_eq!(pong(PingRequest::default()).message, "Pong");
        let reply = pong(PingRequest {
            message: Some("hello".into()),
        });
        assert_eq!(reply.message, "Pong: hello");
    }
}
