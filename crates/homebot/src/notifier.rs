//! Delivery sinks for rendered messages.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use homebot_scheduler::{DispatchError, Notifier, OwnerId};

#[derive(Serialize)]
struct WebhookPayload<'a> {
    owner_id: OwnerId,
    text: &'a str,
}

/// Posts each message as JSON to a chat gateway.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, owner: OwnerId, text: &str) -> Result<(), DispatchError> {
        let response = self
            .http
            .post(&self.url)
            .json(&WebhookPayload {
                owner_id: owner,
                text,
            })
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|e| format!("failed to read response: {}", e));
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        debug!(%owner, %status, "webhook accepted message");
        Ok(())
    }
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, owner: OwnerId, text: &str) -> Result<(), DispatchError> {
        info!(%owner, text, "daily notification");
        Ok(())
    }
}
