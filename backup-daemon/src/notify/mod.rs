//! Webhook notifications.
//!
//! Status messages are posted as a single embed:
//! `{ "embeds": [ { "title", "description", "color" } ] }`.
//! Delivery is best-effort: one POST per message, no retries, and failures
//! are logged here instead of being returned to the caller.

use crate::utils::errors::NotificationError;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

pub const SUCCESS_COLOR: u32 = 0x008000;
pub const FAILURE_COLOR: u32 = 0x800000;
pub const INFO_COLOR: u32 = 0x808080;

/// Upper bound for a single delivery so a stuck endpoint cannot stall a job.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookPayload {
    pub embeds: Vec<Embed>,
}

impl WebhookPayload {
    pub fn single(title: &str, description: &str, color: u32) -> Self {
        Self {
            embeds: vec![Embed {
                title: title.to_string(),
                description: description.to_string(),
                color,
            }],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
    url: String,
}

impl Notifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                error!("Failed to build webhook client, using defaults: {}", e);
                reqwest::Client::new()
            });
        Self {
            client,
            url: url.into(),
        }
    }

    /// Send a message. Never fails from the caller's point of view; it is
    /// awaited only so the message is ordered before whatever comes next.
    pub async fn notify(&self, title: &str, description: &str, color: u32) {
        if let Err(e) = self.try_notify(title, description, color).await {
            error!(error = %e, "Error sending webhook message");
        }
    }

    /// Single delivery attempt, surfacing the error.
    pub async fn try_notify(
        &self,
        title: &str,
        description: &str,
        color: u32,
    ) -> Result<(), NotificationError> {
        let payload = WebhookPayload::single(title, description, color);
        let resp = self.client.post(&self.url).json(&payload).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NotificationError::Status(status));
        }

        debug!(status = %status, "Webhook message delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let payload = WebhookPayload::single("Database Backup", "done", SUCCESS_COLOR);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "embeds": [
                    { "title": "Database Backup", "description": "done", "color": 32768 }
                ]
            })
        );
    }

    #[test]
    fn test_colors() {
        assert_eq!(SUCCESS_COLOR, 32768);
        assert_eq!(FAILURE_COLOR, 8388608);
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_swallowed() {
        // Port 9 (discard) on localhost is almost never listening.
        let notifier = Notifier::new("http://127.0.0.1:9/hook");
        assert!(notifier
            .try_notify("Database Backup", "x", FAILURE_COLOR)
            .await
            .is_err());
        // The best-effort wrapper returns normally.
        notifier.notify("Database Backup", "x", FAILURE_COLOR).await;
    }
}
