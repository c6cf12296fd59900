//! Webhook delivery

use crate::notifier::{alert_message, Notifier, NotifyError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    id: &'a str,
    at: DateTime<Utc>,
    message: String,
}

/// POSTs a JSON alert to a fixed URL
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    threshold: Duration,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, threshold: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            threshold,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, id: &str) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            id,
            at: Utc::now(),
            message: alert_message(id, self.threshold),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}
