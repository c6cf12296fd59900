//! Delivery capability

use async_trait::async_trait;
use chrono::Duration;
use thiserror::Error;

/// Alert delivery errors
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notifier configuration error: {0}")]
    Config(String),
    #[error("Delivery failed: {0}")]
    Transport(String),
    #[error("Delivery timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Delivery rejected with status {0}")]
    Rejected(u16),
}

/// A channel able to deliver an alert for a silent program
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short channel name used in logs
    fn name(&self) -> &str;

    /// Deliver one alert for `id`
    async fn deliver(&self, id: &str) -> Result<(), NotifyError>;
}

/// Human readable alert text shared by all channels
pub fn alert_message(id: &str, threshold: Duration) -> String {
    format!(
        "Program with ID {} has not been accessed for more than {}.",
        id,
        describe(threshold)
    )
}

fn describe(threshold: Duration) -> String {
    let secs = threshold.num_seconds();
    match (secs % 60, secs / 60) {
        (0, 1) => "1 minute".to_string(),
        (0, minutes) if minutes > 0 => format!("{} minutes", minutes),
        (_, _) if secs == 1 => "1 second".to_string(),
        _ => format!("{} seconds", secs),
    }
}
