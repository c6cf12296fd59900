//! Alert Dispatcher

use crate::notifier::{Notifier, NotifyError};
use chrono::Utc;
use ledger::{AlertRecord, RecordLog};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Delivers alerts through a [`Notifier`] with a bounded timeout and records
/// each successful delivery.
pub struct AlertDispatcher {
    notifier: Arc<dyn Notifier>,
    records: Arc<RecordLog>,
    timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, records: Arc<RecordLog>, timeout: Duration) -> Self {
        info!(
            "Creating alert dispatcher (channel: {}, timeout: {:?})",
            notifier.name(),
            timeout
        );
        Self {
            notifier,
            records,
            timeout,
        }
    }

    /// Deliver one alert for `id`
    pub async fn dispatch(&self, id: &str) -> Result<(), NotifyError> {
        let outcome = match tokio::time::timeout(self.timeout, self.notifier.deliver(id)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout(self.timeout)),
        };

        match outcome {
            Ok(()) => {
                self.records.append(&AlertRecord {
                    id: id.to_string(),
                    at: Utc::now(),
                });
                counter!("watchdog_alerts_sent_total").increment(1);
                info!("Alert sent for {:?} via {}", id, self.notifier.name());
                Ok(())
            }
            Err(e) => {
                counter!("watchdog_alert_failures_total").increment(1);
                warn!("Alert for {:?} via {} failed: {}", id, self.notifier.name(), e);
                Err(e)
            }
        }
    }
}
