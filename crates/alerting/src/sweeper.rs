//! Staleness Sweeper

use crate::dispatcher::AlertDispatcher;
use crate::notifier::NotifyError;
use chrono::{DateTime, Utc};
use ledger::Ledger;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// What to do when an alert cannot be delivered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryFailurePolicy {
    /// Leave the program unalerted so the next sweep tries again
    #[default]
    Retry,
    /// Stop the sweep loop with an error
    Abort,
}

/// Sweeper configuration
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Time between sweeps (default: 60s)
    pub interval: Duration,
    /// Silence longer than this is stale (default: 6 minutes)
    pub threshold: chrono::Duration,
    /// Upper bound on a single delivery (default: 30s)
    pub delivery_timeout: Duration,
    pub failure_policy: DeliveryFailurePolicy,
    /// Forget programs silent for longer than this; disabled when `None`
    pub eviction_ttl: Option<chrono::Duration>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            threshold: chrono::Duration::minutes(6),
            delivery_timeout: Duration::from_secs(30),
            failure_policy: DeliveryFailurePolicy::Retry,
            eviction_ttl: None,
        }
    }
}

/// Sweeper errors
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Alert delivery for {id:?} failed: {source}")]
    Delivery {
        id: String,
        #[source]
        source: NotifyError,
    },
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Programs alerted on this tick
    pub alerted: Vec<String>,
    /// Programs whose alert failed and will be retried
    pub failed: Vec<String>,
    /// Programs evicted as idle
    pub evicted: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.alerted.is_empty() && self.failed.is_empty() && self.evicted.is_empty()
    }
}

/// Periodically scans the ledger and alerts on silent programs.
///
/// Stale programs are collected under the ledger lock, alerts go out with the
/// lock released, and only delivered alerts mark their episode. Ticks never
/// overlap, so a program has at most one delivery in flight.
pub struct Sweeper {
    ledger: Arc<Ledger>,
    dispatcher: AlertDispatcher,
    config: SweepConfig,
}

impl Sweeper {
    pub fn new(ledger: Arc<Ledger>, dispatcher: AlertDispatcher, config: SweepConfig) -> Self {
        info!("Creating sweeper with config: {:?}", config);
        Self {
            ledger,
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Run a single sweep as of `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, SweepError> {
        let mut report = SweepReport::default();

        for program in self.ledger.collect_stale(self.config.threshold, now) {
            match self.dispatcher.dispatch(&program.id).await {
                Ok(()) => {
                    if !self.ledger.mark_alerted(&program.id, program.last_seen_at) {
                        debug!("{:?} changed during delivery, episode left open", program.id);
                    }
                    report.alerted.push(program.id);
                }
                Err(source) => match self.config.failure_policy {
                    DeliveryFailurePolicy::Retry => {
                        warn!("Will retry alert for {:?} on next sweep", program.id);
                        report.failed.push(program.id);
                    }
                    DeliveryFailurePolicy::Abort => {
                        return Err(SweepError::Delivery {
                            id: program.id,
                            source,
                        });
                    }
                },
            }
        }

        if let Some(ttl) = self.config.eviction_ttl {
            report.evicted = self.ledger.evict_idle(ttl, now);
            if !report.evicted.is_empty() {
                counter!("watchdog_programs_evicted_total").increment(report.evicted.len() as u64);
                info!("Evicted idle programs: {:?}", report.evicted);
            }
        }

        gauge!("watchdog_programs_tracked").set(self.ledger.len() as f64);
        Ok(report)
    }

    /// Sweep on every interval tick until `shutdown` resolves.
    ///
    /// Returns an error only under [`DeliveryFailurePolicy::Abort`].
    pub async fn run<S>(self, shutdown: S) -> Result<(), SweepError>
    where
        S: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        tokio::pin!(shutdown);
        info!("Sweeper running every {:?}", self.config.interval);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Sweeper stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.sweep_at(Utc::now()).await {
                        Ok(report) if !report.is_empty() => info!("Sweep finished: {:?}", report),
                        Ok(_) => {}
                        Err(e) => {
                            error!("Sweeper aborting: {}", e);
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::Notifier;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use ledger::RecordLog;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Records deliveries; fails while `failing` is set
    #[derive(Default)]
    struct RecordingNotifier {
        delivered: Mutex<Vec<String>>,
        failing: AtomicBool,
    }

    impl RecordingNotifier {
        fn delivered(&self) -> Vec<String> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &str {
            "recording"
        }

        async fn deliver(&self, id: &str) -> Result<(), NotifyError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(NotifyError::Transport("connection refused".to_string()));
            }
            self.delivered.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn sweeper(config: SweepConfig) -> (Arc<Ledger>, Arc<RecordingNotifier>, Sweeper) {
        let ledger = Arc::new(Ledger::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = AlertDispatcher::new(
            notifier.clone(),
            Arc::new(RecordLog::discard()),
            config.delivery_timeout,
        );
        let sweeper = Sweeper::new(Arc::clone(&ledger), dispatcher, config);
        (ledger, notifier, sweeper)
    }

    #[tokio::test]
    async fn test_single_alert_per_episode() {
        let (ledger, notifier, sweeper) = sweeper(SweepConfig::default());
        ledger.record_heartbeat_at("svc-a", t(0));

        for tick in [361, 420, 480] {
            sweeper.sweep_at(t(tick)).await.unwrap();
        }

        assert_eq!(notifier.delivered(), vec!["svc-a".to_string()]);
        assert!(ledger.get("svc-a").unwrap().alerted);
    }

    #[tokio::test]
    async fn test_alert_on_first_tick_past_threshold() {
        let (ledger, notifier, sweeper) = sweeper(SweepConfig::default());
        ledger.record_heartbeat_at("svc-a", t(0));

        for tick in (60..=360).step_by(60) {
            let report = sweeper.sweep_at(t(tick)).await.unwrap();
            assert!(report.alerted.is_empty(), "alerted early at {}", tick);
        }

        let report = sweeper.sweep_at(t(420)).await.unwrap();
        assert_eq!(report.alerted, vec!["svc-a".to_string()]);
        assert_eq!(notifier.delivered().len(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_starts_new_episode() {
        let (ledger, notifier, sweeper) = sweeper(SweepConfig::default());
        ledger.record_heartbeat_at("svc-a", t(0));
        sweeper.sweep_at(t(420)).await.unwrap();

        ledger.record_heartbeat_at("svc-a", t(430));
        sweeper.sweep_at(t(480)).await.unwrap();
        assert_eq!(notifier.delivered().len(), 1);

        sweeper.sweep_at(t(430 + 420)).await.unwrap();
        assert_eq!(notifier.delivered().len(), 2);
    }

    #[tokio::test]
    async fn test_only_silent_program_alerts() {
        let (ledger, notifier, sweeper) = sweeper(SweepConfig::default());
        ledger.record_heartbeat_at("a", t(0));
        ledger.record_heartbeat_at("b", t(0));
        ledger.record_heartbeat_at("a", t(300));

        sweeper.sweep_at(t(420)).await.unwrap();

        assert_eq!(notifier.delivered(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_retried() {
        let (ledger, notifier, sweeper) = sweeper(SweepConfig::default());
        ledger.record_heartbeat_at("svc-a", t(0));
        notifier.failing.store(true, Ordering::SeqCst);

        let report = sweeper.sweep_at(t(420)).await.unwrap();
        assert_eq!(report.failed, vec!["svc-a".to_string()]);
        assert!(!ledger.get("svc-a").unwrap().alerted);

        notifier.failing.store(false, Ordering::SeqCst);
        let report = sweeper.sweep_at(t(480)).await.unwrap();
        assert_eq!(report.alerted, vec!["svc-a".to_string()]);

        sweeper.sweep_at(t(540)).await.unwrap();
        assert_eq!(notifier.delivered().len(), 1);
    }

    #[tokio::test]
    async fn test_abort_policy_stops_sweep() {
        let config = SweepConfig {
            failure_policy: DeliveryFailurePolicy::Abort,
            ..Default::default()
        };
        let (ledger, notifier, sweeper) = sweeper(config);
        ledger.record_heartbeat_at("svc-a", t(0));
        notifier.failing.store(true, Ordering::SeqCst);

        let err = sweeper.sweep_at(t(420)).await.unwrap_err();
        assert!(matches!(err, SweepError::Delivery { ref id, .. } if id == "svc-a"));
        assert!(!ledger.get("svc-a").unwrap().alerted);
    }

    #[tokio::test]
    async fn test_eviction_when_configured() {
        let config = SweepConfig {
            eviction_ttl: Some(chrono::Duration::hours(1)),
            ..Default::default()
        };
        let (ledger, _, sweeper) = sweeper(config);
        ledger.record_heartbeat_at("old", t(0));
        ledger.record_heartbeat_at("fresh", t(3500));

        let report = sweeper.sweep_at(t(3700)).await.unwrap();
        assert_eq!(report.evicted, vec!["old".to_string()]);
        assert!(ledger.get("old").is_none());
    }

    #[tokio::test]
    async fn test_no_eviction_by_default() {
        let (ledger, _, sweeper) = sweeper(SweepConfig::default());
        ledger.record_heartbeat_at("old", t(0));

        let report = sweeper.sweep_at(t(1_000_000)).await.unwrap();
        assert!(report.evicted.is_empty());
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_alerts_once_and_stops_on_shutdown() {
        let (ledger, notifier, sweeper) = sweeper(SweepConfig::default());
        ledger.record_heartbeat_at("svc-a", Utc::now() - chrono::Duration::hours(1));

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(sweeper.run(async {
            let _ = rx.await;
        }));

        tokio::time::sleep(Duration::from_secs(60 * 3 + 1)).await;
        assert_eq!(notifier.delivered(), vec!["svc-a".to_string()]);

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_error_under_abort() {
        let config = SweepConfig {
            failure_policy: DeliveryFailurePolicy::Abort,
            ..Default::default()
        };
        let (ledger, notifier, sweeper) = sweeper(config);
        notifier.failing.store(true, Ordering::SeqCst);
        ledger.record_heartbeat_at("svc-a", Utc::now() - chrono::Duration::hours(1));

        let result = sweeper.run(std::future::pending::<()>()).await;
        assert!(matches!(result, Err(SweepError::Delivery { .. })));
    }
}
