//! Service configuration
//!
//! Defaults, then an optional TOML file, then `WATCHDOG_*` environment
//! variables, then the legacy `SMTP_*` variables.

use alerting::{DeliveryFailurePolicy, EmailNotifier, Notifier, SmtpConfig, SweepConfig, WebhookNotifier};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Upper bound for any configured duration (one year)
const MAX_DURATION_SECS: u64 = 365 * 24 * 3600;

const LEGACY_SMTP_VARS: [(&str, &str); 4] = [
    ("SMTP_FROM_EMAIL", "smtp.from"),
    ("SMTP_TO_EMAIL", "smtp.to"),
    ("SMTP_SERVER", "smtp.server"),
    ("SMTP_PASSWORD", "smtp.password"),
];

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Alert channel selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    #[default]
    Email,
    Webhook,
}

/// Watchdog service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// HTTP listen address (default: 0.0.0.0:8080)
    pub listen_addr: String,
    /// Seconds between sweeps (default: 60)
    pub sweep_interval_secs: u64,
    /// Seconds of silence before a program is stale (default: 360)
    pub stale_threshold_secs: u64,
    /// Upper bound on one alert delivery (default: 30)
    pub delivery_timeout_secs: u64,
    pub failure_policy: DeliveryFailurePolicy,
    /// Append-only access/alert record file
    pub record_log: PathBuf,
    /// Custom status page template, read on every request
    pub status_template: Option<PathBuf>,
    /// Forget programs silent for this long; never when unset
    pub eviction_ttl_secs: Option<u64>,
    pub notifier: NotifierKind,
    pub webhook_url: Option<String>,
    pub smtp: SmtpConfig,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            sweep_interval_secs: 60,
            stale_threshold_secs: 360,
            delivery_timeout_secs: 30,
            failure_policy: DeliveryFailurePolicy::Retry,
            record_log: PathBuf::from("watchdog.log"),
            status_template: None,
            eviction_ttl_secs: None,
            notifier: NotifierKind::Email,
            webhook_url: None,
            smtp: SmtpConfig::default(),
        }
    }
}

impl WatchdogConfig {
    /// Load from `WATCHDOG_CONFIG` (or `./watchdog.toml`) and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        let file = vars.get("WATCHDOG_CONFIG").map(PathBuf::from);
        Self::from_sources(file.as_deref(), vars)
    }

    /// Load from an explicit file and variable set. A missing explicit file is an error.
    pub fn from_sources(file: Option<&Path>, vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        builder = match file {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name("watchdog").required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix("WATCHDOG")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(Some(vars.clone())),
        );

        for (var, key) in LEGACY_SMTP_VARS {
            builder = builder.set_override_option(key, vars.get(var).cloned())?;
        }
        if let Some(port) = vars.get("SMTP_PORT") {
            let port: u16 = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("SMTP_PORT {:?} is not a port", port)))?;
            builder = builder.set_override("smtp.port", i64::from(port))?;
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid(format!("listen_addr {:?}: {}", self.listen_addr, e)))?;

        let durations = [
            ("sweep_interval_secs", Some(self.sweep_interval_secs)),
            ("stale_threshold_secs", Some(self.stale_threshold_secs)),
            ("delivery_timeout_secs", Some(self.delivery_timeout_secs)),
            ("eviction_ttl_secs", self.eviction_ttl_secs),
        ];
        for (key, value) in durations {
            match value {
                Some(0) => return Err(ConfigError::Invalid(format!("{} must be positive", key))),
                Some(secs) if secs > MAX_DURATION_SECS => {
                    return Err(ConfigError::Invalid(format!("{} is larger than one year", key)))
                }
                _ => {}
            }
        }

        if self.notifier == NotifierKind::Webhook && self.webhook_url.is_none() {
            return Err(ConfigError::Invalid(
                "webhook notifier requires webhook_url".to_string(),
            ));
        }
        Ok(())
    }

    pub fn stale_threshold(&self) -> chrono::Duration {
        secs(self.stale_threshold_secs)
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            interval: Duration::from_secs(self.sweep_interval_secs),
            threshold: self.stale_threshold(),
            delivery_timeout: Duration::from_secs(self.delivery_timeout_secs),
            failure_policy: self.failure_policy,
            eviction_ttl: self.eviction_ttl_secs.map(secs),
        }
    }

    /// Build the configured alert channel
    pub fn build_notifier(&self) -> Arc<dyn Notifier> {
        match (self.notifier, &self.webhook_url) {
            (NotifierKind::Webhook, Some(url)) => {
                Arc::new(WebhookNotifier::new(url.clone(), self.stale_threshold()))
            }
            _ => Arc::new(EmailNotifier::new(self.smtp.clone(), self.stale_threshold())),
        }
    }
}

// Bounded by validate()
fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(value.min(MAX_DURATION_SECS) as i64)
}
