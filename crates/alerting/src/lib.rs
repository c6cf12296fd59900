//! Alerting System
//!
//! Finds programs that went silent, delivers one alert per silence episode
//! through a pluggable [`Notifier`], and records every delivery.

mod dispatcher;
mod email;
mod notifier;
mod sweeper;
mod webhook;

pub use dispatcher::AlertDispatcher;
pub use email::{EmailNotifier, SmtpConfig, SmtpTls};
pub use notifier::{alert_message, Notifier, NotifyError};
pub use sweeper::{DeliveryFailurePolicy, SweepConfig, SweepError, SweepReport, Sweeper};
pub use webhook::WebhookNotifier;
