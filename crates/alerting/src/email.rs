//! Email delivery over SMTP

use crate::notifier::{alert_message, Notifier, NotifyError};
use async_trait::async_trait;
use chrono::Duration;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::debug;

const SUBJECT: &str = "Server Alert";

/// How the SMTP connection is secured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpTls {
    /// Upgrade with STARTTLS when the server offers it, plain otherwise
    #[default]
    Opportunistic,
    /// Fail delivery unless the server offers STARTTLS
    Required,
    /// Never upgrade; local relays only
    None,
}

/// SMTP settings. Every field is required at delivery time, none at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// Sender address, also used as the SMTP username
    pub from: Option<String>,
    /// Recipient address
    pub to: Option<String>,
    /// SMTP server host
    pub server: Option<String>,
    /// SMTP server port
    pub port: Option<u16>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Connection security (default: opportunistic)
    pub tls: SmtpTls,
}

struct ResolvedSmtp<'a> {
    from: &'a str,
    to: &'a str,
    server: &'a str,
    port: u16,
    password: &'a str,
    tls: SmtpTls,
}

impl SmtpConfig {
    fn resolve(&self) -> Result<ResolvedSmtp<'_>, NotifyError> {
        fn required<'a>(value: &'a Option<String>, key: &str) -> Result<&'a str, NotifyError> {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| NotifyError::Config(format!("smtp.{} is not set", key)))
        }

        Ok(ResolvedSmtp {
            from: required(&self.from, "from")?,
            to: required(&self.to, "to")?,
            server: required(&self.server, "server")?,
            port: self
                .port
                .ok_or_else(|| NotifyError::Config("smtp.port is not set".to_string()))?,
            password: required(&self.password, "password")?,
            tls: self.tls,
        })
    }
}

fn mailbox(address: &str, role: &str) -> Result<Mailbox, NotifyError> {
    address
        .parse()
        .map_err(|e| NotifyError::Config(format!("invalid {} address {:?}: {}", role, address, e)))
}

fn transport(smtp: &ResolvedSmtp<'_>) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
    let transport_error = |e: lettre::transport::smtp::Error| NotifyError::Transport(e.to_string());

    let builder = match smtp.tls {
        SmtpTls::Required => {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(smtp.server).map_err(transport_error)?
        }
        SmtpTls::Opportunistic => {
            let parameters = TlsParameters::new(smtp.server.to_string()).map_err(transport_error)?;
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp.server)
                .tls(Tls::Opportunistic(parameters))
        }
        SmtpTls::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp.server),
    };

    Ok(builder
        .port(smtp.port)
        .credentials(Credentials::new(
            smtp.from.to_string(),
            smtp.password.to_string(),
        ))
        .build())
}

/// Sends one plain-text email per alert
pub struct EmailNotifier {
    config: SmtpConfig,
    threshold: Duration,
}

impl EmailNotifier {
    pub fn new(config: SmtpConfig, threshold: Duration) -> Self {
        Self { config, threshold }
    }

    fn build_message(&self, smtp: &ResolvedSmtp<'_>, id: &str) -> Result<Message, NotifyError> {
        Message::builder()
            .from(mailbox(smtp.from, "sender")?)
            .to(mailbox(smtp.to, "recipient")?)
            .subject(SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(alert_message(id, self.threshold))
            .map_err(|e| NotifyError::Transport(e.to_string()))
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    async fn deliver(&self, id: &str) -> Result<(), NotifyError> {
        let smtp = self.config.resolve()?;
        let message = self.build_message(&smtp, id)?;

        let transport = transport(&smtp)?;

        debug!("Sending alert email for {:?} via {}:{}", id, smtp.server, smtp.port);
        transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        Ok(())
    }
}
