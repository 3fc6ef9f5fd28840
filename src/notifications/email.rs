//! Outgoing email: transport seam plus template rendering.

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::config::EmailConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;
}

/// Used when no SMTP host is configured. Emails are logged, never sent.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        info!("Email (not sent, SMTP disabled) to {}: {}", email.to, email.subject);
        debug!("Email body:\n{}", email.body);
        Ok(())
    }
}

#[cfg(feature = "mail")]
pub use smtp::SmtpMailer;

#[cfg(feature = "mail")]
mod smtp {
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use lettre::{
        message::{header::ContentType, Mailbox, Message},
        transport::smtp::authentication::Credentials,
        AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
    };

    use super::{Mailer, OutgoingEmail};
    use crate::core::config::EmailConfig;

    pub struct SmtpMailer {
        transport: AsyncSmtpTransport<Tokio1Executor>,
        from: Mailbox,
    }

    impl SmtpMailer {
        pub fn new(host: &str, config: &EmailConfig) -> Result<Self> {
            let from: Mailbox = config
                .from
                .parse()
                .map_err(|e| anyhow!("Invalid SMTP_FROM address: {e}"))?;

            let transport = match (&config.username, &config.password) {
                (Some(user), Some(pass)) => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                    .map_err(|e| anyhow!("SMTP relay error: {e}"))?
                    .port(config.smtp_port)
                    .credentials(Credentials::new(user.clone(), pass.clone()))
                    .build(),
                _ => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                    .port(config.smtp_port)
                    .build(),
            };
            Ok(Self { transport, from })
        }
    }

    #[async_trait]
    impl Mailer for SmtpMailer {
        async fn send(&self, email: &OutgoingEmail) -> Result<()> {
            let message = Message::builder()
                .from(self.from.clone())
                .to(email
                    .to
                    .parse()
                    .map_err(|e| anyhow!("Invalid to address {}: {e}", email.to))?)
                .subject(email.subject.clone())
                .header(ContentType::TEXT_PLAIN)
                .body(email.body.clone())
                .map_err(|e| anyhow!("Failed to build email: {e}"))?;

            self.transport
                .send(message)
                .await
                .map_err(|e| anyhow!("Failed to send email: {e}"))?;
            Ok(())
        }
    }
}

/// Picks the SMTP mailer when a host is configured, the log mailer otherwise.
pub fn mailer_from_config(config: &EmailConfig) -> Arc<dyn Mailer> {
    let Some(host) = config.smtp_server.as_deref() else {
        info!("SMTP_HOST not set, emails will be logged only");
        return Arc::new(LogMailer);
    };

    #[cfg(feature = "mail")]
    {
        match SmtpMailer::new(host, config) {
            Ok(mailer) => {
                info!("SMTP mailer configured for {}:{}", host, config.smtp_port);
                Arc::new(mailer)
            }
            Err(e) => {
                warn!("SMTP mailer unavailable ({e}), falling back to log mailer");
                Arc::new(LogMailer)
            }
        }
    }

    #[cfg(not(feature = "mail"))]
    {
        warn!("SMTP_HOST={host} set but built without the mail feature; logging emails");
        Arc::new(LogMailer)
    }
}

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("Invalid placeholder regex"));

/// Replaces `{{name}}` with the matching value. Unknown names are left in
/// place so a broken template is visible in the delivered mail.
pub fn render(template: &str, vars: &BTreeMap<&'static str, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            vars.get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Loads `<dir>/<event>.txt` when present.
#[derive(Debug, Clone, Default)]
pub struct TemplateRenderer {
    dir: Option<PathBuf>,
}

impl TemplateRenderer {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub async fn render(
        &self,
        event: &str,
        vars: &BTreeMap<&'static str, String>,
        fallback: &str,
    ) -> String {
        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{event}.txt"));
            match tokio::fs::read_to_string(&path).await {
                Ok(template) => return render(&template, vars),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not read template {}: {e}", path.display()),
            }
        }
        render(fallback, vars)
    }
}
