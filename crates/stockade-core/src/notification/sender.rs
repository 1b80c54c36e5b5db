//! Email transports

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

use super::EmailMessage;
use crate::config::NotificationConfig;
use crate::{Error, Result};

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &EmailMessage) -> Result<()>;
}

/// SMTP transport via lettre
pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailSender {
    pub fn new(config: &NotificationConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| Error::notification(format!("SMTP relay config: {}", e)))?
            .port(config.smtp_port);

        if !config.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ));
        }

        let from: Mailbox = format!("{} <{}>", config.from_name, config.from_address)
            .parse()
            .map_err(|e| Error::notification(format!("Bad from address: {}", e)))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl EmailTransport for SmtpEmailSender {
    async fn send(&self, email: &EmailMessage) -> Result<()> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| Error::notification(format!("Bad recipient {}: {}", email.to, e)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .body(email.body.clone())
            .map_err(|e| Error::notification(format!("Message build failed: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| Error::notification(format!("SMTP send failed: {}", e)))?;

        info!(to = %email.to, subject = %email.subject, "Email sent");

        Ok(())
    }
}

/// Development transport that only logs
pub struct LogEmailSender;

#[async_trait]
impl EmailTransport for LogEmailSender {
    async fn send(&self, email: &EmailMessage) -> Result<()> {
        info!(to = %email.to, subject = %email.subject, "Email (log transport)");
        debug!(body = %email.body, "Email body");
        Ok(())
    }
}
