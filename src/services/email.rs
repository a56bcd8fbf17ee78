// Email Service - SMTP delivery for send_email actions

use async_trait::async_trait;
use lettre::{
    message::Mailbox,
    transport::smtp::{authentication::Credentials, PoolConfig},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use crate::config::SmtpConfig;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("message build error: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

/// Outbound mail seam used by the action dispatcher.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, recipients: &[String], subject: &str, body: &str)
        -> Result<(), MailError>;
}

#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
}

impl SmtpMailer {
    pub fn new(smtp_config: &SmtpConfig) -> Self {
        let creds = Credentials::new(
            smtp_config.username.clone(),
            smtp_config.password.clone(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp_config.host)
            .port(smtp_config.port)
            .credentials(creds)
            .pool_config(PoolConfig::new().max_size(10))
            .timeout(Some(Duration::from_secs(10)))
            .build();

        Self {
            transport,
            from_email: smtp_config.from_email.clone(),
            from_name: smtp_config.from_name.clone(),
        }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), MailError> {
        let from: Mailbox = format!("{} <{}>", self.from_name, self.from_email).parse()?;

        let mut builder = Message::builder().from(from).subject(subject);
        for recipient in recipients {
            builder = builder.to(recipient.parse()?);
        }
        let message = builder.body(body.to_string())?;

        match self.transport.send(message).await {
            Ok(_) => {
                info!("Email '{}' sent to {} recipient(s)", subject, recipients.len());
                Ok(())
            }
            Err(e) => {
                error!("Failed to send email '{}': {}", subject, e);
                Err(e.into())
            }
        }
    }
}

/// Records sent mail instead of talking to a relay.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: std::sync::Mutex<Vec<(Vec<String>, String, String)>>,
    pub fail: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), MailError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(MailError::Message(lettre::error::Error::MissingTo));
        }
        let mut sent = match self.sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sent.push((recipients.to_vec(), subject.to_string(), body.to_string()));
        Ok(())
    }
}
