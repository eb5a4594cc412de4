//! Outgoing email: verification codes and "your result is ready" messages.
//!
//! Delivery is best effort. Callers log a failed send and carry on; nothing
//! is retried or queued.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

pub mod smtp;
pub mod templates;

pub use smtp::{SmtpMailer, SmtpSettings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("SMTP error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), MailError>;
}

/// Used when no SMTP relay is configured. Logs the envelope only; bodies can
/// carry one-time codes.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        info!(to = %email.to, subject = %email.subject, "Email not sent, no SMTP relay configured");
        Ok(())
    }
}

/// Renders and sends the pipeline's messages.
pub struct MailService {
    mailer: Arc<dyn Mailer>,
    frontend_url: String,
    otp_ttl: Duration,
}

impl MailService {
    pub fn new(mailer: Arc<dyn Mailer>, frontend_url: &str, otp_ttl: Duration) -> Self {
        Self {
            mailer,
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
            otp_ttl,
        }
    }

    pub async fn send_otp(&self, to: &str, code: &str) -> Result<(), MailError> {
        let minutes = (self.otp_ttl.as_secs() / 60).max(1);
        self.mailer.send(templates::otp(to, code, minutes)).await
    }

    pub async fn send_cv_processed(
        &self,
        to: &str,
        name: &str,
        cv_id: Uuid,
    ) -> Result<(), MailError> {
        let link = format!("{}/cvs/{cv_id}", self.frontend_url);
        self.mailer
            .send(templates::cv_processed(to, name, &link))
            .await
    }

    pub async fn send_task_completed(
        &self,
        to: &str,
        label: &str,
        task_id: Uuid,
    ) -> Result<(), MailError> {
        let link = format!("{}/ai/tasks/{task_id}", self.frontend_url);
        self.mailer
            .send(templates::task_completed(to, label, &link))
            .await
    }
}
