//! Owner notifications.

use async_trait::async_trait;
use pushq_config::MailSettings;
use pushq_core::stage::Notifier;
use pushq_core::{Error, JobRecord};
use serde::Serialize;
use tracing::info;
use url::Url;

const DEFAULT_FROM: &str = "noreply@pushq.local";

/// A notification ready to be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
}

fn submitted_message(from: &str, job: &JobRecord) -> pushq_core::Result<MailMessage> {
    let payload = job.submit_payload()?;
    let branch = job
        .properties
        .get("remote.branch")
        .and_then(|v| v.as_str())
        .unwrap_or("(unknown)");
    Ok(MailMessage {
        from: from.to_string(),
        to: payload.owner_email,
        subject: format!("Submission {} received", job.id),
        text: format!(
            "Your code for {} was pushed to branch {} and is being processed.",
            payload.repository, branch
        ),
    })
}

fn error_message(from: &str, job: &JobRecord, error: &Error) -> pushq_core::Result<MailMessage> {
    let payload = job.submit_payload()?;
    Ok(MailMessage {
        from: from.to_string(),
        to: payload.owner_email,
        subject: format!("Submission {} failed", job.id),
        text: format!(
            "Your submission for {} could not be processed: {}",
            payload.repository, error
        ),
    })
}

/// Delivers notifications as a JSON POST to a mail relay.
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: Url,
    from: String,
}

impl HttpMailer {
    pub fn new(endpoint: Url, from: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            from: from.into(),
        }
    }

    /// Build a mailer from settings; `None` when no endpoint is configured.
    pub fn from_settings(settings: &MailSettings) -> Result<Option<Self>, MailError> {
        let Some(endpoint) = &settings.endpoint else {
            return Ok(None);
        };
        let from = settings.from.as_deref().unwrap_or(DEFAULT_FROM);
        Ok(Some(Self::new(Url::parse(endpoint)?, from)))
    }

    async fn deliver(&self, message: &MailMessage) -> Result<(), MailError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(message)
            .send()
            .await
            .map_err(|e| MailError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MailError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpMailer {
    async fn send_submitted(&self, job: &JobRecord) -> pushq_core::Result<()> {
        let message = submitted_message(&self.from, job)?;
        self.deliver(&message).await?;
        info!(job_id = %job.id, to = %message.to, "Sent submitted notification");
        Ok(())
    }

    async fn send_error(&self, job: &JobRecord, error: &Error) -> pushq_core::Result<()> {
        let message = error_message(&self.from, job, error)?;
        self.deliver(&message).await?;
        info!(job_id = %job.id, to = %message.to, "Sent error notification");
        Ok(())
    }
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Clone)]
pub struct LogMailer {
    from: String,
}

impl Default for LogMailer {
    fn default() -> Self {
        Self {
            from: DEFAULT_FROM.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for LogMailer {
    async fn send_submitted(&self, job: &JobRecord) -> pushq_core::Result<()> {
        let message = submitted_message(&self.from, job)?;
        info!(job_id = %job.id, to = %message.to, subject = %message.subject, "{}", message.text);
        Ok(())
    }

    async fn send_error(&self, job: &JobRecord, error: &Error) -> pushq_core::Result<()> {
        let message = error_message(&self.from, job, error)?;
        info!(job_id = %job.id, to = %message.to, subject = %message.subject, "{}", message.text);
        Ok(())
    }
}

/// Mail delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid mail endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    #[error("Mail request failed: {0}")]
    Request(String),

    #[error("Mail relay returned HTTP {0}")]
    Status(u16),
}

impl From<MailError> for pushq_core::Error {
    fn from(err: MailError) -> Self {
        Error::Notification(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushq_core::{JobId, SubmitPayload};
    use std::collections::HashMap;

    fn job() -> JobRecord {
        let payload = SubmitPayload {
            source_url: "https://example.com/source.zip".to_string(),
            repository: "acme/widgets".to_string(),
            owner_email: "owner@example.com".to_string(),
            build: HashMap::new(),
        };
        let mut job = JobRecord::submit(JobId::from(8), &payload).unwrap();
        job.properties.insert("remote.branch", "submission/8");
        job
    }

    #[test]
    fn test_messages_address_the_owner() {
        let submitted = submitted_message("ci@example.com", &job()).unwrap();
        assert_eq!(submitted.to, "owner@example.com");
        assert_eq!(submitted.from, "ci@example.com");
        assert!(submitted.text.contains("submission/8"));

        let failed = error_message(
            "ci@example.com",
            &job(),
            &Error::Network("connection reset".to_string()),
        )
        .unwrap();
        assert_eq!(failed.subject, "Submission 8 failed");
        assert!(failed.text.contains("connection reset"));
    }

    #[test]
    fn test_from_settings_without_endpoint() {
        assert!(HttpMailer::from_settings(&MailSettings::default())
            .unwrap()
            .is_none());

        let settings = MailSettings {
            endpoint: Some("not a url".to_string()),
            from: None,
        };
        assert!(HttpMailer::from_settings(&settings).is_err());
    }

    #[tokio::test]
    async fn test_log_mailer_accepts_submit_jobs() {
        let mailer = LogMailer::default();
        mailer.send_submitted(&job()).await.unwrap();
        mailer
            .send_error(&job(), &Error::Publish("rejected".to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_a_notification_error() {
        let mailer = HttpMailer::new(Url::parse("http://127.0.0.1:9/send").unwrap(), "ci@example.com");
        let err = mailer.send_submitted(&job()).await.unwrap_err();
        assert!(matches!(err, Error::Notification(_)));
    }
}
