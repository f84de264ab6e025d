pub mod digest;
pub mod templates;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::EmailConfig;

pub use templates::DigestStats;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Email delivery is not configured (RESEND_API_KEY is missing)")]
    NotConfigured,

    #[error("Email provider rejected the message ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Email-delivery capability.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), MailError>;
}

/// Used when no provider key is configured: every send fails, which callers
/// either surface or log depending on how essential the message is.
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, _message: EmailMessage) -> Result<(), MailError> {
        Err(MailError::NotConfigured)
    }
}

/// Sends through the Resend HTTP API.
pub struct ResendMailer {
    client: reqwest::Client,
    api_key: String,
    from: String,
    endpoint: String,
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

impl ResendMailer {
    pub fn new(api_key: impl Into<String>, config: &EmailConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            from: config.from_address.clone(),
            endpoint: format!("{}/emails", config.api_base_url.trim_end_matches('/')),
        }
    }

    /// `DisabledMailer` when no key is configured.
    pub fn from_config(config: &EmailConfig) -> std::sync::Arc<dyn Mailer> {
        match &config.resend_api_key {
            Some(key) => std::sync::Arc::new(ResendMailer::new(key.clone(), config)),
            None => {
                tracing::warn!("RESEND_API_KEY is not set; outbound email is disabled");
                std::sync::Arc::new(DisabledMailer)
            }
        }
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), MailError> {
        let body = ResendRequest {
            from: &self.from,
            to: [&message.to],
            subject: &message.subject,
            html: &message.html,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(subject = %message.subject, "Email accepted by provider");
            return Ok(());
        }

        let detail = response.json::<Value>().await.ok();
        let message = detail
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("no error detail")
            .to_string();
        Err(MailError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
