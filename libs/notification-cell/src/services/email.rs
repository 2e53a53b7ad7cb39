use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, error, info};

use shared_config::AppConfig;

use crate::error::NotificationError;

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, text: &str) -> Result<(), NotificationError>;
}

#[derive(Debug, Serialize)]
struct EmailPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

/// Posts messages to an HTTP email provider as JSON with a bearer key.
#[derive(Debug)]
pub struct HttpEmailSender {
    client: Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpEmailSender {
    pub fn new(config: &AppConfig) -> Result<Self, NotificationError> {
        if !config.is_email_configured() {
            return Err(NotificationError::NotConfigured("email"));
        }

        Ok(Self {
            client: Client::new(),
            api_url: config.email_api_url.clone(),
            api_key: config.email_api_key.clone(),
            from: config.email_from.clone(),
        })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, to: &str, subject: &str, text: &str) -> Result<(), NotificationError> {
        debug!("Sending email to {} via {}", to, self.api_url);

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&EmailPayload {
                from: &self.from,
                to,
                subject,
                text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Email provider rejected message to {}: {} - {}", to, status, body);
            return Err(NotificationError::EmailProvider(format!("HTTP {}: {}", status, body)));
        }

        info!("Email sent to {}", to);
        Ok(())
    }
}
