//! SMS delivery for SOS alerts.
//!
//! The provider is behind a trait so the fanout can run against a recorder
//! in tests and a no-op sender in deployments without an SMS account.

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use crate::error::SmsError;

/// A provider that can deliver one SMS.
#[async_trait]
pub trait SmsSender: Send + Sync {
    /// Send `message` to the E.164 number `to`.
    ///
    /// # Errors
    ///
    /// Returns [`SmsError::Transport`] when the provider is unreachable and
    /// [`SmsError::Provider`] when it answers with a failure.
    async fn send(&self, to: &str, message: &str) -> Result<(), SmsError>;
}

/// HTTP SMS provider: `POST {api_url}` with a JSON body and a bearer key.
pub struct HttpSmsSender {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl HttpSmsSender {
    /// Build a sender for the given provider endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SmsError::Transport`] if the HTTP client cannot be built.
    pub fn new(api_url: String, api_key: String) -> Result<Self, SmsError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| SmsError::Transport(format!("HTTP client build failed: {e}")))?;
        Ok(Self {
            client,
            api_url,
            api_key,
        })
    }
}

#[async_trait]
impl SmsSender for HttpSmsSender {
    async fn send(&self, to: &str, message: &str) -> Result<(), SmsError> {
        let response = self
            .client
            .post(&self.api_url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({ "to": to, "message": message }))
            .send()
            .await
            .map_err(|e| SmsError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SmsError::Provider {
            status: status.as_u16(),
            message: body,
        })
    }
}

/// Sender used when no SMS provider is configured: logs and reports success.
pub struct NoopSmsSender;

#[async_trait]
impl SmsSender for NoopSmsSender {
    async fn send(&self, to: &str, message: &str) -> Result<(), SmsError> {
        info!(to, chars = message.len(), "SMS provider not configured, dropping message");
        Ok(())
    }
}
