//! n8n webhook backend
//!
//! Posts an [`N8nRequest`] to the workflow's webhook trigger. The workflow
//! replies later on `/api/webhook/n8n`; the synchronous response body is only
//! logged.

use super::backend::{truncate_body, BackendError, WorkflowBackend};
use crate::protocol::{N8nRequest, UserContext, WorkflowType};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Connection settings for the n8n webhook
#[derive(Debug, Clone)]
pub struct N8nConfig {
    /// Full webhook URL, e.g. `https://n8n.example.com/webhook/whatsapp`
    pub webhook_url: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for N8nConfig {
    fn default() -> Self {
        Self {
            webhook_url: "http://localhost:5678/webhook/whatsapp".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl N8nConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_webhook_url(mut self, webhook_url: impl Into<String>) -> Self {
        self.webhook_url = webhook_url.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

pub struct N8nBackend {
    config: N8nConfig,
    client: reqwest::Client,
}

impl N8nBackend {
    pub fn new(config: N8nConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl WorkflowBackend for N8nBackend {
    fn workflow_type(&self) -> WorkflowType {
        WorkflowType::N8n
    }

    async fn send_message_to_workflow(
        &self,
        user_context: &UserContext,
        message: &str,
    ) -> Result<(), BackendError> {
        let request = N8nRequest::new(user_context.clone(), message);
        debug!(
            url = %self.config.webhook_url,
            message_id = %request.message_id,
            phone = %user_context.phone,
            "Posting message to n8n webhook"
        );

        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&request)
            .timeout(self.config.timeout())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        info!(
            message_id = %request.message_id,
            phone = %user_context.phone,
            status = status.as_u16(),
            "Message accepted by n8n"
        );
        debug!(body = %truncate_body(&body), "n8n webhook response");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = N8nConfig::new()
            .with_webhook_url("https://n8n.example.com/webhook/wa")
            .with_timeout_ms(1500);

        assert_eq!(config.webhook_url, "https://n8n.example.com/webhook/wa");
        assert_eq!(config.timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn test_backend_type() {
        let backend = N8nBackend::new(N8nConfig::default());
        assert_eq!(backend.workflow_type(), WorkflowType::N8n);
    }
}
