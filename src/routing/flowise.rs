//! Flowise prediction backend
//!
//! Posts a [`FlowiseRequest`] to `{base_url}/api/v1/prediction/{chatflow_id}`.
//! The sender's phone doubles as the Flowise session id so each user keeps a
//! separate chat memory, and the user context is exposed to the flow as
//! `vars`.

use super::backend::{truncate_body, BackendError, WorkflowBackend};
use crate::protocol::{FlowiseRequest, UserContext, WorkflowType};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Connection settings for a Flowise chatflow
#[derive(Debug, Clone)]
pub struct FlowiseConfig {
    /// Flowise server root, e.g. `http://localhost:3000`
    pub base_url: String,
    pub chatflow_id: String,
    /// Bearer key for protected chatflows
    pub api_key: Option<String>,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for FlowiseConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            chatflow_id: String::new(),
            api_key: None,
            timeout_ms: 60_000,
        }
    }
}

impl FlowiseConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_chatflow_id(mut self, chatflow_id: impl Into<String>) -> Self {
        self.chatflow_id = chatflow_id.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Full prediction endpoint for the configured chatflow
    pub fn prediction_url(&self) -> String {
        format!(
            "{}/api/v1/prediction/{}",
            self.base_url.trim_end_matches('/'),
            self.chatflow_id
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

pub struct FlowiseBackend {
    config: FlowiseConfig,
    client: reqwest::Client,
}

impl FlowiseBackend {
    pub fn new(config: FlowiseConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl WorkflowBackend for FlowiseBackend {
    fn workflow_type(&self) -> WorkflowType {
        WorkflowType::Flowise
    }

    async fn send_message_to_workflow(
        &self,
        user_context: &UserContext,
        message: &str,
    ) -> Result<(), BackendError> {
        let url = self.config.prediction_url();
        let request = FlowiseRequest::for_user(user_context, message);
        debug!(url = %url, phone = %user_context.phone, "Posting question to Flowise");

        let mut builder = self
            .client
            .post(&url)
            .json(&request)
            .timeout(self.config.timeout());
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        info!(
            phone = %user_context.phone,
            chatflow_id = %self.config.chatflow_id,
            status = status.as_u16(),
            "Question accepted by Flowise"
        );
        debug!(body = %truncate_body(&body), "Flowise prediction response");
        Ok(())
    }
}
