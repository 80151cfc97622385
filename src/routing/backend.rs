//! Workflow backend capability
//!
//! n8n and Flowise are both "hand this user's message to an automation and
//! return once it has been accepted". Replies come back asynchronously through
//! the webhook surface, so a backend call carries no response payload.

use crate::protocol::{UserContext, WorkflowType};
use async_trait::async_trait;
use thiserror::Error;

/// Failure invoking a workflow backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {message}")]
    Request { message: String },

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend call timed out")]
    Timeout,

    #[error("backend call cancelled")]
    Cancelled,

    #[error("{backend} backend is not configured")]
    NotConfigured { backend: WorkflowType },
}

impl BackendError {
    pub fn request<S: Into<String>>(message: S) -> Self {
        Self::Request {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::request(error.to_string())
        }
    }
}

/// An automation engine that accepts user messages
#[async_trait]
pub trait WorkflowBackend: Send + Sync {
    /// Which workflow type this backend serves
    fn workflow_type(&self) -> WorkflowType;

    /// Hand a message to the workflow
    async fn send_message_to_workflow(
        &self,
        user_context: &UserContext,
        message: &str,
    ) -> Result<(), BackendError>;
}

/// Stand-in for a backend with no configuration section
///
/// Routing to it fails with [`BackendError::NotConfigured`], which surfaces
/// the same way as any other dispatch failure.
pub struct UnconfiguredBackend {
    workflow_type: WorkflowType,
}

impl UnconfiguredBackend {
    pub fn new(workflow_type: WorkflowType) -> Self {
        Self { workflow_type }
    }
}

#[async_trait]
impl WorkflowBackend for UnconfiguredBackend {
    fn workflow_type(&self) -> WorkflowType {
        self.workflow_type
    }

    async fn send_message_to_workflow(
        &self,
        _user_context: &UserContext,
        _message: &str,
    ) -> Result<(), BackendError> {
        Err(BackendError::NotConfigured {
            backend: self.workflow_type,
        })
    }
}

/// Keep error bodies short enough for a log line
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX_BODY: usize = 256;
    if body.len() <= MAX_BODY {
        return body.to_string();
    }
    let mut cut = MAX_BODY;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &body[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_unconfigured_backend_fails() {
        let backend = UnconfiguredBackend::new(WorkflowType::Flowise);
        let context = UserContext {
            user_id: Uuid::new_v4(),
            name: "Dummy".into(),
            phone: "628".into(),
            email: "dummy@email.com".into(),
        };

        let result = backend.send_message_to_workflow(&context, "hi").await;
        assert!(matches!(
            result,
            Err(BackendError::NotConfigured {
                backend: WorkflowType::Flowise
            })
        ));
        assert_eq!(
            result.unwrap_err().to_string(),
            "flowise backend is not configured"
        );
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("short"), "short");
        let long = "ü".repeat(300);
        let truncated = truncate_body(&long);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 259);
    }
}
