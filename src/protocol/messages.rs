//! Wire records exchanged with workflow backends, the store and API clients
//!
//! Field names follow the JSON contracts the backends already speak, which is
//! why the Flowise override config is camelCase while everything else is
//! snake_case.

use super::jid::Jid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Workflow backend a message is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowType {
    N8n,
    Flowise,
}

impl WorkflowType {
    /// Backend used when the configured type is missing or unrecognized
    pub const DEFAULT: WorkflowType = WorkflowType::N8n;

    /// Parse a stored workflow type, ignoring case and surrounding whitespace
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "n8n" => Some(WorkflowType::N8n),
            "flowise" => Some(WorkflowType::Flowise),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowType::N8n => "n8n",
            WorkflowType::Flowise => "flowise",
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who sent a message, as seen by the workflows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: Uuid,
    pub name: String,
    pub phone: String,
    pub email: String,
}

impl UserContext {
    /// Render the context as Flowise `vars`
    pub fn to_vars(&self) -> Map<String, Value> {
        let mut vars = Map::new();
        vars.insert("user_id".into(), Value::String(self.user_id.to_string()));
        vars.insert("name".into(), Value::String(self.name.clone()));
        vars.insert("phone".into(), Value::String(self.phone.clone()));
        vars.insert("email".into(), Value::String(self.email.clone()));
        vars
    }
}

/// Payload posted to the n8n webhook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct N8nRequest {
    pub user_context: UserContext,
    pub message: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

impl N8nRequest {
    /// Build a request with a fresh message id stamped now
    pub fn new(user_context: UserContext, message: impl Into<String>) -> Self {
        Self {
            user_context,
            message: message.into(),
            message_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Asynchronous reply posted back by an n8n workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct N8nResponse {
    #[serde(default)]
    pub message_id: String,
    pub phone: String,
    #[serde(default)]
    pub response: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload posted to the Flowise prediction endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowiseRequest {
    pub question: String,
    #[serde(
        rename = "overrideConfig",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub override_config: Option<FlowiseOverrideConfig>,
}

impl FlowiseRequest {
    /// Question keyed to the sender's phone so Flowise keeps one chat memory per user
    pub fn for_user(user_context: &UserContext, question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            override_config: Some(FlowiseOverrideConfig {
                session_id: Some(user_context.phone.clone()),
                vars: Some(user_context.to_vars()),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowiseOverrideConfig {
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vars: Option<Map<String, Value>>,
}

/// Asynchronous reply posted back by a Flowise flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowiseResponse {
    #[serde(default)]
    pub text: String,
    #[serde(rename = "chatId", default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub message_id: String,
    pub phone: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persisted workflow routing record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub id: i64,
    /// Kept as a string; unknown values are a routing concern, not a parse error
    pub workflow_type: String,
    #[serde(default)]
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

/// Registered user directory entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub email: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl From<&User> for UserContext {
    fn from(user: &User) -> Self {
        UserContext {
            user_id: user.id,
            name: user.name.clone(),
            phone: user.phone.clone(),
            email: user.email.clone(),
        }
    }
}

/// Envelope for every admin API body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T = Value> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            error: None,
        }
    }

    pub fn ok_message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Acknowledgement returned by the transport for an outbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

/// Paired device record; `id` stays empty until pairing completes
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(default)]
    pub id: Option<Jid>,
}

impl DeviceRecord {
    pub fn paired(id: Jid) -> Self {
        Self { id: Some(id) }
    }

    pub fn is_paired(&self) -> bool {
        self.id.is_some()
    }
}
