//! Bridge configuration
//!
//! One TOML file, loaded with [`BridgeConfig::load_from_file`] or discovered
//! with [`BridgeConfig::discover`]. Every section has defaults except
//! `[service]`. Secrets never live in the file: `username_env`,
//! `password_env` and `api_key_env` name environment variables that are read
//! when the collaborators are built.
//!
//! ```toml
//! [service]
//! id = "wabridge-main"
//!
//! [mqtt]
//! broker_url = "mqtt://localhost:1883"
//! session_id = "main"
//!
//! [workflow]
//! store = "file"
//! path = "workflow.toml"
//!
//! [n8n]
//! webhook_url = "http://localhost:5678/webhook/whatsapp"
//!
//! [identity]
//! mode = "directory"
//!
//! [[users]]
//! name = "Ana"
//! phone = "628123456"
//! email = "ana@example.com"
//! ```

use crate::processing::DispatcherConfig;
use crate::protocol::{validate_session_id, User, WorkflowType};
use crate::routing::{FlowiseConfig, N8nConfig};
use crate::transport::mqtt::{ReconnectConfig, SidecarOptions};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use url::Url;
use uuid::Uuid;

/// Searched in order when no explicit path is given
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["wabridge.toml", "config/wabridge.toml"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    pub service: ServiceSection,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub workflow: WorkflowSection,
    #[serde(default)]
    pub n8n: N8nSection,
    /// Absent means Flowise is not configured; routing to it then fails
    pub flowise: Option<FlowiseSection>,
    #[serde(default)]
    pub identity: IdentitySection,
    #[serde(default)]
    pub users: Vec<UserEntry>,
    #[serde(default)]
    pub http: HttpSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSection {
    /// Service identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    /// Deadline for one backend call
    #[serde(default = "default_route_timeout_ms")]
    pub route_timeout_ms: u64,
    /// Idle time before a sender lane retires
    #[serde(default = "default_lane_idle_timeout_ms")]
    pub lane_idle_timeout_ms: u64,
    /// Capacity of the transport event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    /// Environment variable containing the broker username
    pub username_env: Option<String>,
    /// Environment variable containing the broker password
    pub password_env: Option<String>,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Sidecar session this bridge drives
    #[serde(default = "default_session_id")]
    pub session_id: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// How long bootstrap waits for the retained device record
    #[serde(default = "default_device_wait_ms")]
    pub device_wait_ms: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            username_env: None,
            password_env: None,
            topic_prefix: default_topic_prefix(),
            session_id: default_session_id(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            device_wait_ms: default_device_wait_ms(),
        }
    }
}

/// Where the active workflow type comes from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStoreKind {
    /// Fixed value from this file
    #[default]
    Static,
    /// `[[workflow]]` records in a separate TOML file, writable via the API
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSection {
    #[serde(default)]
    pub store: WorkflowStoreKind,
    /// Record file for the `file` store
    pub path: Option<PathBuf>,
    /// Value served by the `static` store
    #[serde(default = "default_workflow_type")]
    pub workflow_type: String,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            store: WorkflowStoreKind::default(),
            path: None,
            workflow_type: default_workflow_type(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct N8nSection {
    #[serde(default = "default_n8n_webhook_url")]
    pub webhook_url: String,
    #[serde(default = "default_backend_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for N8nSection {
    fn default() -> Self {
        Self {
            webhook_url: default_n8n_webhook_url(),
            timeout_ms: default_backend_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowiseSection {
    pub base_url: String,
    pub chatflow_id: String,
    /// Environment variable containing the bearer key
    pub api_key_env: Option<String>,
    #[serde(default = "default_backend_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdentityMode {
    /// Every sender gets a placeholder identity
    #[default]
    Placeholder,
    /// Senders must be active `[[users]]` entries
    Directory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentitySection {
    #[serde(default)]
    pub mode: IdentityMode,
    /// Reply to unregistered senders in directory mode
    #[serde(default = "default_true")]
    pub notify_unregistered: bool,
}

impl Default for IdentitySection {
    fn default() -> Self {
        Self {
            mode: IdentityMode::default(),
            notify_unregistered: true,
        }
    }
}

/// `[[users]]` entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserEntry {
    /// Generated at load when omitted
    pub id: Option<Uuid>,
    pub name: String,
    pub phone: String,
    pub email: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl From<&UserEntry> for User {
    fn from(entry: &UserEntry) -> Self {
        let now = Utc::now();
        User {
            id: entry.id.unwrap_or_else(Uuid::new_v4),
            name: entry.name.clone(),
            phone: entry.phone.clone(),
            email: entry.email.clone(),
            is_active: entry.is_active,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
        }
    }
}

fn default_route_timeout_ms() -> u64 {
    30_000
}

fn default_lane_idle_timeout_ms() -> u64 {
    60_000
}

fn default_event_buffer() -> usize {
    256
}

fn default_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_topic_prefix() -> String {
    "wabridge".to_string()
}

fn default_session_id() -> String {
    "main".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_device_wait_ms() -> u64 {
    2_000
}

fn default_workflow_type() -> String {
    WorkflowType::DEFAULT.as_str().to_string()
}

fn default_n8n_webhook_url() -> String {
    N8nConfig::default().webhook_url
}

fn default_backend_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("No config file found (searched: {searched})")]
    NotFound { searched: String },
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid service ID format: {0}")]
    InvalidServiceId(String),
    #[error("Invalid URL for {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeConfig {
    /// Load and validate a config file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load `explicit` if given, otherwise the first of [`DEFAULT_CONFIG_PATHS`] that exists
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, PathBuf), ConfigError> {
        if let Some(path) = explicit {
            return Ok((Self::load_from_file(path)?, path.to_path_buf()));
        }

        for candidate in DEFAULT_CONFIG_PATHS {
            let path = Path::new(candidate);
            if path.is_file() {
                return Ok((Self::load_from_file(path)?, path.to_path_buf()));
            }
        }

        Err(ConfigError::NotFound {
            searched: DEFAULT_CONFIG_PATHS.join(", "),
        })
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_service_id(&self.service.id)?;
        validate_session_id(&self.mqtt.session_id)
            .map_err(|e| ConfigError::InvalidConfig(format!("mqtt.session_id: {e}")))?;

        let broker = parse_url("mqtt.broker_url", &self.mqtt.broker_url)?;
        if !matches!(broker.scheme(), "mqtt" | "mqtts" | "tcp" | "ssl") {
            return Err(ConfigError::InvalidUrl {
                field: "mqtt.broker_url",
                value: self.mqtt.broker_url.clone(),
            });
        }

        require_http("n8n.webhook_url", &self.n8n.webhook_url)?;
        if let Some(flowise) = &self.flowise {
            require_http("flowise.base_url", &flowise.base_url)?;
            if flowise.chatflow_id.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "flowise.chatflow_id cannot be empty".to_string(),
                ));
            }
            require_positive("flowise.timeout_ms", flowise.timeout_ms)?;
        }

        require_positive("service.route_timeout_ms", self.service.route_timeout_ms)?;
        require_positive("service.lane_idle_timeout_ms", self.service.lane_idle_timeout_ms)?;
        require_positive("service.event_buffer", self.service.event_buffer as u64)?;
        require_positive("mqtt.keep_alive_secs", self.mqtt.keep_alive_secs)?;
        require_positive("mqtt.connect_timeout_ms", self.mqtt.connect_timeout_ms)?;
        require_positive("n8n.timeout_ms", self.n8n.timeout_ms)?;

        match self.workflow.store {
            WorkflowStoreKind::File if self.workflow.path.is_none() => {
                return Err(ConfigError::InvalidConfig(
                    "workflow.store = \"file\" requires workflow.path".to_string(),
                ));
            }
            WorkflowStoreKind::Static
                if WorkflowType::parse(&self.workflow.workflow_type).is_none() =>
            {
                // Still valid: the router falls back to n8n at runtime
                warn!(
                    workflow_type = %self.workflow.workflow_type,
                    "Unknown static workflow type, messages will route to n8n"
                );
            }
            _ => {}
        }

        if self.identity.mode == IdentityMode::Directory && self.users.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "identity.mode = \"directory\" requires at least one [[users]] entry".to_string(),
            ));
        }
        for user in &self.users {
            if !user.phone.chars().any(|c| c.is_ascii_digit()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "user '{}' has no digits in phone '{}'",
                    user.name, user.phone
                )));
            }
        }

        self.http
            .bind_address
            .parse::<SocketAddr>()
            .map_err(|_| {
                ConfigError::InvalidConfig(format!(
                    "http.bind_address '{}' is not a socket address",
                    self.http.bind_address
                ))
            })?;

        Ok(())
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.username_env.as_ref())
    }

    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.password_env.as_ref())
    }

    /// Flowise bearer key; a named but unset variable is an error
    pub fn get_flowise_api_key(&self) -> Result<Option<String>, ConfigError> {
        match self.flowise.as_ref().and_then(|f| f.api_key_env.as_deref()) {
            Some(name) => Self::get_env_var_required(name).map(Some),
            None => Ok(None),
        }
    }

    pub fn sidecar_options(&self) -> SidecarOptions {
        SidecarOptions {
            broker_url: self.mqtt.broker_url.clone(),
            client_id: self.service.id.clone(),
            username: self.get_mqtt_username(),
            password: self.get_mqtt_password(),
            topic_prefix: self.mqtt.topic_prefix.clone(),
            session_id: self.mqtt.session_id.clone(),
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs),
            connect_timeout: Duration::from_millis(self.mqtt.connect_timeout_ms),
            device_wait: Duration::from_millis(self.mqtt.device_wait_ms),
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn n8n_config(&self) -> N8nConfig {
        N8nConfig::new()
            .with_webhook_url(self.n8n.webhook_url.clone())
            .with_timeout_ms(self.n8n.timeout_ms)
    }

    /// `None` when no `[flowise]` section is present
    pub fn flowise_config(&self) -> Result<Option<FlowiseConfig>, ConfigError> {
        let Some(section) = &self.flowise else {
            return Ok(None);
        };

        let mut config = FlowiseConfig::new()
            .with_base_url(section.base_url.clone())
            .with_chatflow_id(section.chatflow_id.clone())
            .with_timeout_ms(section.timeout_ms);
        if let Some(api_key) = self.get_flowise_api_key()? {
            config = config.with_api_key(api_key);
        }
        Ok(Some(config))
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            route_timeout: Duration::from_millis(self.service.route_timeout_ms),
            lane_idle_timeout: Duration::from_millis(self.service.lane_idle_timeout_ms),
        }
    }

    pub fn users(&self) -> Vec<User> {
        self.users.iter().map(User::from).collect()
    }

    pub fn http_bind_address(&self) -> Result<SocketAddr, ConfigError> {
        self.http.bind_address.parse().map_err(|_| {
            ConfigError::InvalidConfig(format!(
                "http.bind_address '{}' is not a socket address",
                self.http.bind_address
            ))
        })
    }

    /// Minimal valid configuration for unit tests
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self::from_toml_str(
            r#"
[service]
id = "test-bridge"
"#,
        )
        .expect("Test config should parse")
    }
}

/// Service id charset: [a-zA-Z0-9._-]+
fn validate_service_id(service_id: &str) -> Result<(), ConfigError> {
    let valid_chars = service_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if service_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidServiceId(format!(
            "Service ID '{service_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|_| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
    })?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        });
    }
    Ok(url)
}

fn require_http(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let url = parse_url(field, value)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn require_positive(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidConfig(format!(
            "{field} must be greater than zero"
        )));
    }
    Ok(())
}
