//! Error taxonomy for the bridge
//!
//! Every failure the orchestrator can surface is a [`BridgeError`] variant.
//! Some variants never escape their call site: `ConfigFetch` degrades to the
//! default workflow and `RemoteLogout` / `DeviceDelete` are only logged by the
//! logout sequence. The rest propagate one level up to the caller.

use crate::protocol::WorkflowType;
use crate::routing::BackendError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Failed to fetch workflow configuration: {message}")]
    ConfigFetch { message: String },

    #[error("Invalid phone number: {phone:?}")]
    InvalidPhoneNumber { phone: String },

    #[error("WhatsApp client not connected")]
    NotConnected,

    #[error("Failed to send message to {backend}: {source}")]
    BackendDispatch {
        backend: WorkflowType,
        #[source]
        source: BackendError,
    },

    #[error("Failed to send message: {message}")]
    SendFailed { message: String },

    #[error("QR code not available")]
    QrNotAvailable,

    #[error("Failed to delete device from store: {message}")]
    DeviceDelete { message: String },

    #[error("Failed to logout from WhatsApp server: {message}")]
    RemoteLogout { message: String },

    #[error("Session bootstrap failed: {message}")]
    Bootstrap { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Identity resolution failed: {message}")]
    Identity { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl BridgeError {
    /// Create config fetch error
    pub fn config_fetch<S: Into<String>>(message: S) -> Self {
        Self::ConfigFetch {
            message: message.into(),
        }
    }

    /// Create invalid phone number error
    pub fn invalid_phone<S: Into<String>>(phone: S) -> Self {
        Self::InvalidPhoneNumber {
            phone: phone.into(),
        }
    }

    /// Create send failure error
    pub fn send_failed<S: Into<String>>(message: S) -> Self {
        Self::SendFailed {
            message: message.into(),
        }
    }

    /// Create bootstrap error
    pub fn bootstrap<S: Into<String>>(message: S) -> Self {
        Self::Bootstrap {
            message: message.into(),
        }
    }

    /// Create transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create identity resolution error
    pub fn identity<S: Into<String>>(message: S) -> Self {
        Self::Identity {
            message: message.into(),
        }
    }

    /// HTTP status code used when this error is returned from the admin API
    pub fn status_code(&self) -> u16 {
        match self {
            BridgeError::InvalidPhoneNumber { .. } => 400,
            BridgeError::QrNotAvailable => 404,
            BridgeError::NotConnected => 503,
            BridgeError::BackendDispatch { .. } | BridgeError::SendFailed { .. } => 502,
            BridgeError::ConfigFetch { .. }
            | BridgeError::DeviceDelete { .. }
            | BridgeError::RemoteLogout { .. }
            | BridgeError::Bootstrap { .. }
            | BridgeError::Transport { .. }
            | BridgeError::Identity { .. }
            | BridgeError::Config(_) => 500,
        }
    }

    /// Error message safe to return to API clients
    pub fn public_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("sensitive path pattern is valid")
});

const MAX_PUBLIC_MESSAGE_LEN: usize = 500;

/// Sanitize error messages before they leave the process
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string();

    if sanitized.len() > MAX_PUBLIC_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_PUBLIC_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_phone_constructor() {
        let error = BridgeError::invalid_phone("+- ");
        assert!(matches!(error, BridgeError::InvalidPhoneNumber { .. }));
        assert_eq!(error.to_string(), "Invalid phone number: \"+- \"");
    }

    #[test]
    fn test_backend_dispatch_names_backend() {
        let error = BridgeError::BackendDispatch {
            backend: WorkflowType::Flowise,
            source: BackendError::Timeout,
        };
        assert!(error.to_string().contains("flowise"));
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(BridgeError::invalid_phone("").status_code(), 400);
        assert_eq!(BridgeError::QrNotAvailable.status_code(), 404);
        assert_eq!(BridgeError::NotConnected.status_code(), 503);
        assert_eq!(BridgeError::send_failed("boom").status_code(), 502);
        assert_eq!(BridgeError::bootstrap("db down").status_code(), 500);
    }

    #[test]
    fn test_public_message_is_sanitized() {
        let error = BridgeError::send_failed("broker said token=abc123");
        let message = error.public_message();
        assert!(!message.contains("abc123"));
        assert!(message.contains("token=***"));
    }

    #[test]
    fn test_sanitize_multiple_secrets() {
        let message = "Auth failed: password=pass1 api_key=key123 secret=hidden";
        let sanitized = sanitize_error_message(message);

        assert!(!sanitized.contains("pass1"));
        assert!(!sanitized.contains("key123"));
        assert!(!sanitized.contains("hidden"));
        assert!(sanitized.contains("password=***"));
    }

    #[test]
    fn test_file_path_redaction() {
        let message = "Failed to read /home/user/.ssh/id_rsa";
        let sanitized = sanitize_error_message(message);

        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains("/home/user/.ssh/id_rsa"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let sanitized = sanitize_error_message(&"é".repeat(400));
        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_sanitize_exactly_500_chars() {
        let sanitized = sanitize_error_message(&"x".repeat(500));
        assert_eq!(sanitized.len(), 500);
        assert!(!sanitized.contains("truncated"));
    }
}
