//! Sidecar topic layout and session id validation
//!
//! Every topic for a session lives under `/{prefix}/{session_id}/`. Topics are
//! canonicalized the same way on both sides so the sidecar and the bridge
//! agree byte for byte.

use thiserror::Error;

/// Normalize a topic: single leading slash, no repeated or trailing slashes
pub fn canonicalize_topic(topic: &str) -> String {
    let segments: Vec<&str> = topic.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Session ids become topic segments, so only `[A-Za-z0-9._-]` is allowed
pub fn validate_session_id(session_id: &str) -> Result<(), ValidationError> {
    if session_id.is_empty() {
        return Err(ValidationError::EmptySessionId);
    }

    match session_id
        .chars()
        .find(|ch| !ch.is_ascii_alphanumeric() && !matches!(ch, '.' | '_' | '-'))
    {
        Some(ch) => Err(ValidationError::InvalidSessionIdChar(ch)),
        None => Ok(()),
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Session ID cannot be empty")]
    EmptySessionId,
    #[error("Session ID contains invalid character: '{0}'")]
    InvalidSessionIdChar(char),
}

/// Topics used to talk to the transport sidecar for one session
#[derive(Debug, Clone, PartialEq)]
pub struct SidecarTopics {
    /// Inbound events (subscribed)
    pub events: String,
    /// Retained device record (subscribed)
    pub device: String,
    /// Outbound text messages (published)
    pub outbound: String,
    /// Session commands (published)
    pub control: String,
}

impl SidecarTopics {
    pub fn new(prefix: &str, session_id: &str) -> Result<Self, ValidationError> {
        validate_session_id(session_id)?;
        let base = canonicalize_topic(&format!("{prefix}/{session_id}"));
        Ok(Self {
            events: format!("{base}/events"),
            device: format!("{base}/device"),
            outbound: format!("{base}/outbound"),
            control: format!("{base}/control"),
        })
    }
}
