//! Inbound transport events
//!
//! The transport produces exactly these variants. They travel as JSON tagged by
//! `type` on the sidecar events topic, and the dispatcher matches on them
//! exhaustively.

use super::jid::Jid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event emitted by the transport session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A chat message arrived (or was echoed back from our own account)
    MessageReceived(IncomingMessage),
    /// The transport issued a new pairing code
    QrIssued { code: String },
    Connected,
    Disconnected,
    /// The account was unlinked remotely
    LoggedOut,
}

impl InboundEvent {
    /// Short name used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::MessageReceived(_) => "message_received",
            InboundEvent::QrIssued { .. } => "qr_issued",
            InboundEvent::Connected => "connected",
            InboundEvent::Disconnected => "disconnected",
            InboundEvent::LoggedOut => "logged_out",
        }
    }
}

/// Chat message as delivered by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Canonical identifier of the sender
    pub sender: Jid,
    /// Raw content; `None` when the transport could not decode it
    #[serde(default)]
    pub payload: Option<MessagePayload>,
    /// True when the message was sent by this session's own identity
    #[serde(default)]
    pub is_from_me: bool,
    /// Transport-assigned message id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl IncomingMessage {
    /// Plain-text message from `sender`
    pub fn text(sender: Jid, text: impl Into<String>) -> Self {
        Self {
            sender,
            payload: Some(MessagePayload::PlainText {
                conversation: text.into(),
            }),
            is_from_me: false,
            message_id: None,
            timestamp: None,
        }
    }
}

/// Polymorphic message content
///
/// Only the two text-bearing shapes are modelled; media, reactions, polls and
/// the rest collapse into `Other`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    PlainText {
        conversation: String,
    },
    ExtendedText {
        #[serde(default)]
        text: Option<String>,
    },
    #[serde(other)]
    Other,
}
