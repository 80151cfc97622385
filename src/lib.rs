//! wabridge - WhatsApp to workflow bridge
//!
//! Bridges a WhatsApp session, driven by a protocol sidecar over MQTT, to
//! n8n or Flowise workflows.
//!
//! # Overview
//!
//! - [`session`] - connection lifecycle state machine and logout sequence
//! - [`processing`] - event dispatch, per-sender lanes, content extraction
//! - [`routing`] - n8n and Flowise backends behind a store-driven router
//! - [`messenger`] - outbound sends with phone normalization
//! - [`transport`] - the [`transport::Transport`] seam and its MQTT client
//! - [`store`] - active workflow type and the user directory
//! - [`api`] - HTTP admin, probes and reply webhooks
//!
//! # Quick Start
//!
//! ```rust
//! use wabridge::protocol::{IdentifierNormalizer, InboundEvent, IncomingMessage};
//!
//! let jid = IdentifierNormalizer::to_canonical_identifier("+62 812-3456").unwrap();
//! assert_eq!(jid.to_string(), "628123456@s.whatsapp.net");
//!
//! // Events arrive from the sidecar as JSON tagged by `type`
//! let event = InboundEvent::MessageReceived(IncomingMessage::text(jid, "halo"));
//! let json = serde_json::to_string(&event).unwrap();
//! assert!(json.contains("\"type\":\"message_received\""));
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod identity;
pub mod messenger;
pub mod observability;
pub mod processing;
pub mod protocol;
pub mod routing;
pub mod session;
pub mod store;
pub mod testing;
pub mod transport;

pub use config::{BridgeConfig, ConfigError};
pub use error::{BridgeError, BridgeResult};
pub use messenger::OutboundMessenger;
pub use processing::EventDispatcher;
pub use protocol::*;
pub use routing::WorkflowRouter;
pub use session::ConnectionLifecycleManager;
pub use transport::mqtt::MqttClient;
