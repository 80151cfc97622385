//! MQTT sidecar transport
//!
//! A protocol sidecar owns the chat connection and mirrors it onto a broker
//! under `/{topic_prefix}/{session_id}/`:
//!
//! | topic      | direction  | payload                                     |
//! |------------|------------|---------------------------------------------|
//! | `events`   | subscribed | `InboundEvent` JSON tagged by `type`        |
//! | `device`   | subscribed | retained `DeviceRecord` JSON                |
//! | `outbound` | published  | `{id, to, text}`                            |
//! | `control`  | published  | `{command: connect\|disconnect\|logout\|delete_device}` |
//!
//! - [`connection`] - broker options, backoff and errors
//! - [`health_monitor`] - pure link supervision decisions
//! - [`message_handler`] - wire shapes and publish classification
//! - [`client`] - the I/O client implementing [`crate::transport::Transport`]
//!
//! ```rust,no_run
//! use wabridge::transport::mqtt::{MqttClient, SidecarOptions};
//! use wabridge::transport::Transport;
//!
//! # tokio_test::block_on(async {
//! let client = MqttClient::new(SidecarOptions::default())?;
//! let device = client.bootstrap().await?;
//! println!("paired: {}", device.is_paired());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{LinkState, MqttError, ReconnectConfig, SidecarOptions};
pub use health_monitor::{LinkEvent, LinkMonitor, ReconnectionDecision};
pub use message_handler::{ControlCommand, EventRoute, MessageHandler, OutboundText, PublishRoute};
