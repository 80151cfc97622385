//! Messaging transport abstraction
//!
//! The bridge never speaks the chat protocol itself. A [`Transport`] hands it
//! an event stream plus a small command surface (connect, send, logout,
//! device deletion). The production implementation talks to a protocol
//! sidecar over MQTT; tests use `testing::MockTransport`.

use crate::protocol::{DeviceRecord, InboundEvent, Jid, SendReceipt};
use tokio::sync::mpsc;

pub mod mqtt;

/// Transport trait for the chat session
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Prepare the session store and load the device record
    ///
    /// An unpaired session yields a record with no id.
    async fn bootstrap(&self) -> Result<DeviceRecord, Self::Error>;

    /// Open the chat connection
    async fn connect(&self) -> Result<(), Self::Error>;

    /// Close the chat connection
    async fn disconnect(&self) -> Result<(), Self::Error>;

    /// Send a text message to a canonical identifier
    async fn send_text(&self, to: &Jid, text: &str) -> Result<SendReceipt, Self::Error>;

    /// Identity this session is registered under, if paired
    fn registered_id(&self) -> Option<Jid>;

    /// Deregister this device with the chat server
    async fn logout(&self) -> Result<(), Self::Error>;

    /// Remove the device record from the session store
    async fn delete_device(&self, device: &DeviceRecord) -> Result<(), Self::Error>;

    /// Set the sender that inbound events are forwarded to
    fn set_event_sender(&self, sender: mpsc::Sender<InboundEvent>);
}

/// Type alias for the MQTT sidecar transport
pub type MqttTransport = mqtt::MqttClient;
