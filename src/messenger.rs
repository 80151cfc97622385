//! Outbound messaging
//!
//! Every text the bridge sends goes through [`OutboundMessenger::send`]: admin
//! API sends, replies delivered by workflow webhooks, and the fixed notices
//! sent when processing fails or a sender is not registered.

use crate::error::{BridgeError, BridgeResult};
use crate::observability::metrics;
use crate::protocol::{IdentifierNormalizer, SendReceipt};
use crate::session::ConnectionLifecycleManager;
use crate::transport::Transport;
use std::sync::Arc;
use tracing::{debug, error, info};

pub const PROCESSING_ERROR_NOTICE: &str =
    "Sorry, there was an error processing your message. Please try again later.";

pub const UNREGISTERED_NOTICE: &str =
    "Sorry, you are not registered to use this service. Please contact the administrator for access.";

pub struct OutboundMessenger<T: Transport> {
    lifecycle: Arc<ConnectionLifecycleManager<T>>,
}

impl<T> Clone for OutboundMessenger<T>
where
    T: Transport,
{
    fn clone(&self) -> Self {
        Self {
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }
}

impl<T> OutboundMessenger<T>
where
    T: Transport + 'static,
{
    pub fn new(lifecycle: Arc<ConnectionLifecycleManager<T>>) -> Self {
        Self { lifecycle }
    }

    /// Send `text` to `phone`
    ///
    /// The connection check comes first, so a disconnected session never
    /// normalizes the number or touches the transport.
    pub async fn send(&self, phone: &str, text: &str) -> BridgeResult<SendReceipt> {
        // Held until the transport call returns so a teardown cannot interleave
        let session = self.lifecycle.read_session().await;
        if !session.is_connected() {
            metrics().send_not_connected();
            return Err(BridgeError::NotConnected);
        }

        let jid = IdentifierNormalizer::to_canonical_identifier(phone)?;

        match self.lifecycle.transport().send_text(&jid, text).await {
            Ok(receipt) => {
                metrics().send_succeeded();
                info!(to = %jid, message_id = %receipt.id, "Message sent");
                Ok(receipt)
            }
            Err(e) => {
                metrics().send_failed();
                Err(BridgeError::send_failed(e.to_string()))
            }
        }
    }

    async fn send_notice(&self, phone: &str, notice: &str, kind: &'static str) {
        match self.send(phone, notice).await {
            Ok(_) => {
                metrics().notice_sent();
                debug!(phone = %phone, kind, "Notice sent");
            }
            Err(e) => {
                metrics().notice_failed();
                error!(phone = %phone, kind, error = %e, "Failed to send notice");
            }
        }
    }

    /// Best-effort "error processing your message" notice
    pub async fn send_error_notice(&self, phone: &str) {
        self.send_notice(phone, PROCESSING_ERROR_NOTICE, "processing_error")
            .await;
    }

    /// Best-effort "not registered" notice
    pub async fn send_unregistered_notice(&self, phone: &str) {
        self.send_notice(phone, UNREGISTERED_NOTICE, "unregistered")
            .await;
    }
}
