//! Inbound message pipeline
//!
//! Runs one message from the transport to a workflow:
//!
//! 1. drop messages this session sent itself
//! 2. derive the sender phone from its identifier
//! 3. resolve the sender's identity (eligibility in directory mode)
//! 4. extract the text; textless messages stop here without error
//! 5. route to the active workflow
//! 6. on routing failure send one best-effort error notice

use super::content::MessageContentExtractor;
use crate::identity::{IdentityResolution, IdentityResolver};
use crate::messenger::OutboundMessenger;
use crate::observability::metrics;
use crate::protocol::{IdentifierNormalizer, IncomingMessage};
use crate::routing::{RouteContext, RouteOutcome, WorkflowRouter};
use crate::session::ConnectionLifecycleManager;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// How a message left the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    SelfOriginated,
    InvalidSender,
    Ineligible { notified: bool },
    IdentityFailed,
    Textless,
    Routed(RouteOutcome),
    RoutingFailed,
    /// Dropped because the bridge is shutting down
    Abandoned,
}

pub struct MessagePipeline<T: Transport> {
    lifecycle: Arc<ConnectionLifecycleManager<T>>,
    router: Arc<WorkflowRouter>,
    identity: Arc<dyn IdentityResolver>,
    messenger: OutboundMessenger<T>,
    route_timeout: Duration,
    cancel: CancellationToken,
}

impl<T> MessagePipeline<T>
where
    T: Transport + 'static,
{
    pub fn new(
        lifecycle: Arc<ConnectionLifecycleManager<T>>,
        router: Arc<WorkflowRouter>,
        identity: Arc<dyn IdentityResolver>,
        route_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let messenger = OutboundMessenger::new(Arc::clone(&lifecycle));
        Self {
            lifecycle,
            router,
            identity,
            messenger,
            route_timeout,
            cancel,
        }
    }

    pub fn messenger(&self) -> &OutboundMessenger<T> {
        &self.messenger
    }

    /// Process one message; every failure is handled here and reported as an outcome
    pub async fn handle_message(&self, message: IncomingMessage) -> MessageOutcome {
        if message.is_from_me {
            metrics().message_self_dropped();
            return MessageOutcome::SelfOriginated;
        }

        let _guard = self.lifecycle.message_guard().await;
        let span = crate::message_span!(
            sender = %message.sender,
            message_id = message.message_id.as_deref().unwrap_or("")
        );
        self.process(message).instrument(span).await
    }

    async fn process(&self, message: IncomingMessage) -> MessageOutcome {
        let phone = IdentifierNormalizer::from_canonical_identifier(&message.sender).to_string();
        if phone.is_empty() {
            metrics().message_invalid_sender();
            warn!("Message sender has no user part, dropping");
            return MessageOutcome::InvalidSender;
        }

        let user_context = match self.identity.resolve(&phone).await {
            Ok(IdentityResolution::Resolved(context)) => context,
            Ok(IdentityResolution::Ineligible { notify }) => {
                metrics().message_ineligible();
                info!(phone = %phone, "Message from unregistered sender");
                if notify {
                    self.messenger.send_unregistered_notice(&phone).await;
                }
                return MessageOutcome::Ineligible { notified: notify };
            }
            Err(e) => {
                error!(phone = %phone, error = %e, "Failed to resolve sender identity");
                return MessageOutcome::IdentityFailed;
            }
        };

        let text = MessageContentExtractor::extract_text(message.payload.as_ref());
        if text.is_empty() {
            metrics().message_textless();
            debug!(phone = %phone, "Message has no text content, ignoring");
            return MessageOutcome::Textless;
        }

        if self.cancel.is_cancelled() {
            debug!(phone = %phone, "Shutting down, message not routed");
            return MessageOutcome::Abandoned;
        }

        info!(phone = %phone, "Received message");
        let context = RouteContext::new(self.cancel.child_token(), self.route_timeout);
        match self.router.route(&context, &user_context, &text).await {
            Ok(outcome) => MessageOutcome::Routed(outcome),
            Err(e) if self.cancel.is_cancelled() => {
                debug!(phone = %phone, error = %e, "Routing interrupted by shutdown");
                MessageOutcome::Abandoned
            }
            Err(e) => {
                metrics().message_failed();
                error!(phone = %phone, error = %e, "Failed to route message to workflow");
                self.messenger.send_error_notice(&phone).await;
                MessageOutcome::RoutingFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{DirectoryIdentityResolver, PlaceholderIdentityResolver};
    use crate::messenger::{PROCESSING_ERROR_NOTICE, UNREGISTERED_NOTICE};
    use crate::protocol::{Jid, MessagePayload, WorkflowType};
    use crate::session::SessionEvent;
    use crate::store::InMemoryUserDirectory;
    use crate::testing::mocks::{
        FailingUserDirectory, MockTransport, MockWorkflowBackend, MockWorkflowConfigStore,
    };

    struct Fixture {
        pipeline: MessagePipeline<MockTransport>,
        lifecycle: Arc<ConnectionLifecycleManager<MockTransport>>,
        n8n: Arc<MockWorkflowBackend>,
        flowise: Arc<MockWorkflowBackend>,
        cancel: CancellationToken,
    }

    async fn fixture(
        workflow_type: &str,
        n8n: MockWorkflowBackend,
        identity: Arc<dyn IdentityResolver>,
    ) -> Fixture {
        fixture_with_timeout(workflow_type, n8n, identity, Duration::from_secs(5)).await
    }

    async fn fixture_with_timeout(
        workflow_type: &str,
        n8n: MockWorkflowBackend,
        identity: Arc<dyn IdentityResolver>,
        route_timeout: Duration,
    ) -> Fixture {
        let lifecycle = Arc::new(ConnectionLifecycleManager::new(Arc::new(
            MockTransport::new(),
        )));
        lifecycle.apply_event(SessionEvent::Connected).await;

        let n8n = Arc::new(n8n);
        let flowise = Arc::new(MockWorkflowBackend::new(WorkflowType::Flowise));
        let router = Arc::new(WorkflowRouter::new(
            Arc::new(MockWorkflowConfigStore::returning(workflow_type)),
            n8n.clone(),
            flowise.clone(),
        ));
        let cancel = CancellationToken::new();
        let pipeline = MessagePipeline::new(
            Arc::clone(&lifecycle),
            router,
            identity,
            route_timeout,
            cancel.clone(),
        );

        Fixture {
            pipeline,
            lifecycle,
            n8n,
            flowise,
            cancel,
        }
    }

    async fn placeholder_fixture(workflow_type: &str) -> Fixture {
        fixture(
            workflow_type,
            MockWorkflowBackend::new(WorkflowType::N8n),
            Arc::new(PlaceholderIdentityResolver),
        )
        .await
    }

    fn text_message(text: &str) -> IncomingMessage {
        IncomingMessage::text(Jid::user("628123456"), text)
    }

    #[tokio::test]
    async fn test_self_originated_message_is_not_routed() {
        let f = placeholder_fixture("n8n").await;
        let mut message = text_message("hi");
        message.is_from_me = true;

        assert_eq!(
            f.pipeline.handle_message(message).await,
            MessageOutcome::SelfOriginated
        );
        assert_eq!(f.n8n.call_count(), 0);
        assert_eq!(f.flowise.call_count(), 0);
    }

    #[tokio::test]
    async fn test_text_message_routes_with_placeholder_identity() {
        let f = placeholder_fixture("flowise").await;

        let outcome = f.pipeline.handle_message(text_message("halo")).await;
        assert!(matches!(
            outcome,
            MessageOutcome::Routed(RouteOutcome {
                backend: WorkflowType::Flowise,
                fallback: None
            })
        ));

        let calls = f.flowise.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.phone, "628123456");
        assert_eq!(calls[0].0.name, "Dummy");
        assert_eq!(calls[0].1, "halo");
        assert_eq!(f.n8n.call_count(), 0);
    }

    #[tokio::test]
    async fn test_textless_messages_stop_silently() {
        let f = placeholder_fixture("n8n").await;

        let payloads = [
            None,
            Some(MessagePayload::Other),
            Some(MessagePayload::ExtendedText { text: None }),
        ];
        for payload in payloads {
            let message = IncomingMessage {
                payload,
                ..text_message("")
            };
            assert_eq!(
                f.pipeline.handle_message(message).await,
                MessageOutcome::Textless
            );
        }
        assert_eq!(f.n8n.call_count(), 0);
        assert!(f.lifecycle.transport().sent_messages().is_empty());
    }

    #[tokio::test]
    async fn test_routing_failure_sends_one_error_notice() {
        let f = fixture(
            "n8n",
            MockWorkflowBackend::new(WorkflowType::N8n).with_failure(),
            Arc::new(PlaceholderIdentityResolver),
        )
        .await;

        assert_eq!(
            f.pipeline.handle_message(text_message("halo")).await,
            MessageOutcome::RoutingFailed
        );

        let sent = f.lifecycle.transport().sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Jid::user("628123456"));
        assert_eq!(sent[0].1, PROCESSING_ERROR_NOTICE);
    }

    #[tokio::test]
    async fn test_route_timeout_sends_one_error_notice() {
        let f = fixture_with_timeout(
            "n8n",
            MockWorkflowBackend::new(WorkflowType::N8n).with_delay(Duration::from_secs(5)),
            Arc::new(PlaceholderIdentityResolver),
            Duration::from_millis(50),
        )
        .await;

        assert_eq!(
            f.pipeline.handle_message(text_message("halo")).await,
            MessageOutcome::RoutingFailed
        );

        let sent = f.lifecycle.transport().sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, PROCESSING_ERROR_NOTICE);
    }

    #[tokio::test]
    async fn test_shutdown_abandons_message_without_notice() {
        let f = placeholder_fixture("n8n").await;
        f.cancel.cancel();

        assert_eq!(
            f.pipeline.handle_message(text_message("halo")).await,
            MessageOutcome::Abandoned
        );
        assert_eq!(f.n8n.call_count(), 0);
        assert!(f.lifecycle.transport().sent_messages().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_during_route_abandons_without_notice() {
        let f = fixture(
            "n8n",
            MockWorkflowBackend::new(WorkflowType::N8n).with_delay(Duration::from_secs(5)),
            Arc::new(PlaceholderIdentityResolver),
        )
        .await;

        let cancel = f.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        assert_eq!(
            f.pipeline.handle_message(text_message("halo")).await,
            MessageOutcome::Abandoned
        );
        assert_eq!(f.n8n.call_count(), 1);
        assert!(f.lifecycle.transport().sent_messages().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_sender_gets_notice_and_no_routing() {
        let directory = Arc::new(InMemoryUserDirectory::new([]));
        let f = fixture(
            "n8n",
            MockWorkflowBackend::new(WorkflowType::N8n),
            Arc::new(DirectoryIdentityResolver::new(directory, true)),
        )
        .await;

        assert_eq!(
            f.pipeline.handle_message(text_message("halo")).await,
            MessageOutcome::Ineligible { notified: true }
        );
        assert_eq!(f.n8n.call_count(), 0);
        let sent = f.lifecycle.transport().sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, UNREGISTERED_NOTICE);
    }

    #[tokio::test]
    async fn test_directory_failure_drops_message() {
        let f = fixture(
            "n8n",
            MockWorkflowBackend::new(WorkflowType::N8n),
            Arc::new(DirectoryIdentityResolver::new(Arc::new(FailingUserDirectory), true)),
        )
        .await;

        assert_eq!(
            f.pipeline.handle_message(text_message("halo")).await,
            MessageOutcome::IdentityFailed
        );
        assert_eq!(f.n8n.call_count(), 0);
        assert!(f.lifecycle.transport().sent_messages().is_empty());
    }

    #[tokio::test]
    async fn test_sender_without_user_part_is_dropped() {
        let f = placeholder_fixture("n8n").await;
        let message = IncomingMessage::text(Jid::new("", "s.whatsapp.net"), "halo");

        assert_eq!(
            f.pipeline.handle_message(message).await,
            MessageOutcome::InvalidSender
        );
        assert_eq!(f.n8n.call_count(), 0);
    }
}
