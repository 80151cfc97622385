//! Event dispatch
//!
//! [`EventDispatcher::dispatch`] is the single entry point for transport
//! events. Lifecycle events update the session inline, in arrival order.
//! Message events go onto their sender's lane; self-originated messages are
//! dropped before they reach a lane.

use super::lanes::SenderLanes;
use super::pipeline::MessagePipeline;
use crate::identity::IdentityResolver;
use crate::observability::metrics;
use crate::protocol::InboundEvent;
use crate::routing::WorkflowRouter;
use crate::session::{ConnectionLifecycleManager, SessionEvent};
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Tuning for message processing
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Deadline for one backend call
    pub route_timeout: Duration,
    /// How long an idle sender lane lives before retiring
    pub lane_idle_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            route_timeout: Duration::from_secs(30),
            lane_idle_timeout: Duration::from_secs(60),
        }
    }
}

pub struct EventDispatcher<T: Transport> {
    lifecycle: Arc<ConnectionLifecycleManager<T>>,
    lanes: SenderLanes<T>,
    cancel: CancellationToken,
}

impl<T> EventDispatcher<T>
where
    T: Transport + 'static,
{
    pub fn new(
        lifecycle: Arc<ConnectionLifecycleManager<T>>,
        router: Arc<WorkflowRouter>,
        identity: Arc<dyn IdentityResolver>,
        config: DispatcherConfig,
        cancel: CancellationToken,
    ) -> Self {
        let pipeline = Arc::new(MessagePipeline::new(
            Arc::clone(&lifecycle),
            router,
            identity,
            config.route_timeout,
            cancel.clone(),
        ));
        Self {
            lifecycle,
            lanes: SenderLanes::new(pipeline, config.lane_idle_timeout),
            cancel,
        }
    }

    /// Route one event to its handler
    pub async fn dispatch(&self, event: InboundEvent) {
        match event {
            InboundEvent::MessageReceived(message) => {
                metrics().message_received();
                if message.is_from_me {
                    metrics().message_self_dropped();
                    return;
                }
                self.lanes.submit(message);
            }
            InboundEvent::QrIssued { code } => {
                self.lifecycle.apply_event(SessionEvent::QrIssued(code)).await;
            }
            InboundEvent::Connected => self.lifecycle.apply_event(SessionEvent::Connected).await,
            InboundEvent::Disconnected => {
                self.lifecycle.apply_event(SessionEvent::Disconnected).await
            }
            InboundEvent::LoggedOut => self.lifecycle.apply_event(SessionEvent::LoggedOut).await,
        }
    }

    /// Consume events until the channel closes or the dispatcher is cancelled
    ///
    /// Cancellation also aborts in-flight backend calls through the route
    /// context. Queued messages still drain before this returns.
    pub async fn run(&self, mut events: mpsc::Receiver<InboundEvent>) {
        info!("Event dispatcher started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Event dispatcher cancelled");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => {
                        debug!(event = event.kind(), "Dispatching transport event");
                        self.dispatch(event).await;
                    }
                    None => {
                        debug!("Transport event channel closed");
                        break;
                    }
                },
            }
        }

        self.lanes.wait_idle().await;
        info!("Event dispatcher stopped");
    }

    /// Wait for every queued message to finish processing
    pub async fn wait_idle(&self) {
        self.lanes.wait_idle().await;
    }

    pub fn active_lanes(&self) -> usize {
        self.lanes.active_lanes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PlaceholderIdentityResolver;
    use crate::protocol::{IncomingMessage, Jid, WorkflowType};
    use crate::session::ConnectionState;
    use crate::testing::mocks::{MockTransport, MockWorkflowBackend, MockWorkflowConfigStore};

    fn dispatcher(
        backend: Arc<MockWorkflowBackend>,
    ) -> (
        EventDispatcher<MockTransport>,
        Arc<ConnectionLifecycleManager<MockTransport>>,
    ) {
        let lifecycle = Arc::new(ConnectionLifecycleManager::new(Arc::new(
            MockTransport::new(),
        )));
        let router = Arc::new(WorkflowRouter::new(
            Arc::new(MockWorkflowConfigStore::returning("n8n")),
            backend,
            Arc::new(MockWorkflowBackend::new(WorkflowType::Flowise)),
        ));
        let config = DispatcherConfig {
            route_timeout: Duration::from_secs(1),
            lane_idle_timeout: Duration::from_millis(10),
        };
        let dispatcher = EventDispatcher::new(
            Arc::clone(&lifecycle),
            router,
            Arc::new(PlaceholderIdentityResolver),
            config,
            CancellationToken::new(),
        );
        (dispatcher, lifecycle)
    }

    #[tokio::test]
    async fn test_lifecycle_events_update_state() {
        let (dispatcher, lifecycle) =
            dispatcher(Arc::new(MockWorkflowBackend::new(WorkflowType::N8n)));

        dispatcher
            .dispatch(InboundEvent::QrIssued {
                code: "2@abc".into(),
            })
            .await;
        assert_eq!(lifecycle.state().await, ConnectionState::AwaitingQr);

        dispatcher.dispatch(InboundEvent::Connected).await;
        assert!(lifecycle.is_connected().await);

        dispatcher.dispatch(InboundEvent::LoggedOut).await;
        assert_eq!(lifecycle.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_self_originated_message_never_reaches_a_lane() {
        let backend = Arc::new(MockWorkflowBackend::new(WorkflowType::N8n));
        let (dispatcher, _) = dispatcher(backend.clone());

        let mut message = IncomingMessage::text(Jid::user("628111"), "echo");
        message.is_from_me = true;
        dispatcher
            .dispatch(InboundEvent::MessageReceived(message))
            .await;

        assert_eq!(dispatcher.active_lanes(), 0);
        dispatcher.wait_idle().await;
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let backend = Arc::new(MockWorkflowBackend::new(WorkflowType::N8n));
        let (dispatcher, lifecycle) = dispatcher(backend.clone());
        let (tx, rx) = mpsc::channel(16);

        tx.send(InboundEvent::Connected).await.unwrap();
        tx.send(InboundEvent::MessageReceived(IncomingMessage::text(
            Jid::user("628111"),
            "halo",
        )))
        .await
        .unwrap();
        drop(tx);

        dispatcher.run(rx).await;

        assert!(lifecycle.is_connected().await);
        assert_eq!(backend.messages(), vec!["halo"]);
    }
}
