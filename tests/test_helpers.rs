//! Test helpers and utilities for integration tests

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wabridge::identity::{IdentityResolver, PlaceholderIdentityResolver};
use wabridge::processing::{DispatcherConfig, EventDispatcher};
use wabridge::protocol::{Jid, WorkflowType};
use wabridge::routing::WorkflowRouter;
use wabridge::session::{ConnectionLifecycleManager, SessionEvent};
use wabridge::testing::mocks::{MockTransport, MockWorkflowBackend, MockWorkflowConfigStore};

/// A dispatcher wired to mocks, with handles to inspect them
#[allow(dead_code)]
pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub lifecycle: Arc<ConnectionLifecycleManager<MockTransport>>,
    pub n8n: Arc<MockWorkflowBackend>,
    pub flowise: Arc<MockWorkflowBackend>,
    pub dispatcher: Arc<EventDispatcher<MockTransport>>,
    pub cancel: CancellationToken,
}

/// Harness routing to `workflow_type` with placeholder identities
#[allow(dead_code)]
pub fn harness(workflow_type: &str) -> Harness {
    harness_with(
        MockTransport::new(),
        MockWorkflowConfigStore::returning(workflow_type),
        MockWorkflowBackend::new(WorkflowType::N8n),
        Arc::new(PlaceholderIdentityResolver),
    )
}

#[allow(dead_code)]
pub fn harness_with(
    transport: MockTransport,
    store: MockWorkflowConfigStore,
    n8n: MockWorkflowBackend,
    identity: Arc<dyn IdentityResolver>,
) -> Harness {
    let transport = Arc::new(transport);
    let lifecycle = Arc::new(ConnectionLifecycleManager::new(Arc::clone(&transport)));
    let n8n = Arc::new(n8n);
    let flowise = Arc::new(MockWorkflowBackend::new(WorkflowType::Flowise));
    let router = Arc::new(WorkflowRouter::new(
        Arc::new(store),
        n8n.clone(),
        flowise.clone(),
    ));
    let cancel = CancellationToken::new();
    let dispatcher = Arc::new(EventDispatcher::new(
        Arc::clone(&lifecycle),
        router,
        identity,
        DispatcherConfig {
            route_timeout: Duration::from_secs(2),
            lane_idle_timeout: Duration::from_millis(200),
        },
        cancel.clone(),
    ));

    Harness {
        transport,
        lifecycle,
        n8n,
        flowise,
        dispatcher,
        cancel,
    }
}

impl Harness {
    /// Move the session to Connected
    #[allow(dead_code)]
    pub async fn connect(&self) {
        self.lifecycle.apply_event(SessionEvent::Connected).await;
    }
}

#[allow(dead_code)]
pub fn sender(phone: &str) -> Jid {
    Jid::user(phone)
}
