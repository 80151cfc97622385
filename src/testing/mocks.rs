//! Mock implementations for testing
//!
//! Provides a mock transport, workflow backend, workflow config store and user
//! directory so the bridge can be exercised without a sidecar, a broker or
//! real automation engines.

use crate::protocol::{
    DeviceRecord, InboundEvent, Jid, SendReceipt, User, UserContext, WorkflowConfig,
    WorkflowType,
};
use crate::routing::{BackendError, WorkflowBackend};
use crate::store::{StoreError, UserDirectory, WorkflowConfigStore};
use crate::transport::Transport;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
#[error("mock transport failure: {0}")]
pub struct MockTransportError(pub String);

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock transport recording every command it receives
#[derive(Debug, Default)]
pub struct MockTransport {
    bootstrap_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    send_calls: AtomicUsize,
    sent_messages: Mutex<Vec<(Jid, String)>>,
    deleted_devices: Mutex<Vec<DeviceRecord>>,
    registered_id: Mutex<Option<Jid>>,
    event_sender: Mutex<Option<mpsc::Sender<InboundEvent>>>,
    send_delay: Option<Duration>,
    fail_bootstrap: bool,
    fail_connect: bool,
    fail_send: bool,
    fail_logout: bool,
    fail_delete: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start as an already paired session
    pub fn with_registered_id(self, id: Jid) -> Self {
        *lock(&self.registered_id) = Some(id);
        self
    }

    pub fn with_failing_bootstrap(mut self) -> Self {
        self.fail_bootstrap = true;
        self
    }

    pub fn with_failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn with_failing_send(mut self) -> Self {
        self.fail_send = true;
        self
    }

    pub fn with_failing_logout(mut self) -> Self {
        self.fail_logout = true;
        self
    }

    pub fn with_failing_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    pub fn set_registered_id(&self, id: Option<Jid>) {
        *lock(&self.registered_id) = id;
    }

    pub fn bootstrap_count(&self) -> usize {
        self.bootstrap_calls.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    /// Send attempts, including failed ones
    pub fn send_count(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn sent_messages(&self) -> Vec<(Jid, String)> {
        lock(&self.sent_messages).clone()
    }

    pub fn deleted_devices(&self) -> Vec<DeviceRecord> {
        lock(&self.deleted_devices).clone()
    }

    /// Push an event as if the transport had received it
    pub async fn emit(&self, event: InboundEvent) -> bool {
        let sender = lock(&self.event_sender).clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn bootstrap(&self) -> Result<DeviceRecord, Self::Error> {
        self.bootstrap_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_bootstrap {
            return Err(MockTransportError("session store unavailable".into()));
        }
        Ok(DeviceRecord {
            id: lock(&self.registered_id).clone(),
        })
    }

    async fn connect(&self) -> Result<(), Self::Error> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(MockTransportError("connection refused".into()));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_text(&self, to: &Jid, text: &str) -> Result<SendReceipt, Self::Error> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_send {
            return Err(MockTransportError("send rejected".into()));
        }

        let mut sent = lock(&self.sent_messages);
        sent.push((to.clone(), text.to_string()));
        Ok(SendReceipt {
            id: format!("MOCK{}", sent.len()),
            timestamp: Utc::now(),
        })
    }

    fn registered_id(&self) -> Option<Jid> {
        lock(&self.registered_id).clone()
    }

    async fn logout(&self) -> Result<(), Self::Error> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_logout {
            return Err(MockTransportError("server rejected logout".into()));
        }
        *lock(&self.registered_id) = None;
        Ok(())
    }

    async fn delete_device(&self, device: &DeviceRecord) -> Result<(), Self::Error> {
        lock(&self.deleted_devices).push(device.clone());
        if self.fail_delete {
            return Err(MockTransportError("device store locked".into()));
        }
        Ok(())
    }

    fn set_event_sender(&self, sender: mpsc::Sender<InboundEvent>) {
        *lock(&self.event_sender) = Some(sender);
    }
}

/// Mock workflow backend recording every message
#[derive(Debug)]
pub struct MockWorkflowBackend {
    workflow_type: WorkflowType,
    calls: Mutex<Vec<(UserContext, String)>>,
    delay: Option<Duration>,
    should_fail: bool,
}

impl MockWorkflowBackend {
    pub fn new(workflow_type: WorkflowType) -> Self {
        Self {
            workflow_type,
            calls: Mutex::new(Vec::new()),
            delay: None,
            should_fail: false,
        }
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(UserContext, String)> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn messages(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|(_, m)| m.clone()).collect()
    }
}

#[async_trait]
impl WorkflowBackend for MockWorkflowBackend {
    fn workflow_type(&self) -> WorkflowType {
        self.workflow_type
    }

    async fn send_message_to_workflow(
        &self,
        user_context: &UserContext,
        message: &str,
    ) -> Result<(), BackendError> {
        lock(&self.calls).push((user_context.clone(), message.to_string()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail {
            return Err(BackendError::Status {
                status: 500,
                body: "workflow crashed".into(),
            });
        }
        Ok(())
    }
}

/// Workflow config store returning a fixed value or a fixed failure
#[derive(Debug)]
pub struct MockWorkflowConfigStore {
    workflow_type: Mutex<Option<String>>,
}

impl MockWorkflowConfigStore {
    pub fn returning(workflow_type: impl Into<String>) -> Self {
        Self {
            workflow_type: Mutex::new(Some(workflow_type.into())),
        }
    }

    pub fn failing() -> Self {
        Self {
            workflow_type: Mutex::new(None),
        }
    }
}

#[async_trait]
impl WorkflowConfigStore for MockWorkflowConfigStore {
    async fn get_active_config(&self) -> Result<WorkflowConfig, StoreError> {
        let workflow_type = lock(&self.workflow_type)
            .clone()
            .ok_or(StoreError::NoActiveConfig)?;
        Ok(WorkflowConfig {
            id: 1,
            workflow_type,
            is_active: true,
            updated_at: Utc::now(),
        })
    }

    async fn set_active_workflow_type(
        &self,
        workflow_type: WorkflowType,
    ) -> Result<WorkflowConfig, StoreError> {
        *lock(&self.workflow_type) = Some(workflow_type.to_string());
        self.get_active_config().await
    }
}

/// User directory whose lookups always fail
#[derive(Debug, Default)]
pub struct FailingUserDirectory;

#[async_trait]
impl UserDirectory for FailingUserDirectory {
    async fn find_by_phone(&self, _phone: &str) -> Result<Option<User>, StoreError> {
        Err(StoreError::Serialize {
            message: "directory offline".into(),
        })
    }
}
