//! Workflow routing decision
//!
//! Every message goes to exactly one backend:
//!
//! 1. fetch the active workflow type; a failed fetch falls back to n8n
//! 2. `flowise` goes to Flowise, `n8n` to n8n, anything else warns and uses n8n
//! 3. a backend failure is wrapped as [`BridgeError::BackendDispatch`], no retry
//!
//! The backend call is bounded by the route context's timeout and can be
//! cancelled through its token.

use super::backend::{BackendError, WorkflowBackend};
use crate::error::BridgeError;
use crate::observability::metrics;
use crate::protocol::{UserContext, WorkflowType};
use crate::store::WorkflowConfigStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Cancellation and deadline for one routing call
#[derive(Debug, Clone)]
pub struct RouteContext {
    pub cancel: CancellationToken,
    pub timeout: Duration,
}

impl RouteContext {
    pub fn new(cancel: CancellationToken, timeout: Duration) -> Self {
        Self { cancel, timeout }
    }

    /// Uncancellable context with the given deadline
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(CancellationToken::new(), timeout)
    }
}

/// Why the default backend was used instead of the configured one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteFallback {
    /// The store could not produce an active type; carries the store error
    ConfigUnavailable(String),
    /// The store returned a type no backend serves; carries the raw value
    UnknownWorkflowType(String),
}

/// Result of a successful routing call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOutcome {
    pub backend: WorkflowType,
    pub fallback: Option<RouteFallback>,
}

/// Map a fetched workflow type onto a backend (pure function)
pub fn resolve_workflow_type(raw: &str) -> (WorkflowType, Option<RouteFallback>) {
    match WorkflowType::parse(raw) {
        Some(workflow_type) => (workflow_type, None),
        None => (
            WorkflowType::DEFAULT,
            Some(RouteFallback::UnknownWorkflowType(raw.to_string())),
        ),
    }
}

pub struct WorkflowRouter {
    store: Arc<dyn WorkflowConfigStore>,
    n8n: Arc<dyn WorkflowBackend>,
    flowise: Arc<dyn WorkflowBackend>,
}

impl WorkflowRouter {
    pub fn new(
        store: Arc<dyn WorkflowConfigStore>,
        n8n: Arc<dyn WorkflowBackend>,
        flowise: Arc<dyn WorkflowBackend>,
    ) -> Self {
        Self {
            store,
            n8n,
            flowise,
        }
    }

    pub fn store(&self) -> &Arc<dyn WorkflowConfigStore> {
        &self.store
    }

    /// Decide which backend the next message goes to
    pub async fn select_backend(&self) -> (WorkflowType, Option<RouteFallback>) {
        let selection = match self.store.get_active_workflow_type().await {
            Ok(raw) => resolve_workflow_type(&raw),
            Err(e) => (
                WorkflowType::DEFAULT,
                Some(RouteFallback::ConfigUnavailable(e.to_string())),
            ),
        };

        match &selection.1 {
            Some(RouteFallback::ConfigUnavailable(reason)) => {
                metrics().fallback_config_unavailable();
                error!(
                    error = %reason,
                    fallback = %WorkflowType::DEFAULT,
                    "Failed to get workflow config, using default"
                );
            }
            Some(RouteFallback::UnknownWorkflowType(raw)) => {
                metrics().fallback_unknown_type();
                warn!(
                    workflow_type = %raw,
                    fallback = %WorkflowType::DEFAULT,
                    "Unknown workflow type, defaulting"
                );
            }
            None => debug!(backend = %selection.0, "Workflow type resolved"),
        }

        selection
    }

    fn backend_for(&self, workflow_type: WorkflowType) -> &Arc<dyn WorkflowBackend> {
        match workflow_type {
            WorkflowType::N8n => &self.n8n,
            WorkflowType::Flowise => &self.flowise,
        }
    }

    /// Route one message to the selected backend
    pub async fn route(
        &self,
        context: &RouteContext,
        user_context: &UserContext,
        message: &str,
    ) -> Result<RouteOutcome, BridgeError> {
        let (backend, fallback) = self.select_backend().await;
        let span = crate::route_span!(backend = %backend, phone = %user_context.phone);

        async {
            let started = Instant::now();
            let call = self
                .backend_for(backend)
                .send_message_to_workflow(user_context, message);

            let result = tokio::select! {
                _ = context.cancel.cancelled() => Err(BackendError::Cancelled),
                outcome = tokio::time::timeout(context.timeout, call) => {
                    outcome.unwrap_or(Err(BackendError::Timeout))
                }
            };

            match result {
                Ok(()) => {
                    metrics().message_routed(backend, started.elapsed());
                    info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Message forwarded to workflow"
                    );
                    Ok(RouteOutcome { backend, fallback })
                }
                Err(source) => {
                    metrics().backend_failed(started.elapsed());
                    error!(error = %source, "Failed to send message to workflow");
                    Err(BridgeError::BackendDispatch { backend, source })
                }
            }
        }
        .instrument(span)
        .await
    }
}
