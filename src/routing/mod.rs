//! Workflow routing
//!
//! [`WorkflowRouter`] picks n8n or Flowise for each message from the active
//! workflow configuration and forwards it through the matching
//! [`WorkflowBackend`].

pub mod backend;
pub mod flowise;
pub mod n8n;
pub mod router;

pub use backend::{BackendError, UnconfiguredBackend, WorkflowBackend};
pub use flowise::{FlowiseBackend, FlowiseConfig};
pub use n8n::{N8nBackend, N8nConfig};
pub use router::{resolve_workflow_type, RouteContext, RouteFallback, RouteOutcome, WorkflowRouter};
