//! HTTP surface
//!
//! Probes (`/health`, `/ready`, `/live`, `/metrics`), session administration
//! under `/api/whatsapp`, reply webhooks under `/api/webhook` and the active
//! workflow switch at `/api/workflow-config`. Every body uses the
//! [`ApiResponse`](crate::protocol::ApiResponse) envelope.

pub mod server;

pub use server::{routes, serve, ApiState, SendRequest, WorkflowUpdateRequest};
