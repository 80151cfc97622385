//! WhatsApp session state and lifecycle

pub mod lifecycle;
pub mod state;

pub use lifecycle::{ConnectionLifecycleManager, LogoutStep, MessageGuard, LOGOUT_SEQUENCE};
pub use state::{ConnectionState, SessionEvent, SessionHandle};
