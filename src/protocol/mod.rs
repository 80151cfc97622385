//! Protocol types shared across the bridge
//!
//! Participant identifiers, the inbound event enum, backend wire records and
//! the sidecar topic layout.

pub mod events;
pub mod jid;
pub mod messages;
pub mod topics;

pub use events::*;
pub use jid::*;
pub use messages::*;
pub use topics::*;
