//! Testing utilities and mock implementations
//!
//! Lets the bridge run end to end without a sidecar, an MQTT broker or real
//! workflow engines.

pub mod mocks;

pub use mocks::*;
