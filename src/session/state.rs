//! Connection state machine
//!
//! [`next_transition`] is the whole transition table as a pure function.
//! [`SessionHandle`] is the only place the result is applied, so state can
//! only move along the table or through the administrative operations.

use crate::protocol::DeviceRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    AwaitingQr,
    Connected,
    /// Reserved; a remote logout lands in `Disconnected`
    LoggedOut,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::AwaitingQr => "awaiting_qr",
            ConnectionState::Connected => "connected",
            ConnectionState::LoggedOut => "logged_out",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport events that drive the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    QrIssued(String),
    Connected,
    Disconnected,
    LoggedOut,
}

/// What happens to the stored QR code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QrEffect {
    Keep,
    Store(String),
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub to: ConnectionState,
    pub qr: QrEffect,
}

impl Transition {
    fn new(to: ConnectionState, qr: QrEffect) -> Self {
        Self { to, qr }
    }
}

/// Transition for `event` in state `from`; `None` means the event is ignored
pub fn next_transition(from: ConnectionState, event: &SessionEvent) -> Option<Transition> {
    use ConnectionState::*;

    match (from, event) {
        (_, SessionEvent::LoggedOut) => Some(Transition::new(Disconnected, QrEffect::Clear)),

        (_, SessionEvent::QrIssued(code)) if code.is_empty() => None,
        (Disconnected | LoggedOut | AwaitingQr, SessionEvent::QrIssued(code)) => {
            Some(Transition::new(AwaitingQr, QrEffect::Store(code.clone())))
        }
        (Connected, SessionEvent::QrIssued(_)) => None,

        (Disconnected | LoggedOut | AwaitingQr, SessionEvent::Connected) => {
            Some(Transition::new(Connected, QrEffect::Clear))
        }
        (Connected, SessionEvent::Connected) => None,

        (Connected, SessionEvent::Disconnected) => {
            Some(Transition::new(Disconnected, QrEffect::Keep))
        }
        (AwaitingQr, SessionEvent::Disconnected) => {
            Some(Transition::new(Disconnected, QrEffect::Clear))
        }
        (Disconnected | LoggedOut, SessionEvent::Disconnected) => None,
    }
}

/// Shared session state: connection state, pairing code and device record
#[derive(Debug, Clone)]
pub struct SessionHandle {
    state: ConnectionState,
    qr_code: Option<String>,
    device: Option<DeviceRecord>,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHandle {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            qr_code: None,
            device: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn qr_code(&self) -> Option<&str> {
        self.qr_code.as_deref()
    }

    pub fn device(&self) -> Option<&DeviceRecord> {
        self.device.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub(crate) fn apply(&mut self, transition: Transition) {
        self.state = transition.to;
        match transition.qr {
            QrEffect::Keep => {}
            QrEffect::Store(code) => self.qr_code = Some(code),
            QrEffect::Clear => self.qr_code = None,
        }
    }

    pub(crate) fn set_device(&mut self, device: Option<DeviceRecord>) {
        self.device = device;
    }

    pub(crate) fn take_device(&mut self) -> Option<DeviceRecord> {
        self.device.take()
    }

    /// Administrative teardown: Disconnected with no pairing code
    pub(crate) fn reset_connection(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.qr_code = None;
    }

    pub(crate) fn clear_qr(&mut self) {
        self.qr_code = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    fn qr(code: &str) -> SessionEvent {
        SessionEvent::QrIssued(code.to_string())
    }

    #[test]
    fn test_table_transitions() {
        assert_eq!(
            next_transition(Disconnected, &qr("2@a")),
            Some(Transition::new(AwaitingQr, QrEffect::Store("2@a".into())))
        );
        assert_eq!(
            next_transition(AwaitingQr, &SessionEvent::Connected),
            Some(Transition::new(Connected, QrEffect::Clear))
        );
        assert_eq!(
            next_transition(Disconnected, &SessionEvent::Connected),
            Some(Transition::new(Connected, QrEffect::Clear))
        );
        assert_eq!(
            next_transition(Connected, &SessionEvent::Disconnected),
            Some(Transition::new(Disconnected, QrEffect::Keep))
        );
    }

    #[test]
    fn test_logged_out_from_any_state() {
        for from in [Disconnected, AwaitingQr, Connected, LoggedOut] {
            assert_eq!(
                next_transition(from, &SessionEvent::LoggedOut),
                Some(Transition::new(Disconnected, QrEffect::Clear)),
                "from {from}"
            );
        }
    }

    #[test]
    fn test_refreshed_qr_replaces_code() {
        assert_eq!(
            next_transition(AwaitingQr, &qr("2@b")),
            Some(Transition::new(AwaitingQr, QrEffect::Store("2@b".into())))
        );
    }

    #[test]
    fn test_ignored_events() {
        assert_eq!(next_transition(Connected, &qr("2@a")), None);
        assert_eq!(next_transition(Connected, &SessionEvent::Connected), None);
        assert_eq!(next_transition(Disconnected, &SessionEvent::Disconnected), None);
    }

    #[test]
    fn test_empty_qr_is_ignored() {
        for from in [Disconnected, AwaitingQr, Connected, LoggedOut] {
            assert_eq!(next_transition(from, &qr("")), None, "from {from}");
        }
    }

    #[test]
    fn test_qr_invariant_holds_over_any_sequence() {
        let events = [
            qr("2@a"),
            qr("2@b"),
            SessionEvent::Disconnected,
            qr("2@c"),
            SessionEvent::Connected,
            qr("2@d"),
            SessionEvent::Disconnected,
            SessionEvent::Connected,
            SessionEvent::LoggedOut,
            qr("2@e"),
            SessionEvent::LoggedOut,
        ];

        let mut handle = SessionHandle::new();
        for event in &events {
            if let Some(transition) = next_transition(handle.state(), event) {
                handle.apply(transition);
            }
            assert_eq!(
                handle.qr_code().is_some(),
                handle.state() == AwaitingQr,
                "QR present outside AwaitingQr after {event:?}"
            );
        }
        assert_eq!(handle.state(), Disconnected);
    }

    #[test]
    fn test_handle_sequence() {
        let mut handle = SessionHandle::new();
        assert_eq!(handle.state(), Disconnected);

        handle.apply(next_transition(handle.state(), &qr("2@a")).unwrap());
        assert_eq!(handle.qr_code(), Some("2@a"));

        handle.apply(next_transition(handle.state(), &SessionEvent::Connected).unwrap());
        assert!(handle.is_connected());
        assert_eq!(handle.qr_code(), None);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(AwaitingQr).unwrap(),
            serde_json::json!("awaiting_qr")
        );
        assert_eq!(LoggedOut.to_string(), "logged_out");
    }
}
