//! Broker link supervision decisions
//!
//! Pure functions only: the supervisor task in `client` feeds link events in
//! and acts on what comes back.

use super::connection::{LinkState, ReconnectConfig};
use std::time::Duration;
use tracing::{error, info};

/// Something that happened to the broker link
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    ConnAckReceived,
    DisconnectedByBroker,
    NetworkError(String),
    ReconnectionStarted(u32),
    ShutdownRequested,
}

/// What the supervisor should do after the link dropped
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32, delay: Duration },
    AbortShutdownRequested,
}

pub struct LinkMonitor;

impl LinkMonitor {
    /// Next link state after `event`
    pub fn next_state(event: LinkEvent) -> LinkState {
        match event {
            LinkEvent::ConnAckReceived => {
                info!("Sidecar broker link established");
                LinkState::Connected
            }
            LinkEvent::DisconnectedByBroker => {
                info!("Broker closed the sidecar link");
                LinkState::Disconnected("Broker disconnected".to_string())
            }
            LinkEvent::NetworkError(reason) => {
                error!(error = %reason, "Sidecar broker link error");
                LinkState::Disconnected(reason)
            }
            LinkEvent::ReconnectionStarted(attempt) => LinkState::Reconnecting(attempt),
            LinkEvent::ShutdownRequested => LinkState::Closed,
        }
    }

    /// Retry forever with backoff unless shutdown was requested
    pub fn reconnection_decision(
        previous_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }
        let attempt = previous_attempts.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt,
            delay: config.backoff_delay(attempt),
        }
    }

    pub fn can_publish(state: &LinkState) -> bool {
        matches!(state, LinkState::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        assert_eq!(
            LinkMonitor::next_state(LinkEvent::ConnAckReceived),
            LinkState::Connected
        );
        assert_eq!(
            LinkMonitor::next_state(LinkEvent::NetworkError("reset".into())),
            LinkState::Disconnected("reset".into())
        );
        assert_eq!(
            LinkMonitor::next_state(LinkEvent::ReconnectionStarted(3)),
            LinkState::Reconnecting(3)
        );
        assert_eq!(
            LinkMonitor::next_state(LinkEvent::ShutdownRequested),
            LinkState::Closed
        );
    }

    #[test]
    fn test_reconnection_follows_backoff() {
        let config = ReconnectConfig::default();
        assert_eq!(
            LinkMonitor::reconnection_decision(0, &config, false),
            ReconnectionDecision::Proceed {
                attempt: 1,
                delay: Duration::from_millis(25)
            }
        );
        assert_eq!(
            LinkMonitor::reconnection_decision(7, &config, false),
            ReconnectionDecision::Proceed {
                attempt: 8,
                delay: Duration::from_millis(250)
            }
        );
    }

    #[test]
    fn test_shutdown_stops_reconnection() {
        assert_eq!(
            LinkMonitor::reconnection_decision(2, &ReconnectConfig::default(), true),
            ReconnectionDecision::AbortShutdownRequested
        );
    }

    #[test]
    fn test_only_connected_link_publishes() {
        assert!(LinkMonitor::can_publish(&LinkState::Connected));
        assert!(!LinkMonitor::can_publish(&LinkState::Connecting));
        assert!(!LinkMonitor::can_publish(&LinkState::Reconnecting(1)));
        assert!(!LinkMonitor::can_publish(&LinkState::Closed));
    }
}
